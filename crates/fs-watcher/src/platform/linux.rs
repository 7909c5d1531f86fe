//! inotify reports each half of a rename in its own event, followed by a
//! combined event carrying both paths. Halves are forwarded as they arrive so
//! renames across the watch boundary still show up; the combined event is
//! redundant and dropped. Modifications are buffered until they stabilize.

use std::{
	collections::HashMap,
	path::PathBuf,
	time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::{
	event::{Operation, RawEventKind, RawNotifyEvent, RenamePart},
	platform::EventHandler,
	Result,
};

const STABILIZATION_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct LinuxHandler {
	pending_updates: RwLock<HashMap<PathBuf, Instant>>,
}

impl LinuxHandler {
	pub fn new() -> Self {
		Self::default()
	}

	async fn evict_updates(&self, timeout: Duration) -> Vec<Operation> {
		let mut updates = self.pending_updates.write().await;
		let mut operations = Vec::new();

		updates.retain(|path, timestamp| {
			if timestamp.elapsed() > timeout {
				trace!(path = %path.display(), "Evicting update (stabilized);");
				operations.push(Operation::Modified(path.clone()));
				false
			} else {
				true
			}
		});

		operations
	}
}

#[async_trait]
impl EventHandler for LinuxHandler {
	async fn process(&self, event: RawNotifyEvent) -> Result<Vec<Operation>> {
		let Some(path) = event.primary_path().cloned() else {
			return Ok(vec![]);
		};

		match event.kind {
			RawEventKind::Create => Ok(vec![Operation::Added(path)]),
			RawEventKind::Remove => {
				self.pending_updates.write().await.remove(&path);
				Ok(vec![Operation::Removed(path)])
			}
			RawEventKind::Modify => {
				self.pending_updates
					.write()
					.await
					.insert(path, Instant::now());
				Ok(vec![])
			}
			RawEventKind::Rename(RenamePart::From) => {
				self.pending_updates.write().await.remove(&path);
				Ok(vec![Operation::RenamedFrom(path)])
			}
			RawEventKind::Rename(RenamePart::To) => Ok(vec![Operation::RenamedTo(path)]),
			RawEventKind::Rename(RenamePart::Both) => {
				trace!(from = %path.display(), "Ignoring paired rename, halves already sent;");
				Ok(vec![])
			}
			RawEventKind::Rename(RenamePart::Unknown) => {
				if path.exists() {
					Ok(vec![Operation::RenamedTo(path)])
				} else {
					Ok(vec![Operation::RenamedFrom(path)])
				}
			}
			RawEventKind::Other(ref kind) => {
				trace!(%kind, "Ignoring unknown event kind;");
				Ok(vec![])
			}
		}
	}

	async fn tick(&self) -> Result<Vec<Operation>> {
		Ok(self.evict_updates(STABILIZATION_TIMEOUT).await)
	}

	async fn reset(&self) {
		self.pending_updates.write().await.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn create_and_remove_pass_through() {
		let handler = LinuxHandler::new();

		let ops = handler
			.process(RawNotifyEvent::new(
				RawEventKind::Create,
				vec![PathBuf::from("/test/file.txt")],
			))
			.await
			.unwrap();
		assert_eq!(ops, vec![Operation::Added("/test/file.txt".into())]);

		let ops = handler
			.process(RawNotifyEvent::new(
				RawEventKind::Remove,
				vec![PathBuf::from("/test/file.txt")],
			))
			.await
			.unwrap();
		assert_eq!(ops, vec![Operation::Removed("/test/file.txt".into())]);
	}

	#[tokio::test]
	async fn rename_halves_are_forwarded_and_pair_is_dropped() {
		let handler = LinuxHandler::new();

		let from = handler
			.process(RawNotifyEvent::new(
				RawEventKind::Rename(RenamePart::From),
				vec![PathBuf::from("/test/old.txt")],
			))
			.await
			.unwrap();
		let to = handler
			.process(RawNotifyEvent::new(
				RawEventKind::Rename(RenamePart::To),
				vec![PathBuf::from("/test/new.txt")],
			))
			.await
			.unwrap();
		let both = handler
			.process(RawNotifyEvent::new(
				RawEventKind::Rename(RenamePart::Both),
				vec![
					PathBuf::from("/test/old.txt"),
					PathBuf::from("/test/new.txt"),
				],
			))
			.await
			.unwrap();

		assert_eq!(from, vec![Operation::RenamedFrom("/test/old.txt".into())]);
		assert_eq!(to, vec![Operation::RenamedTo("/test/new.txt".into())]);
		assert!(both.is_empty());
	}

	#[tokio::test]
	async fn modifications_wait_for_stabilization() {
		let handler = LinuxHandler::new();

		for _ in 0..5 {
			let ops = handler
				.process(RawNotifyEvent::new(
					RawEventKind::Modify,
					vec![PathBuf::from("/test/busy.log")],
				))
				.await
				.unwrap();
			assert!(ops.is_empty());
		}

		assert!(handler.tick().await.unwrap().is_empty());

		tokio::time::sleep(STABILIZATION_TIMEOUT + Duration::from_millis(20)).await;

		assert_eq!(
			handler.tick().await.unwrap(),
			vec![Operation::Modified("/test/busy.log".into())]
		);
		assert!(handler.tick().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn removal_discards_pending_modification() {
		let handler = LinuxHandler::new();
		let path = PathBuf::from("/test/gone.txt");

		handler
			.process(RawNotifyEvent::new(RawEventKind::Modify, vec![path.clone()]))
			.await
			.unwrap();
		handler
			.process(RawNotifyEvent::new(RawEventKind::Remove, vec![path]))
			.await
			.unwrap();

		tokio::time::sleep(STABILIZATION_TIMEOUT + Duration::from_millis(20)).await;
		assert!(handler.tick().await.unwrap().is_empty());
	}
}
