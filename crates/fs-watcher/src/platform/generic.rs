//! Handler for backends that report renames as single events, or without
//! telling which half they are (FSEvents, ReadDirectoryChangesW, polling).

use async_trait::async_trait;
use tracing::trace;

use crate::{
	event::{Operation, RawEventKind, RawNotifyEvent, RenamePart},
	platform::EventHandler,
	Result,
};

#[derive(Debug, Default)]
pub struct GenericHandler;

impl GenericHandler {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl EventHandler for GenericHandler {
	async fn process(&self, event: RawNotifyEvent) -> Result<Vec<Operation>> {
		let RawNotifyEvent { kind, mut paths, .. } = event;
		if paths.is_empty() {
			return Ok(vec![]);
		}

		let ops = match kind {
			RawEventKind::Create => vec![Operation::Added(paths.swap_remove(0))],
			RawEventKind::Remove => vec![Operation::Removed(paths.swap_remove(0))],
			RawEventKind::Modify => vec![Operation::Modified(paths.swap_remove(0))],
			RawEventKind::Rename(RenamePart::Both) if paths.len() >= 2 => {
				let to = paths.swap_remove(1);
				let from = paths.swap_remove(0);
				vec![Operation::RenamedFrom(from), Operation::RenamedTo(to)]
			}
			RawEventKind::Rename(RenamePart::From) => {
				vec![Operation::RenamedFrom(paths.swap_remove(0))]
			}
			RawEventKind::Rename(RenamePart::To) => {
				vec![Operation::RenamedTo(paths.swap_remove(0))]
			}
			// Only one side of the rename is known, whichever exists now is the new name
			RawEventKind::Rename(_) => paths
				.into_iter()
				.map(|path| {
					if path.exists() {
						Operation::RenamedTo(path)
					} else {
						Operation::RenamedFrom(path)
					}
				})
				.collect(),
			RawEventKind::Other(kind) => {
				trace!(%kind, "Ignoring unknown event kind;");
				vec![]
			}
		};

		Ok(ops)
	}

	async fn tick(&self) -> Result<Vec<Operation>> {
		Ok(vec![])
	}

	async fn reset(&self) {}
}
