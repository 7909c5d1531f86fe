//! Event bus for everything a view of the directory needs to react to

use std::path::PathBuf;

use fm_fs_watcher::WatchMode;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::{entry::EntryRef, error::LoadError, reconcile::Mutation};

#[derive(Debug, Clone)]
pub enum CollectionChange {
	/// The published list was replaced wholesale
	Reset { len: usize },
	/// One reconciliation pass; mutations apply in order
	Updated {
		mutations: Vec<Mutation>,
		groups_changed: bool,
	},
}

#[derive(Debug, Clone)]
pub enum DirectoryEvent {
	LoadStarted {
		path: PathBuf,
	},
	LoadProgress {
		path: PathBuf,
		entries: usize,
	},
	LoadCompleted {
		previous_path: Option<PathBuf>,
		new_path: PathBuf,
		entries: usize,
	},
	LoadFailed {
		path: PathBuf,
		error: LoadError,
	},
	CollectionChanged(CollectionChange),
	SelectionRequested(Vec<EntryRef>),
	WatchModeChanged(WatchMode),
	EntryUpdated(EntryRef),
}

#[derive(Debug, Clone)]
pub struct EventBus {
	sender: broadcast::Sender<DirectoryEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn emit(&self, event: DirectoryEvent) {
		if self.sender.send(event).is_err() {
			trace!("No subscribers for directory event");
		}
	}

	pub fn subscribe(&self) -> EventSubscriber {
		EventSubscriber {
			receiver: self.sender.subscribe(),
		}
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}

/// Subscription to a [`EventBus`]; dropping it unsubscribes
#[derive(Debug)]
pub struct EventSubscriber {
	receiver: broadcast::Receiver<DirectoryEvent>,
}

impl EventSubscriber {
	/// Next event, or `None` once the bus is gone. Lagging subscribers skip ahead.
	pub async fn recv(&mut self) -> Option<DirectoryEvent> {
		loop {
			match self.receiver.recv().await {
				Ok(event) => return Some(event),
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					warn!(%skipped, "Directory event subscriber lagged behind;");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}

	pub fn try_recv(&mut self) -> Result<DirectoryEvent, broadcast::error::TryRecvError> {
		self.receiver.try_recv()
	}

	pub async fn recv_filtered<F>(&mut self, filter: F) -> Option<DirectoryEvent>
	where
		F: Fn(&DirectoryEvent) -> bool,
	{
		loop {
			let event = self.recv().await?;
			if filter(&event) {
				return Some(event);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn dropped_subscribers_are_released() {
		let bus = EventBus::new(8);
		let subscriber = bus.subscribe();
		assert_eq!(bus.subscriber_count(), 1);
		drop(subscriber);
		assert_eq!(bus.subscriber_count(), 0);

		// Emitting without subscribers is fine
		bus.emit(DirectoryEvent::LoadStarted { path: "/d".into() });
	}

	#[tokio::test]
	async fn lagging_subscriber_keeps_receiving() {
		let bus = EventBus::new(2);
		let mut subscriber = bus.subscribe();

		for entries in 0..5 {
			bus.emit(DirectoryEvent::LoadProgress {
				path: "/d".into(),
				entries,
			});
		}

		let Some(DirectoryEvent::LoadProgress { entries, .. }) = subscriber.recv().await else {
			panic!("expected progress");
		};
		assert_eq!(entries, 3);
	}
}
