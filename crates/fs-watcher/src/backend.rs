use std::{fmt, path::Path};

use async_channel as chan;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{error, trace};

use crate::{event::RawNotifyEvent, Result, WatcherError};

pub type RawEventSender = chan::Sender<Result<RawNotifyEvent>>;

/// Source of raw change notifications for a path.
///
/// Opening returns a [`WatchHandle`]; the OS resource stays acquired exactly as
/// long as the handle is alive.
pub trait WatchBackend: Send + Sync + 'static {
	fn open(&self, path: &Path, events_tx: RawEventSender) -> Result<Box<dyn WatchHandle>>;
}

/// Marker for an acquired watch. Dropping it releases the OS handle.
pub trait WatchHandle: Send + fmt::Debug {}

/// Default backend, backed by the platform's recommended `notify` watcher
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

impl WatchBackend for NotifyBackend {
	fn open(&self, path: &Path, events_tx: RawEventSender) -> Result<Box<dyn WatchHandle>> {
		if !path.is_dir() {
			return Err(WatcherError::unsupported(path, "not a local directory"));
		}

		let mut watcher = RecommendedWatcher::new(
			move |result: notify::Result<notify::Event>| {
				if !events_tx.is_closed() {
					// SAFETY: we are not blocking the thread as this is an unbounded channel
					if events_tx
						.send_blocking(result.map(RawNotifyEvent::from).map_err(Into::into))
						.is_err()
					{
						error!("Unable to send watcher event to directory watcher;");
					}
				} else {
					trace!("Dropping file system event, directory watcher is gone;");
				}
			},
			Config::default(),
		)?;

		watcher.watch(path, RecursiveMode::NonRecursive)?;
		trace!(path = %path.display(), "Now watching directory");

		Ok(Box::new(NotifyHandle {
			watcher,
			path: path.into(),
		}))
	}
}

struct NotifyHandle {
	watcher: RecommendedWatcher,
	path: Box<Path>,
}

impl fmt::Debug for NotifyHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NotifyHandle")
			.field("path", &self.path)
			.finish_non_exhaustive()
	}
}

impl WatchHandle for NotifyHandle {}

impl Drop for NotifyHandle {
	fn drop(&mut self) {
		// The directory may already be gone, in which case the OS dropped the watch for us
		if let Err(e) = self.watcher.unwatch(&self.path) {
			trace!(?e, path = %self.path.display(), "Unable to unwatch directory;");
		} else {
			trace!(path = %self.path.display(), "Stopped watching directory");
		}
	}
}
