use std::{
	path::{Path, PathBuf},
	pin::pin,
	time::Duration,
};

use async_channel as chan;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use serde::{Deserialize, Serialize};
use tokio::{
	spawn,
	task::JoinHandle,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, instrument, trace, Instrument};

use crate::{
	backend::{WatchBackend, WatchHandle},
	event::{Operation, RawNotifyEvent},
	platform::{EventHandler, PlatformHandler},
	Result,
};

const HUNDRED_MILLIS: Duration = Duration::from_millis(100);

/// Whether a loaded directory is being kept in sync with the filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchMode {
	Live,
	Unavailable { reason: String },
}

impl WatchMode {
	pub fn is_live(&self) -> bool {
		matches!(self, Self::Live)
	}
}

/// Background listener for a single directory.
///
/// Prefer [`DirectoryWatcher::stop`], which returns only after the OS handle was
/// released and the listener task finished. Dropping the watcher releases the
/// handle immediately and lets the task wind down on its own.
#[derive(Debug)]
pub struct DirectoryWatcher {
	path: PathBuf,
	watch_handle: Option<Box<dyn WatchHandle>>,
	handle: Option<JoinHandle<()>>,
	stop_tx: chan::Sender<()>,
}

impl DirectoryWatcher {
	#[instrument(
		name = "directory_watcher",
		skip(backend, operations_tx),
		fields(path = %path.display())
	)]
	pub fn start(
		path: &Path,
		backend: &dyn WatchBackend,
		operations_tx: chan::Sender<Operation>,
	) -> Result<Self> {
		let (events_tx, events_rx) = chan::unbounded();
		let (stop_tx, stop_rx) = chan::bounded(1);

		let watch_handle = backend.open(path, events_tx)?;

		let handle = spawn(
			async move {
				while let Err(e) = spawn(
					Self::handle_watch_events(
						events_rx.clone(),
						stop_rx.clone(),
						operations_tx.clone(),
					)
					.in_current_span(),
				)
				.await
				{
					if e.is_panic() {
						error!(?e, "Directory watcher panicked;");
					} else {
						trace!("Directory watcher was cancelled and will exit...");
						break;
					}
					trace!("Restarting directory watcher processing task...");
				}

				info!("Directory watcher gracefully shutdown");
			}
			.in_current_span(),
		);

		Ok(Self {
			path: path.to_path_buf(),
			watch_handle: Some(watch_handle),
			handle: Some(handle),
			stop_tx,
		})
	}

	async fn handle_watch_events(
		events_rx: chan::Receiver<Result<RawNotifyEvent>>,
		stop_rx: chan::Receiver<()>,
		operations_tx: chan::Sender<Operation>,
	) {
		enum StreamMessage {
			NewEvent(Result<RawNotifyEvent>),
			Tick,
			Stop,
		}

		let handler = PlatformHandler::default();

		let mut handler_tick_interval =
			interval_at(Instant::now() + HUNDRED_MILLIS, HUNDRED_MILLIS);
		// In case of doubt check: https://docs.rs/tokio/latest/tokio/time/enum.MissedTickBehavior.html
		handler_tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let mut msg_stream = pin!((
			events_rx.map(StreamMessage::NewEvent),
			IntervalStream::new(handler_tick_interval).map(|_| StreamMessage::Tick),
			stop_rx.map(|()| StreamMessage::Stop),
		)
			.merge());

		while let Some(msg) = msg_stream.next().await {
			let operations = match msg {
				StreamMessage::NewEvent(Ok(event)) => handler.process(event).await,
				StreamMessage::NewEvent(Err(e)) => {
					error!(?e, "Watcher error;");
					continue;
				}
				StreamMessage::Tick => handler.tick().await,
				StreamMessage::Stop => {
					debug!("Stopping directory watcher event handler");
					break;
				}
			};

			match operations {
				Ok(operations) => {
					for operation in operations {
						if operations_tx.send(operation).await.is_err() {
							debug!("Operations channel closed, stopping directory watcher");
							handler.reset().await;
							return;
						}
					}
				}
				Err(e) => error!(?e, "Failed to handle directory file system event;"),
			}
		}

		handler.reset().await;
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Release the OS handle and wait for the listener task to finish
	#[instrument(skip(self), fields(path = %self.path.display()))]
	pub async fn stop(mut self) {
		self.watch_handle.take();

		if let Some(handle) = self.handle.take() {
			if self.stop_tx.send(()).await.is_err() {
				trace!("Directory watcher task already gone");
			}

			if let Err(e) = handle.await {
				error!(?e, "Failed to join watcher task;");
			}
		}
	}
}

impl Drop for DirectoryWatcher {
	fn drop(&mut self) {
		self.watch_handle.take();

		if self.handle.take().is_some() && self.stop_tx.try_send(()).is_err() {
			trace!("Directory watcher task already stopping");
		}
	}
}
