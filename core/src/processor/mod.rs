//! Single consumer of the watcher's operations.
//!
//! Structural operations (add, remove, rename) edit the staging list right
//! away; modifications are coalesced per path and refreshed in batches. After a
//! burst that changed something the listing is re-sorted and reconciled, at
//! most once per publish interval, and the view is asked to follow the
//! selection.

use std::{
	collections::{HashSet, VecDeque},
	io,
	path::{Path, PathBuf},
	sync::{atomic::Ordering, Arc},
	time::{Duration, Instant},
};

use async_channel as chan;
use fm_fs_watcher::Operation;
use fm_utils::FileIOError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace};

use crate::{
	entry::{Entry, EntryRef, PathKey},
	events::DirectoryEvent,
	model::Shared,
	sampler::IntervalSampler,
};

mod metrics;

pub use metrics::{MetricsSnapshot, ProcessorMetrics};

/// Modified paths waiting for a refresh, in arrival order and without duplicates
#[derive(Debug, Default)]
struct PendingUpdates {
	queue: VecDeque<(PathKey, PathBuf)>,
	keys: HashSet<PathKey>,
	since: Option<Instant>,
}

impl PendingUpdates {
	/// Returns `false` when the path was already pending
	fn push(&mut self, key: PathKey, path: PathBuf) -> bool {
		if !self.keys.insert(key.clone()) {
			return false;
		}

		if self.queue.is_empty() {
			self.since = Some(Instant::now());
		}
		self.queue.push_back((key, path));
		true
	}

	fn remove(&mut self, key: &PathKey) {
		if self.keys.remove(key) {
			self.queue.retain(|(pending, _)| pending != key);
			if self.queue.is_empty() {
				self.since = None;
			}
		}
	}

	fn take(&mut self, limit: usize) -> Vec<PathBuf> {
		let count = limit.min(self.queue.len());
		let taken = self
			.queue
			.drain(..count)
			.map(|(key, path)| {
				self.keys.remove(&key);
				path
			})
			.collect();

		self.since = (!self.queue.is_empty()).then(Instant::now);
		taken
	}

	fn len(&self) -> usize {
		self.queue.len()
	}

	fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	/// Oldest pending update has waited at least `wait`
	fn is_overdue(&self, wait: Duration) -> bool {
		self.since.is_some_and(|since| since.elapsed() >= wait)
	}
}

pub(crate) struct OperationProcessor {
	shared: Arc<Shared>,
	generation: u64,
	operations_rx: chan::Receiver<Operation>,
	cancel: CancellationToken,
	pending: PendingUpdates,
	publish_sampler: IntervalSampler,
	dirty: bool,
	last_added: Option<EntryRef>,
	neighbour: Option<EntryRef>,
}

impl OperationProcessor {
	pub fn new(
		shared: Arc<Shared>,
		generation: u64,
		operations_rx: chan::Receiver<Operation>,
		cancel: CancellationToken,
	) -> Self {
		let publish_sampler = IntervalSampler::new(shared.config.processor.publish_interval());

		Self {
			shared,
			generation,
			operations_rx,
			cancel,
			pending: PendingUpdates::default(),
			publish_sampler,
			dirty: false,
			last_added: None,
			neighbour: None,
		}
	}

	/// Runs until cancelled or until the operations channel is closed
	#[instrument(name = "operation_processor", skip_all, fields(generation = self.generation))]
	pub async fn run(mut self) {
		let idle_wait = self.shared.config.processor.idle_wait();
		let batch_size = self.shared.config.processor.update_batch_size.max(1);

		loop {
			let received = tokio::select! {
				biased;
				() = self.cancel.cancelled() => break,
				received = timeout(idle_wait, self.operations_rx.recv()) => received,
			};

			match received {
				Ok(Ok(operation)) => {
					self.handle(operation, batch_size).await;

					while let Ok(operation) = self.operations_rx.try_recv() {
						if self.cancel.is_cancelled() {
							break;
						}
						self.handle(operation, batch_size).await;
					}

					self.shared
						.metrics
						.update_queue_depth(self.operations_rx.len());

					if self.pending.is_overdue(idle_wait) {
						self.flush_updates(batch_size).await;
					}

					if self.dirty && self.publish_sampler.check_now() {
						self.publish().await;
					}
				}
				Ok(Err(_)) => {
					debug!("Operations channel closed, stopping processor");
					break;
				}
				Err(_elapsed) => {
					while !self.pending.is_empty() && !self.cancel.is_cancelled() {
						self.flush_updates(batch_size).await;
					}

					if self.dirty {
						self.publish().await;
					}
				}
			}
		}

		debug!("Operation processor stopped");
	}

	async fn handle(&mut self, operation: Operation, batch_size: usize) {
		self.shared.metrics.record_event_processed();
		trace!(?operation, "Processing operation");

		let result = match operation {
			Operation::Added(path) | Operation::RenamedTo(path) => self.add(path).await,
			Operation::Removed(path) | Operation::RenamedFrom(path) => {
				self.remove(&path).await;
				Ok(())
			}
			Operation::Modified(path) => {
				self.queue_update(path);
				if self.pending.len() >= batch_size {
					self.flush_updates(batch_size).await;
				}
				Ok(())
			}
		};

		if let Err(e) = result {
			error!(?e, "Failed to process directory operation;");
		}
	}

	async fn add(&mut self, path: PathBuf) -> Result<(), FileIOError> {
		if self.shared.staging.contains(&path) {
			trace!(path = %path.display(), "Already listed, refreshing it instead");
			self.queue_update(path);
			return Ok(());
		}

		let stat = match self.shared.collaborators.metadata.stat(&path).await {
			Ok(stat) => stat,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				trace!(path = %path.display(), "Added item is already gone");
				return Ok(());
			}
			Err(e) => return Err(e),
		};

		let entry = Arc::new(Entry::new(path, stat));
		if !self.shared.config.visibility.allows(
			entry.is_hidden(),
			entry.is_system(),
			entry.is_dot_file(),
		) {
			return Ok(());
		}

		let shared = Arc::clone(&self.shared);
		let Some(_guard) = shared.lock_generation(self.generation).await else {
			return Ok(());
		};

		if shared.staging.insert(EntryRef::clone(&entry)) {
			shared.metrics.record_structural_edit();
			self.dirty = true;

			if !entry.is_archive() {
				self.last_added = Some(EntryRef::clone(&entry));
			}

			if shared.config.enrichment.auto_enrich {
				shared.enricher.request(entry, self.generation);
			}
		}

		Ok(())
	}

	async fn remove(&mut self, path: &Path) {
		self.pending.remove(&self.shared.staging.key_of(path));

		let shared = Arc::clone(&self.shared);
		let Some(_guard) = shared.lock_generation(self.generation).await else {
			return;
		};

		let Some(removed) = shared.staging.remove_by_path(path) else {
			trace!(path = %path.display(), "Removed item wasn't listed");
			return;
		};

		shared.enricher.cancel_item(removed.id());
		shared.metrics.record_structural_edit();

		if self
			.last_added
			.as_ref()
			.is_some_and(|entry| entry.id() == removed.id())
		{
			self.last_added = None;
		}
		self.neighbour = shared
			.published
			.neighbour_of(removed.id(), |entry| shared.staging.contains(entry.path()));
		self.dirty = true;
	}

	fn queue_update(&mut self, path: PathBuf) {
		if !self.shared.staging.contains(&path) {
			trace!(path = %path.display(), "Ignoring modification of an unlisted item");
			return;
		}

		let key = self.shared.staging.key_of(&path);
		if !self.pending.push(key, path) {
			self.shared.metrics.record_event_coalesced();
		}
	}

	async fn flush_updates(&mut self, limit: usize) {
		let batch = self.pending.take(limit);
		if batch.is_empty() {
			return;
		}

		let started = Instant::now();
		let count = batch.len();
		let reorders = {
			let view = self.shared.view.read();
			view.sort.key.depends_on_mutable_attributes() || view.group.is_enabled()
		};

		for path in batch {
			if self.cancel.is_cancelled() {
				return;
			}

			let Some(entry) = self.shared.staging.find(&path) else {
				continue;
			};

			match self.shared.collaborators.metadata.stat(&path).await {
				Ok(stat) => {
					entry.apply_stat(&stat);

					if self.shared.folder_synced.load(Ordering::Acquire) {
						match self.shared.collaborators.cloud.sync_status(&path).await {
							Ok(status) => entry.update(|props| props.sync_status = status),
							Err(e) => {
								debug!(?e, path = %path.display(), "Unable to refresh sync status;")
							}
						}
					}

					self.shared.metrics.record_refetch();
					self.shared.events.emit(DirectoryEvent::EntryUpdated(entry));
					self.dirty |= reorders;
				}
				Err(e) if e.kind() == io::ErrorKind::NotFound => {
					trace!(
						path = %path.display(),
						"Modified item is gone, its removal will follow"
					);
				}
				Err(e) => error!(?e, "Failed to refresh modified item;"),
			}
		}

		self.shared
			.metrics
			.record_batch_processed(count, started.elapsed());
	}

	async fn publish(&mut self) {
		let shared = Arc::clone(&self.shared);
		let Some(guard) = shared.lock_generation(self.generation).await else {
			self.dirty = false;
			return;
		};

		shared.publish_locked(&guard).await;
		drop(guard);

		self.dirty = false;
		shared.metrics.record_publication();

		let selection = self.last_added.take().or(self.neighbour.take());
		self.neighbour = None;

		if let Some(entry) = selection.filter(|entry| shared.published.contains(entry.id())) {
			shared
				.events
				.emit(DirectoryEvent::SelectionRequested(vec![entry]));
		}
	}
}
