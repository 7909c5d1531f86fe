//! The live directory: one loaded folder, its published listing and the
//! background machinery that keeps it current.

use std::{
	mem,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Weak,
	},
};

use async_channel as chan;
use fm_fs_watcher::{DirectoryWatcher, WatchBackend, WatchMode};
use parking_lot::{Mutex, RwLock};
use tokio::{
	sync::{mpsc, Mutex as AsyncMutex, MutexGuard},
	task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

use crate::{
	collaborators::{Collaborators, ContentStats},
	config::LiveDirectoryConfig,
	entry::{EntryRef, SyncStatus},
	enrich::Enricher,
	enumerate::{EnumerationOutcome, Enumerator, WalkSettings},
	error::LoadError,
	events::{DirectoryEvent, EventBus, EventSubscriber},
	processor::{MetricsSnapshot, OperationProcessor, ProcessorMetrics},
	published::PublishedCollection,
	sampler::IntervalSampler,
	sort::{
		self,
		group::{Group, GroupOptions},
		SortKey, SortOptions,
	},
	staging::StagingList,
};

/// What a successful load or refresh produced
#[derive(Debug, Clone)]
pub struct LoadSummary {
	pub path: PathBuf,
	/// Entries published once the load completed
	pub entries: usize,
	pub outcome: EnumerationOutcome,
	pub watch_mode: WatchMode,
	/// Set when enumeration stopped early; the entries gathered before are kept
	pub partial_failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
	/// New directory: the published list starts over and fills progressively
	Fresh,
	/// Same directory: the result is reconciled against what is shown
	Refresh,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ViewState {
	pub sort: SortOptions,
	pub group: GroupOptions,
	/// Lowercased name filter
	pub name_filter: Option<String>,
}

struct Session {
	watcher: DirectoryWatcher,
	processor: JoinHandle<()>,
	cancel: CancellationToken,
}

pub(crate) struct Shared {
	pub config: LiveDirectoryConfig,
	pub collaborators: Collaborators,
	backend: Arc<dyn WatchBackend>,
	pub events: EventBus,
	pub staging: StagingList,
	pub published: PublishedCollection,
	pub enricher: Enricher,
	pub view: RwLock<ViewState>,
	pub generation: AtomicU64,
	pub folder_synced: AtomicBool,
	pub metrics: Arc<ProcessorMetrics>,
	mutation_guard: AsyncMutex<()>,
	load_cancel: Mutex<Option<CancellationToken>>,
	session: AsyncMutex<Option<Session>>,
	current_path: RwLock<Option<PathBuf>>,
	watch_mode: RwLock<WatchMode>,
}

impl Shared {
	fn is_current(&self, generation: u64) -> bool {
		self.generation.load(Ordering::Acquire) == generation
	}

	/// Takes the mutation guard, unless a newer load started in the meantime
	pub(crate) async fn lock_generation(&self, generation: u64) -> Option<MutexGuard<'_, ()>> {
		let guard = self.mutation_guard.lock().await;
		self.is_current(generation).then_some(guard)
	}

	/// Sort the staging list and reconcile the published collection with it.
	/// Requires the mutation guard.
	pub(crate) async fn publish_locked(&self, _guard: &MutexGuard<'_, ()>) -> bool {
		let view = self.view.read().clone();

		let sorted = sort::order(&self.staging.snapshot(), &view.sort);
		self.staging.replace_all(sorted.clone());

		let visible = match view.name_filter.as_deref() {
			Some(filter) => sorted
				.into_iter()
				.filter(|entry| entry.name().to_lowercase().contains(filter))
				.collect(),
			None => sorted,
		};

		self.published
			.reconcile(visible, &view.group, &view.sort)
			.await
	}

	async fn publish(&self) -> bool {
		let guard = self.mutation_guard.lock().await;
		self.publish_locked(&guard).await
	}

	fn begin(&self) -> (u64, CancellationToken) {
		let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
		let cancel = CancellationToken::new();

		if let Some(previous) = self.load_cancel.lock().replace(cancel.clone()) {
			previous.cancel();
		}

		self.enricher.cancel_all(generation);
		(generation, cancel)
	}

	/// Stop the watcher and the processor of the previous load, waiting until
	/// the OS handle is released
	async fn shutdown_session(&self) {
		let Some(Session {
			watcher,
			processor,
			cancel,
		}) = self.session.lock().await.take()
		else {
			return;
		};

		let path = watcher.path().to_path_buf();
		cancel.cancel();
		watcher.stop().await;

		if let Err(e) = processor.await {
			if e.is_panic() {
				error!(?e, "Operation processor panicked;");
			}
		}

		self.metrics.log_metrics(&path);
	}

	async fn start_watch(
		self: &Arc<Self>,
		path: &Path,
		generation: u64,
		cancel: &CancellationToken,
	) -> Option<WatchMode> {
		let (operations_tx, operations_rx) = chan::unbounded();

		let watcher = match DirectoryWatcher::start(path, self.backend.as_ref(), operations_tx) {
			Ok(watcher) => watcher,
			Err(e) => {
				warn!(?e, "Live watch unavailable;");
				return Some(WatchMode::Unavailable {
					reason: e.to_string(),
				});
			}
		};

		let mut session = self.session.lock().await;
		if !self.is_current(generation) {
			drop(session);
			watcher.stop().await;
			return None;
		}

		let processor_cancel = cancel.child_token();
		let processor = OperationProcessor::new(
			Arc::clone(self),
			generation,
			operations_rx,
			processor_cancel.clone(),
		);

		*session = Some(Session {
			watcher,
			processor: tokio::spawn(processor.run().in_current_span()),
			cancel: processor_cancel,
		});

		Some(WatchMode::Live)
	}

	fn set_watch_mode(&self, mode: WatchMode) {
		let previous = mem::replace(&mut *self.watch_mode.write(), mode.clone());
		if previous != mode {
			self.events.emit(DirectoryEvent::WatchModeChanged(mode));
		}
	}

	fn fail(&self, path: &Path, error: LoadError) -> LoadError {
		if error.is_reportable() {
			self.events.emit(DirectoryEvent::LoadFailed {
				path: path.to_path_buf(),
				error: error.clone(),
			});
			self.collaborators.notifications.load_failed(path, &error);
		}
		error
	}

	fn enumerator(&self) -> Enumerator {
		let config = &self.config.enumeration;
		Enumerator::new(
			self.collaborators.probe_for(&config.storage_roots),
			Arc::clone(&self.collaborators.storage),
			WalkSettings::new(config, self.config.visibility),
		)
	}

	/// Moves streamed chunks into staging, publishing in between whenever the
	/// progress sampler allows
	async fn stream_into_staging(
		&self,
		path: &Path,
		generation: u64,
		mut chunks_rx: mpsc::Receiver<Vec<EntryRef>>,
	) {
		let mut sampler = IntervalSampler::new(self.config.enumeration.progress_interval());
		let mut gathered = 0;

		while let Some(chunk) = chunks_rx.recv().await {
			let Some(guard) = self.lock_generation(generation).await else {
				// Keep draining so the walk isn't blocked on a full channel
				continue;
			};

			gathered += self.staging.extend(chunk);

			if sampler.check_now() {
				self.publish_locked(&guard).await;
				self.events.emit(DirectoryEvent::LoadProgress {
					path: path.to_path_buf(),
					entries: gathered,
				});
			}
		}
	}

	/// Reuses the entries already listed for unchanged paths, so their
	/// identity and enriched attributes survive a refresh
	async fn merge_into_staging(
		&self,
		generation: u64,
		mut chunks_rx: mpsc::Receiver<Vec<EntryRef>>,
	) {
		let mut fresh = Vec::new();
		while let Some(chunk) = chunks_rx.recv().await {
			fresh.extend(chunk);
		}

		let Some(guard) = self.lock_generation(generation).await else {
			return;
		};

		let merged = fresh
			.into_iter()
			.map(|entry| match self.staging.find(entry.path()) {
				Some(existing) if existing.is_dir() == entry.is_dir() => {
					existing.apply_stat(&entry.stat());
					existing
				}
				_ => entry,
			})
			.collect();

		self.staging.replace_all(merged);
		drop(guard);
	}

	#[instrument(skip(self, path), fields(path = %path.display()))]
	async fn load(
		self: &Arc<Self>,
		path: PathBuf,
		mode: LoadMode,
	) -> Result<LoadSummary, LoadError> {
		let (generation, cancel) = self.begin();
		self.shutdown_session().await;

		if !self.is_current(generation) {
			return Err(LoadError::Superseded);
		}

		let previous_path = self.current_path.read().clone();
		self.events.emit(DirectoryEvent::LoadStarted { path: path.clone() });

		if mode == LoadMode::Fresh {
			let Some(_guard) = self.lock_generation(generation).await else {
				return Err(LoadError::Superseded);
			};

			self.staging.clear();
			self.folder_synced.store(false, Ordering::Release);
			*self.current_path.write() = Some(path.clone());

			let view = self.view.read().clone();
			self.published
				.reset(Vec::new(), &view.group, &view.sort)
				.await;
		}

		let (chunks_tx, chunks_rx) = mpsc::channel(4);
		let enumerator = self.enumerator();
		let walk = enumerator.run(&path, &cancel, chunks_tx);

		let report = match mode {
			LoadMode::Fresh => {
				tokio::join!(walk, self.stream_into_staging(&path, generation, chunks_rx)).0
			}
			LoadMode::Refresh => {
				tokio::join!(walk, self.merge_into_staging(generation, chunks_rx)).0
			}
		};

		if !self.is_current(generation) || cancel.is_cancelled() {
			debug!("Load superseded during enumeration");
			return Err(LoadError::Superseded);
		}

		let outcome = match report.outcome {
			EnumerationOutcome::Failed(error) => {
				if mode == LoadMode::Refresh {
					// The listing is gone; show that rather than stale entries
					if let Some(guard) = self.lock_generation(generation).await {
						self.staging.clear();
						self.publish_locked(&guard).await;
					}
				}
				return Err(self.fail(&path, error));
			}
			outcome => outcome,
		};

		let entries = {
			let Some(guard) = self.lock_generation(generation).await else {
				return Err(LoadError::Superseded);
			};
			self.publish_locked(&guard).await;
			self.published.len()
		};

		let folder_status = self
			.collaborators
			.cloud
			.sync_status(&path)
			.await
			.unwrap_or_else(|e| {
				debug!(?e, "Unable to query folder sync status;");
				SyncStatus::Unknown
			});
		self.folder_synced
			.store(folder_status.is_synced(), Ordering::Release);

		let snapshot = self.staging.snapshot();
		self.collaborators
			.layout
			.content_loaded(&path, &ContentStats::from_entries(&snapshot));

		let watch_mode = match outcome {
			EnumerationOutcome::StorageObjectWalk {
				needs_watch_degraded: true,
			} => WatchMode::Unavailable {
				reason: "location doesn't support change notifications".to_string(),
			},
			_ => match self.start_watch(&path, generation, &cancel).await {
				Some(mode) => mode,
				None => return Err(LoadError::Superseded),
			},
		};
		self.set_watch_mode(watch_mode.clone());

		if self.config.enrichment.auto_enrich {
			for entry in snapshot {
				self.enricher.request(entry, generation);
			}
		}

		info!(entries, ?outcome, "Directory loaded");
		self.events.emit(DirectoryEvent::LoadCompleted {
			previous_path,
			new_path: path.clone(),
			entries,
		});

		Ok(LoadSummary {
			path,
			entries,
			outcome,
			watch_mode,
			partial_failure: report.partial_failure.map(|e| e.to_string()),
		})
	}

	/// Re-sort or regroup once enrichment settled, when the view is keyed on
	/// enriched attributes
	async fn enrichment_settled(&self, generation: u64) {
		let view = self.view.read().clone();
		let resort = matches!(
			view.sort.key,
			SortKey::FileType | SortKey::SyncStatus | SortKey::FileTag
		);

		if !resort && !view.group.depends_on_enrichment() {
			return;
		}

		let Some(guard) = self.lock_generation(generation).await else {
			return;
		};

		if resort {
			self.publish_locked(&guard).await;
		}
		if view.group.depends_on_enrichment() {
			self.published.regroup(&view.group, &view.sort).await;
		}
	}
}

async fn watch_enricher_idle(shared: Weak<Shared>, mut idle_rx: mpsc::UnboundedReceiver<u64>) {
	while let Some(generation) = idle_rx.recv().await {
		let Some(shared) = shared.upgrade() else {
			break;
		};
		shared.enrichment_settled(generation).await;
	}
	trace!("Enricher idle listener stopped");
}

/// Live model of a single directory.
///
/// Must be created inside a Tokio runtime. Dropping it cancels all background
/// work; [`LiveDirectory::close`] additionally waits for the watcher to
/// release its OS handle.
pub struct LiveDirectory {
	inner: Arc<Shared>,
}

impl LiveDirectory {
	pub fn new(
		config: LiveDirectoryConfig,
		collaborators: Collaborators,
		backend: Arc<dyn WatchBackend>,
	) -> Self {
		let events = EventBus::default();
		let (enricher, idle_rx) = Enricher::new(
			collaborators.clone(),
			config.enrichment.clone(),
			events.clone(),
		);

		let inner = Arc::new(Shared {
			staging: StagingList::new(config.case_sensitivity.is_insensitive()),
			published: PublishedCollection::new(events.clone()),
			view: RwLock::new(ViewState {
				sort: config.view.sort,
				group: config.view.group,
				name_filter: None,
			}),
			generation: AtomicU64::new(0),
			folder_synced: AtomicBool::new(false),
			metrics: Arc::default(),
			mutation_guard: AsyncMutex::new(()),
			load_cancel: Mutex::new(None),
			session: AsyncMutex::new(None),
			current_path: RwLock::new(None),
			watch_mode: RwLock::new(WatchMode::Unavailable {
				reason: "no directory loaded".to_string(),
			}),
			config,
			collaborators,
			backend,
			events,
			enricher,
		});

		tokio::spawn(watch_enricher_idle(Arc::downgrade(&inner), idle_rx).in_current_span());

		Self { inner }
	}

	/// Replace the listing with the contents of `path`. A load still running is
	/// cancelled and resolves to [`LoadError::Superseded`].
	pub async fn load(&self, path: impl Into<PathBuf>) -> Result<LoadSummary, LoadError> {
		self.inner.load(path.into(), LoadMode::Fresh).await
	}

	/// Enumerate the current directory again and reconcile the listing with it
	pub async fn refresh(&self) -> Result<LoadSummary, LoadError> {
		let Some(path) = self.current_path() else {
			return Err(LoadError::NotFound);
		};

		self.inner.load(path, LoadMode::Refresh).await
	}

	/// Stop watching and cancel all background work; the listing stays as is
	pub async fn close(&self) {
		let (generation, cancel) = self.inner.begin();
		cancel.cancel();
		self.inner.shutdown_session().await;

		if self.inner.is_current(generation) {
			self.inner.set_watch_mode(WatchMode::Unavailable {
				reason: "directory closed".to_string(),
			});
		}
	}

	pub async fn set_sort_order(&self, sort: SortOptions) {
		self.inner.view.write().sort = sort;
		self.inner.published.invalidate_group_order();
		self.inner.publish().await;
	}

	pub async fn set_grouping(&self, group: GroupOptions) {
		let sort = {
			let mut view = self.inner.view.write();
			view.group = group;
			view.sort
		};

		let _guard = self.inner.mutation_guard.lock().await;
		self.inner.published.regroup(&group, &sort).await;
	}

	/// Only show entries whose name contains `filter`, ignoring case
	pub async fn set_name_filter(&self, filter: Option<String>) {
		self.inner.view.write().name_filter = filter
			.filter(|filter| !filter.is_empty())
			.map(|filter| filter.to_lowercase());
		self.inner.publish().await;
	}

	pub fn request_enrichment(&self, entry: &EntryRef) {
		let generation = self.inner.generation.load(Ordering::Acquire);
		self.inner
			.enricher
			.request(EntryRef::clone(entry), generation);
	}

	pub fn cancel_enrichment_for(&self, entry: &EntryRef) {
		self.inner.enricher.cancel_item(entry.id());
	}

	/// The published listing, in display order
	pub fn entries(&self) -> Vec<EntryRef> {
		self.inner.published.snapshot()
	}

	/// Published groups, when grouping is enabled
	pub fn groups(&self) -> Option<Vec<Group>> {
		self.inner.published.groups()
	}

	pub fn subscribe(&self) -> EventSubscriber {
		self.inner.events.subscribe()
	}

	pub fn current_path(&self) -> Option<PathBuf> {
		self.inner.current_path.read().clone()
	}

	pub fn watch_mode(&self) -> WatchMode {
		self.inner.watch_mode.read().clone()
	}

	pub fn sort_order(&self) -> SortOptions {
		self.inner.view.read().sort
	}

	pub fn grouping(&self) -> GroupOptions {
		self.inner.view.read().group
	}

	pub fn metrics(&self) -> MetricsSnapshot {
		self.inner.metrics.snapshot()
	}
}

impl Drop for LiveDirectory {
	fn drop(&mut self) {
		if let Some(cancel) = self.inner.load_cancel.lock().take() {
			cancel.cancel();
		}
		let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
		self.inner.enricher.cancel_all(generation);
	}
}
