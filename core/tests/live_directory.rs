use std::{
	fs, io,
	path::Path,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_trait::async_trait;
use fm_core::{
	collaborators::NotificationSink,
	entry::EntryStat,
	enumerate::{
		probe::{CapabilityProbe, WalkStrategy},
		storage::{LocalStorageProvider, StorageItem, StorageListing, StorageProvider},
		FsMetadataSource, MetadataSource,
	},
	CollectionChange, Collaborators, DirectoryEvent, EntryRef, EventSubscriber, GroupOption,
	GroupOptions, LiveDirectory, LiveDirectoryConfig, LoadError, NotifyBackend, SortDirection,
	SortKey, SortOptions, WatchMode,
};
use fm_fs_watcher::{
	backend::RawEventSender, RawEventKind, RawNotifyEvent, WatchBackend, WatchHandle,
};
use fm_utils::FileIOError;
use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};
use tokio::time::{sleep, timeout};
use tracing_test::traced_test;

#[derive(Debug, Default)]
struct Counters {
	opened: AtomicUsize,
	closed: AtomicUsize,
}

/// Backend that lets the test inject raw events and counts acquired handles
#[derive(Default)]
struct FakeBackend {
	counters: Arc<Counters>,
	sender: Mutex<Option<RawEventSender>>,
}

#[derive(Debug)]
struct FakeHandle(Arc<Counters>);

impl WatchHandle for FakeHandle {}

impl Drop for FakeHandle {
	fn drop(&mut self) {
		self.0.closed.fetch_add(1, Ordering::SeqCst);
	}
}

impl WatchBackend for FakeBackend {
	fn open(
		&self,
		_path: &Path,
		events_tx: RawEventSender,
	) -> fm_fs_watcher::Result<Box<dyn WatchHandle>> {
		self.counters.opened.fetch_add(1, Ordering::SeqCst);
		*self.sender.lock().unwrap() = Some(events_tx);
		Ok(Box::new(FakeHandle(Arc::clone(&self.counters))))
	}
}

impl FakeBackend {
	async fn emit(&self, kind: RawEventKind, path: impl AsRef<Path>) {
		let tx = self.sender.lock().unwrap().clone().unwrap();
		tx.send(Ok(RawNotifyEvent::new(kind, vec![path.as_ref().to_path_buf()])))
			.await
			.unwrap();
	}

	fn opened(&self) -> usize {
		self.counters.opened.load(Ordering::SeqCst)
	}

	fn closed(&self) -> usize {
		self.counters.closed.load(Ordering::SeqCst)
	}
}

/// Metadata source that counts single-item lookups
#[derive(Default)]
struct CountingMetadata {
	calls: AtomicUsize,
}

#[async_trait]
impl MetadataSource for CountingMetadata {
	async fn stat(&self, path: &Path) -> Result<EntryStat, FileIOError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		FsMetadataSource.stat(path).await
	}
}

/// Storage walk that takes a while, so a second load can overtake it
struct SlowStorage;

#[async_trait]
impl StorageProvider for SlowStorage {
	async fn list(&self, path: &Path) -> Result<StorageListing, FileIOError> {
		sleep(Duration::from_millis(200)).await;
		LocalStorageProvider.list(path).await
	}
}

/// Storage that loses the connection after the first item
struct DroppingStorage;

#[async_trait]
impl StorageProvider for DroppingStorage {
	async fn list(&self, path: &Path) -> Result<StorageListing, FileIOError> {
		let first = path.join("a.txt");
		Ok(StorageListing {
			items: vec![StorageItem {
				stat: FsMetadataSource.stat(&first).await?,
				path: first,
			}],
			partial_failure: Some(FileIOError::from_std_io_err(
				path,
				io::Error::from(io::ErrorKind::ConnectionAborted),
			)),
		})
	}
}

struct StorageOnly;

impl CapabilityProbe for StorageOnly {
	fn probe(&self, _path: &Path) -> WalkStrategy {
		WalkStrategy::StorageObjects { live_watch: true }
	}
}

#[derive(Default)]
struct RecordingSink {
	failures: Mutex<Vec<LoadError>>,
}

impl NotificationSink for RecordingSink {
	fn load_failed(&self, _path: &Path, error: &LoadError) {
		self.failures.lock().unwrap().push(error.clone());
	}
}

fn config() -> LiveDirectoryConfig {
	let mut config = LiveDirectoryConfig::default();
	config.enrichment.auto_enrich = false;
	config
}

fn sample_dir() -> TempDir {
	let dir = tempdir().unwrap();
	fs::write(dir.path().join("a.txt"), b"a").unwrap();
	fs::write(dir.path().join("b.txt"), b"bb").unwrap();
	fs::write(dir.path().join("c.txt"), b"ccc").unwrap();
	fs::create_dir(dir.path().join("d")).unwrap();
	dir
}

fn names(entries: &[EntryRef]) -> Vec<String> {
	entries.iter().map(|entry| entry.name().to_string()).collect()
}

async fn next_selection(events: &mut EventSubscriber) -> Vec<EntryRef> {
	match timeout(
		Duration::from_secs(5),
		events.recv_filtered(|event| matches!(event, DirectoryEvent::SelectionRequested(_))),
	)
	.await
	.expect("timed out waiting for a selection request")
	{
		Some(DirectoryEvent::SelectionRequested(entries)) => entries,
		other => panic!("unexpected event: {other:?}"),
	}
}

#[tokio::test]
#[traced_test]
async fn removal_is_published_and_selection_moves_to_the_next_entry() {
	let dir = sample_dir();
	let backend = Arc::new(FakeBackend::default());
	let directory = LiveDirectory::new(config(), Collaborators::default(), backend.clone());

	let summary = directory.load(dir.path()).await.unwrap();
	assert_eq!(summary.entries, 4);
	assert_eq!(summary.watch_mode, WatchMode::Live);
	assert_eq!(names(&directory.entries()), ["a.txt", "b.txt", "c.txt", "d"]);

	let mut events = directory.subscribe();
	fs::remove_file(dir.path().join("b.txt")).unwrap();
	backend
		.emit(RawEventKind::Remove, dir.path().join("b.txt"))
		.await;

	let selection = next_selection(&mut events).await;
	assert_eq!(names(&selection), ["c.txt"]);
	assert_eq!(names(&directory.entries()), ["a.txt", "c.txt", "d"]);

	directory.close().await;
}

#[tokio::test]
async fn default_configuration_lists_in_pure_name_order() {
	let dir = tempdir().unwrap();
	for name in ["c.txt", "b.txt", "a.txt"] {
		fs::write(dir.path().join(name), name).unwrap();
	}
	fs::create_dir(dir.path().join("b_dir")).unwrap();

	let backend = Arc::new(FakeBackend::default());
	let directory =
		LiveDirectory::new(LiveDirectoryConfig::default(), Collaborators::default(), backend);
	directory.load(dir.path()).await.unwrap();

	assert_eq!(
		names(&directory.entries()),
		["a.txt", "b.txt", "b_dir", "c.txt"]
	);

	directory.close().await;
}

#[tokio::test]
async fn removal_selects_the_next_visible_entry() {
	let dir = tempdir().unwrap();
	for name in ["a.txt", "b.md", "c.txt"] {
		fs::write(dir.path().join(name), name).unwrap();
	}

	let backend = Arc::new(FakeBackend::default());
	let directory = LiveDirectory::new(config(), Collaborators::default(), backend.clone());
	directory.load(dir.path()).await.unwrap();
	directory.set_name_filter(Some(".txt".to_string())).await;
	assert_eq!(names(&directory.entries()), ["a.txt", "c.txt"]);

	let mut events = directory.subscribe();
	fs::remove_file(dir.path().join("a.txt")).unwrap();
	backend
		.emit(RawEventKind::Remove, dir.path().join("a.txt"))
		.await;

	let selection = next_selection(&mut events).await;
	assert_eq!(names(&selection), ["c.txt"]);
	assert_eq!(names(&directory.entries()), ["c.txt"]);

	directory.close().await;
}

#[tokio::test]
async fn interrupted_listing_publishes_what_was_gathered() {
	let dir = sample_dir();
	let backend = Arc::new(FakeBackend::default());
	let collaborators = Collaborators {
		storage: Arc::new(DroppingStorage),
		probe: Some(Arc::new(StorageOnly)),
		..Default::default()
	};
	let directory = LiveDirectory::new(config(), collaborators, backend);

	let summary = directory.load(dir.path()).await.unwrap();
	assert_eq!(summary.entries, 1);
	assert!(summary.partial_failure.is_some());
	assert_eq!(names(&directory.entries()), ["a.txt"]);

	directory.close().await;
}

#[tokio::test]
async fn rapid_modifications_are_refreshed_once() {
	let dir = sample_dir();
	let backend = Arc::new(FakeBackend::default());
	let metadata = Arc::new(CountingMetadata::default());
	let collaborators = Collaborators {
		metadata: metadata.clone(),
		..Default::default()
	};
	let directory = LiveDirectory::new(config(), collaborators, backend.clone());
	directory.load(dir.path()).await.unwrap();

	for _ in 0..50 {
		backend
			.emit(RawEventKind::Modify, dir.path().join("a.txt"))
			.await;
	}

	sleep(Duration::from_millis(1_000)).await;
	assert_eq!(metadata.calls.load(Ordering::SeqCst), 1);
	assert_eq!(directory.metrics().refetches, 1);

	directory.close().await;
}

#[tokio::test]
async fn loading_another_directory_releases_the_previous_watch() {
	let first = sample_dir();
	let second = sample_dir();
	let backend = Arc::new(FakeBackend::default());
	let directory = LiveDirectory::new(config(), Collaborators::default(), backend.clone());

	directory.load(first.path()).await.unwrap();
	assert_eq!((backend.opened(), backend.closed()), (1, 0));

	directory.load(second.path()).await.unwrap();
	assert_eq!((backend.opened(), backend.closed()), (2, 1));
	assert_eq!(directory.current_path().as_deref(), Some(second.path()));

	directory.close().await;
	assert_eq!((backend.opened(), backend.closed()), (2, 2));
	assert!(!directory.watch_mode().is_live());
}

#[tokio::test]
async fn repeated_additions_list_the_entry_once() {
	let dir = sample_dir();
	let backend = Arc::new(FakeBackend::default());
	let directory = LiveDirectory::new(config(), Collaborators::default(), backend.clone());
	directory.load(dir.path()).await.unwrap();

	let mut events = directory.subscribe();
	let created = dir.path().join("e.txt");
	fs::write(&created, b"e").unwrap();
	backend.emit(RawEventKind::Create, &created).await;
	backend.emit(RawEventKind::Create, &created).await;
	backend
		.emit(RawEventKind::Create, dir.path().join("a.txt"))
		.await;

	let selection = next_selection(&mut events).await;
	assert_eq!(names(&selection), ["e.txt"]);
	assert_eq!(
		names(&directory.entries()),
		["a.txt", "b.txt", "c.txt", "d", "e.txt"]
	);

	directory.close().await;
}

#[tokio::test]
async fn additions_that_vanished_are_dropped() {
	let dir = sample_dir();
	let backend = Arc::new(FakeBackend::default());
	let directory = LiveDirectory::new(config(), Collaborators::default(), backend.clone());
	directory.load(dir.path()).await.unwrap();

	backend
		.emit(RawEventKind::Create, dir.path().join("ghost.txt"))
		.await;

	sleep(Duration::from_millis(600)).await;
	assert_eq!(directory.entries().len(), 4);
	assert_eq!(directory.metrics().structural_edits, 0);

	directory.close().await;
}

#[tokio::test]
async fn missing_directory_is_reported() {
	let dir = tempdir().unwrap();
	let sink = Arc::new(RecordingSink::default());
	let collaborators = Collaborators {
		notifications: sink.clone(),
		..Default::default()
	};
	let backend = Arc::new(FakeBackend::default());
	let directory = LiveDirectory::new(config(), collaborators, backend.clone());
	let mut events = directory.subscribe();

	let result = directory.load(dir.path().join("missing")).await;
	assert_eq!(result.unwrap_err(), LoadError::NotFound);
	assert_eq!(*sink.failures.lock().unwrap(), [LoadError::NotFound]);
	assert_eq!(backend.opened(), 0);

	let failed = timeout(
		Duration::from_secs(5),
		events.recv_filtered(|event| matches!(event, DirectoryEvent::LoadFailed { .. })),
	)
	.await
	.unwrap();
	assert!(matches!(
		failed,
		Some(DirectoryEvent::LoadFailed {
			error: LoadError::NotFound,
			..
		})
	));
}

#[tokio::test]
async fn a_newer_load_supersedes_the_running_one() {
	let first = sample_dir();
	let second = sample_dir();
	let backend = Arc::new(FakeBackend::default());
	let collaborators = Collaborators {
		storage: Arc::new(SlowStorage),
		probe: Some(Arc::new(StorageOnly)),
		..Default::default()
	};
	let directory = LiveDirectory::new(config(), collaborators, backend.clone());

	let (first_result, second_result) =
		tokio::join!(directory.load(first.path()), directory.load(second.path()));

	assert_eq!(first_result.unwrap_err(), LoadError::Superseded);
	assert_eq!(second_result.unwrap().entries, 4);
	assert_eq!(directory.current_path().as_deref(), Some(second.path()));
	assert_eq!(backend.opened() - backend.closed(), 1);

	directory.close().await;
}

#[tokio::test]
async fn refresh_reconciles_without_reset() {
	let dir = sample_dir();
	let backend = Arc::new(FakeBackend::default());
	let directory = LiveDirectory::new(config(), Collaborators::default(), backend.clone());
	directory.load(dir.path()).await.unwrap();
	let before = directory.entries();

	fs::write(dir.path().join("b2.txt"), b"b2").unwrap();
	fs::remove_file(dir.path().join("c.txt")).unwrap();

	let mut events = directory.subscribe();
	let summary = directory.refresh().await.unwrap();
	assert_eq!(summary.entries, 4);

	let after = directory.entries();
	assert_eq!(names(&after), ["a.txt", "b.txt", "b2.txt", "d"]);
	assert_eq!(after[0].id(), before[0].id());

	let mut saw_reset = false;
	while let Ok(event) = events.try_recv() {
		saw_reset |= matches!(
			event,
			DirectoryEvent::CollectionChanged(CollectionChange::Reset { .. })
		);
	}
	assert!(!saw_reset);

	directory.close().await;
}

#[tokio::test]
async fn sort_filter_and_grouping_apply_to_the_published_list() {
	let dir = sample_dir();
	let backend = Arc::new(FakeBackend::default());
	let directory = LiveDirectory::new(config(), Collaborators::default(), backend.clone());
	directory.load(dir.path()).await.unwrap();

	directory
		.set_sort_order(SortOptions {
			key: SortKey::Size,
			direction: SortDirection::Descending,
			directories_first: true,
			files_first: false,
		})
		.await;
	assert_eq!(names(&directory.entries()), ["d", "c.txt", "b.txt", "a.txt"]);

	directory.set_name_filter(Some("B.".to_string())).await;
	assert_eq!(names(&directory.entries()), ["b.txt"]);
	directory.set_name_filter(None).await;
	assert_eq!(directory.entries().len(), 4);

	directory
		.set_grouping(GroupOptions {
			option: GroupOption::Size,
			direction: SortDirection::Descending,
			..Default::default()
		})
		.await;
	let groups = directory.groups().unwrap();
	let keys = groups
		.iter()
		.map(|group| group.header.key.as_str())
		.collect::<Vec<_>>();
	assert_eq!(keys, ["folder", "tiny"]);
	assert_eq!(names(&groups[1].items), ["c.txt", "b.txt", "a.txt"]);

	directory.close().await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn real_notifications_keep_the_listing_live() {
	let dir = sample_dir();
	let directory = LiveDirectory::new(config(), Collaborators::default(), Arc::new(NotifyBackend));
	directory.load(dir.path()).await.unwrap();
	assert!(directory.watch_mode().is_live());

	fs::write(dir.path().join("new.txt"), b"new").unwrap();

	timeout(Duration::from_secs(5), async {
		while !names(&directory.entries()).contains(&"new.txt".to_string()) {
			sleep(Duration::from_millis(50)).await;
		}
	})
	.await
	.expect("new file never showed up");

	directory.close().await;
}
