//! Services the live directory depends on but doesn't implement.
//!
//! Everything is injected through [`Collaborators`] at construction; the
//! defaults are minimal local implementations.

use std::{
	collections::HashMap,
	fmt,
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use fm_utils::FileIOError;
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
	entry::{Entry, FileKind, SyncStatus},
	enumerate::{
		probe::{CapabilityProbe, PathCapabilityProbe},
		storage::{LocalStorageProvider, StorageProvider},
		FsMetadataSource, MetadataSource,
	},
	error::LoadError,
};

#[derive(Debug, Error)]
pub enum CollaboratorError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("{provider} failed: {reason}")]
	Provider {
		provider: &'static str,
		reason: String,
	},
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

#[async_trait]
pub trait IconProvider: Send + Sync {
	/// Thumbnail for `path`; with `cached_only` the provider must not generate a new one
	async fn thumbnail(
		&self,
		path: &Path,
		size: u32,
		cached_only: bool,
	) -> CollaboratorResult<Option<Vec<u8>>>;

	async fn icon(&self, path: &Path, is_dir: bool, size: u32)
		-> CollaboratorResult<Option<Vec<u8>>>;

	async fn overlay(&self, path: &Path) -> CollaboratorResult<Option<Vec<u8>>>;
}

#[async_trait]
pub trait CloudSyncProvider: Send + Sync {
	async fn sync_status(&self, path: &Path) -> CollaboratorResult<SyncStatus>;
}

#[async_trait]
pub trait TagStore: Send + Sync {
	async fn tags_for(
		&self,
		path: &Path,
		file_reference: Option<u64>,
	) -> CollaboratorResult<Vec<String>>;

	/// Record the tags seen for a file, keyed by its file reference so they
	/// survive renames
	async fn persist(
		&self,
		path: &Path,
		file_reference: Option<u64>,
		tags: &[String],
	) -> CollaboratorResult<()>;
}

#[async_trait]
pub trait FileReferenceResolver: Send + Sync {
	async fn file_reference(&self, path: &Path) -> CollaboratorResult<Option<u64>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedProperties {
	pub dimensions: Option<String>,
	pub duration: Option<String>,
	pub version: Option<String>,
}

#[async_trait]
pub trait PropertyProvider: Send + Sync {
	async fn display_type(&self, entry: &Entry) -> CollaboratorResult<Option<String>>;

	async fn extended(&self, entry: &Entry) -> CollaboratorResult<ExtendedProperties>;
}

pub trait NotificationSink: Send + Sync {
	fn load_failed(&self, path: &Path, error: &LoadError);
}

/// Aggregate numbers about a freshly loaded folder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContentStats {
	pub total: usize,
	pub folders: usize,
	pub files: usize,
	pub images: usize,
	pub media: usize,
}

impl ContentStats {
	pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a Arc<Entry>>) -> Self {
		entries
			.into_iter()
			.fold(Self::default(), |mut stats, entry| {
				stats.total += 1;
				if entry.sorts_as_directory() {
					stats.folders += 1;
				} else {
					stats.files += 1;
				}
				match entry.kind() {
					FileKind::Image => stats.images += 1,
					FileKind::Audio | FileKind::Video => stats.media += 1,
					_ => {}
				}
				stats
			})
	}

	/// Mostly pictures and videos reads better as a grid
	pub fn prefers_grid(&self) -> bool {
		self.files > 0 && (self.images + self.media) * 2 > self.total
	}
}

pub trait LayoutAdvisor: Send + Sync {
	fn content_loaded(&self, path: &Path, stats: &ContentStats);
}

#[derive(Debug, Default)]
pub struct NoIcons;

#[async_trait]
impl IconProvider for NoIcons {
	async fn thumbnail(&self, _: &Path, _: u32, _: bool) -> CollaboratorResult<Option<Vec<u8>>> {
		Ok(None)
	}

	async fn icon(&self, _: &Path, _: bool, _: u32) -> CollaboratorResult<Option<Vec<u8>>> {
		Ok(None)
	}

	async fn overlay(&self, _: &Path) -> CollaboratorResult<Option<Vec<u8>>> {
		Ok(None)
	}
}

#[derive(Debug, Default)]
pub struct NotSynced;

#[async_trait]
impl CloudSyncProvider for NotSynced {
	async fn sync_status(&self, _: &Path) -> CollaboratorResult<SyncStatus> {
		Ok(SyncStatus::NotSynced)
	}
}

/// Tag store kept in memory, keyed by file reference when one is known
#[derive(Debug, Default)]
pub struct MemoryTagStore {
	by_path: RwLock<HashMap<PathBuf, Vec<String>>>,
	by_reference: RwLock<HashMap<u64, Vec<String>>>,
}

impl MemoryTagStore {
	pub fn with_tags(tags: impl IntoIterator<Item = (PathBuf, Vec<String>)>) -> Self {
		Self {
			by_path: RwLock::new(tags.into_iter().collect()),
			by_reference: RwLock::default(),
		}
	}
}

#[async_trait]
impl TagStore for MemoryTagStore {
	async fn tags_for(
		&self,
		path: &Path,
		file_reference: Option<u64>,
	) -> CollaboratorResult<Vec<String>> {
		if let Some(tags) =
			file_reference.and_then(|frn| self.by_reference.read().get(&frn).cloned())
		{
			return Ok(tags);
		}

		Ok(self.by_path.read().get(path).cloned().unwrap_or_default())
	}

	async fn persist(
		&self,
		path: &Path,
		file_reference: Option<u64>,
		tags: &[String],
	) -> CollaboratorResult<()> {
		if let Some(frn) = file_reference {
			self.by_reference.write().insert(frn, tags.to_vec());
		}
		self.by_path.write().insert(path.to_path_buf(), tags.to_vec());
		Ok(())
	}
}

/// Uses the inode (or file index) as the file reference number
#[derive(Debug, Default)]
pub struct InodeResolver;

#[async_trait]
impl FileReferenceResolver for InodeResolver {
	async fn file_reference(&self, path: &Path) -> CollaboratorResult<Option<u64>> {
		let metadata = tokio::fs::symlink_metadata(path)
			.await
			.map_err(|e| FileIOError::from((path, e)))?;

		Ok(inode(&metadata))
	}
}

#[cfg(unix)]
fn inode(metadata: &std::fs::Metadata) -> Option<u64> {
	use std::os::unix::fs::MetadataExt;

	Some(metadata.ino())
}

#[cfg(not(unix))]
fn inode(_metadata: &std::fs::Metadata) -> Option<u64> {
	None
}

/// Display types derived from the file kind and extension only
#[derive(Debug, Default)]
pub struct BasicProperties;

#[async_trait]
impl PropertyProvider for BasicProperties {
	async fn display_type(&self, entry: &Entry) -> CollaboratorResult<Option<String>> {
		Ok(Some(if entry.sorts_as_directory() {
			"Folder".to_string()
		} else {
			match entry.extension() {
				Some(ext) => format!("{} File", ext.to_uppercase()),
				None => "File".to_string(),
			}
		}))
	}

	async fn extended(&self, _: &Entry) -> CollaboratorResult<ExtendedProperties> {
		Ok(ExtendedProperties::default())
	}
}

#[derive(Debug, Default)]
pub struct LogNotifications;

impl NotificationSink for LogNotifications {
	fn load_failed(&self, path: &Path, error: &LoadError) {
		warn!(path = %path.display(), %error, "Unable to load directory;");
	}
}

#[derive(Debug, Default)]
pub struct LogLayoutAdvisor;

impl LayoutAdvisor for LogLayoutAdvisor {
	fn content_loaded(&self, path: &Path, stats: &ContentStats) {
		debug!(
			path = %path.display(),
			?stats,
			prefers_grid = stats.prefers_grid(),
			"Directory content loaded",
		);
	}
}

/// All injected services, shared by the pipeline, processor and enricher
#[derive(Clone)]
pub struct Collaborators {
	pub icons: Arc<dyn IconProvider>,
	pub cloud: Arc<dyn CloudSyncProvider>,
	pub tags: Arc<dyn TagStore>,
	pub file_references: Arc<dyn FileReferenceResolver>,
	pub properties: Arc<dyn PropertyProvider>,
	pub notifications: Arc<dyn NotificationSink>,
	pub layout: Arc<dyn LayoutAdvisor>,
	pub metadata: Arc<dyn MetadataSource>,
	pub storage: Arc<dyn StorageProvider>,
	/// Replaces the default probe built from the configured storage roots
	pub probe: Option<Arc<dyn CapabilityProbe>>,
}

impl Default for Collaborators {
	fn default() -> Self {
		Self {
			icons: Arc::new(NoIcons),
			cloud: Arc::new(NotSynced),
			tags: Arc::new(MemoryTagStore::default()),
			file_references: Arc::new(InodeResolver),
			properties: Arc::new(BasicProperties),
			notifications: Arc::new(LogNotifications),
			layout: Arc::new(LogLayoutAdvisor),
			metadata: Arc::new(FsMetadataSource),
			storage: Arc::new(LocalStorageProvider),
			probe: None,
		}
	}
}

impl Collaborators {
	pub(crate) fn probe_for(&self, storage_roots: &[PathBuf]) -> Arc<dyn CapabilityProbe> {
		self.probe.clone().unwrap_or_else(|| {
			Arc::new(PathCapabilityProbe::new(storage_roots.to_vec())) as Arc<dyn CapabilityProbe>
		})
	}
}

impl fmt::Debug for Collaborators {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Collaborators")
			.field("custom_probe", &self.probe.is_some())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entry::test_utils::{dir, file};

	#[tokio::test]
	async fn tags_follow_the_file_reference() {
		let store = MemoryTagStore::default();
		store
			.persist(Path::new("/d/old.txt"), Some(7), &["red".to_string()])
			.await
			.unwrap();

		let renamed = store.tags_for(Path::new("/d/new.txt"), Some(7)).await.unwrap();
		assert_eq!(renamed, ["red"]);
		assert!(store
			.tags_for(Path::new("/d/other.txt"), None)
			.await
			.unwrap()
			.is_empty());
	}

	#[test]
	fn picture_folders_prefer_grid() {
		let pictures = [file("/d/a.png", 1), file("/d/b.jpg", 1), file("/d/c.txt", 1)];
		assert!(ContentStats::from_entries(&pictures).prefers_grid());

		let mixed = [file("/d/a.png", 1), dir("/d/sub"), file("/d/c.txt", 1)];
		let stats = ContentStats::from_entries(&mixed);
		assert_eq!(stats.folders, 1);
		assert!(!stats.prefers_grid());
	}

	#[tokio::test]
	async fn display_type_from_extension() {
		let props = BasicProperties;
		assert_eq!(
			props.display_type(&file("/d/a.png", 1)).await.unwrap().as_deref(),
			Some("PNG File")
		);
		assert_eq!(
			props.display_type(&dir("/d/sub")).await.unwrap().as_deref(),
			Some("Folder")
		);
	}
}
