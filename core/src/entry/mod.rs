//! A listed file or folder.
//!
//! Identity is fixed at construction (path, kind, flags); everything the
//! enricher or an update event can change lives behind [`Entry::props`].

use std::{
	fs::Metadata,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

mod kind;

pub use kind::FileKind;

use crate::sort::group::GroupMemo;

pub type EntryRef = Arc<Entry>;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id; an id is never handed out twice, so a removed entry can't
/// be confused with a later one at the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryId(u64);

impl EntryId {
	fn next() -> Self {
		Self(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
	}
}

#[derive(
	Debug,
	Default,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	PartialOrd,
	Ord,
	Serialize,
	Deserialize,
	Display,
	EnumString,
)]
pub enum SyncStatus {
	NotSynced,
	#[default]
	Unknown,
	OnlineOnly,
	FullyLocal,
	FullyLocalPersistent,
	Syncing,
	Excluded,
	Offline,
}

impl SyncStatus {
	/// Whether the location is managed by a sync provider at all
	pub fn is_synced(self) -> bool {
		!matches!(self, Self::NotSynced | Self::Unknown)
	}
}

/// Attributes of a path as reported by the filesystem or a storage provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryStat {
	pub is_dir: bool,
	pub size: Option<u64>,
	pub created: Option<DateTime<Utc>>,
	pub modified: Option<DateTime<Utc>>,
	pub accessed: Option<DateTime<Utc>>,
	pub is_hidden: bool,
	pub is_system: bool,
}

impl EntryStat {
	pub fn from_metadata(metadata: &Metadata) -> Self {
		let is_dir = metadata.is_dir();
		let (is_hidden, is_system) = attribute_flags(metadata);

		Self {
			is_dir,
			size: (!is_dir).then(|| metadata.len()),
			created: metadata.created().ok().map(DateTime::from),
			modified: metadata.modified().ok().map(DateTime::from),
			accessed: metadata.accessed().ok().map(DateTime::from),
			is_hidden,
			is_system,
		}
	}
}

#[cfg(windows)]
fn attribute_flags(metadata: &Metadata) -> (bool, bool) {
	use std::os::windows::fs::MetadataExt;

	const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
	const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;

	let attributes = metadata.file_attributes();
	(
		attributes & FILE_ATTRIBUTE_HIDDEN != 0,
		attributes & FILE_ATTRIBUTE_SYSTEM != 0,
	)
}

#[cfg(not(windows))]
fn attribute_flags(_metadata: &Metadata) -> (bool, bool) {
	(false, false)
}

/// Mutable attributes, filled in by enumeration, updates and enrichment
#[derive(Debug, Clone, Default)]
pub struct EntryProps {
	pub size: Option<u64>,
	pub created: Option<DateTime<Utc>>,
	pub modified: Option<DateTime<Utc>>,
	pub accessed: Option<DateTime<Utc>>,
	pub sync_status: SyncStatus,
	/// Ordered tag ids
	pub tags: Vec<String>,
	pub thumbnail: Option<Arc<[u8]>>,
	pub overlay: Option<Arc<[u8]>>,
	pub display_type: Option<String>,
	pub contextual_property: Option<String>,
	pub dimensions: Option<String>,
	pub duration: Option<String>,
	pub version: Option<String>,
	pub file_reference: Option<u64>,
	pub properties_initialized: bool,
}

/// Comparable form of a path, folded when the filesystem ignores case
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathKey(String);

impl PathKey {
	pub fn new(path: &Path, case_insensitive: bool) -> Self {
		let raw = path.to_string_lossy();
		Self(if case_insensitive {
			raw.to_lowercase()
		} else {
			raw.into_owned()
		})
	}
}

#[derive(Debug)]
pub struct Entry {
	id: EntryId,
	path: PathBuf,
	name: String,
	extension: Option<String>,
	is_dir: bool,
	is_hidden: bool,
	is_system: bool,
	kind: FileKind,
	props: RwLock<EntryProps>,
	/// Bumped on every [`Entry::update`]
	revision: AtomicU64,
	group_memo: Mutex<Option<GroupMemo>>,
}

impl Entry {
	pub fn new(path: PathBuf, stat: EntryStat) -> Self {
		let name = path
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|| path.to_string_lossy().into_owned());

		let extension = path
			.extension()
			.map(|ext| ext.to_string_lossy().to_lowercase());

		let kind = if stat.is_dir {
			FileKind::Folder
		} else {
			extension
				.as_deref()
				.map(FileKind::from_extension)
				.unwrap_or_default()
		};

		Self {
			id: EntryId::next(),
			name,
			extension,
			is_dir: stat.is_dir,
			is_hidden: stat.is_hidden,
			is_system: stat.is_system,
			kind,
			props: RwLock::new(EntryProps {
				size: stat.size,
				created: stat.created,
				modified: stat.modified,
				accessed: stat.accessed,
				..Default::default()
			}),
			revision: AtomicU64::new(0),
			group_memo: Mutex::new(None),
			path,
		}
	}

	pub fn id(&self) -> EntryId {
		self.id
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn extension(&self) -> Option<&str> {
		self.extension.as_deref()
	}

	pub fn is_dir(&self) -> bool {
		self.is_dir
	}

	pub fn is_hidden(&self) -> bool {
		self.is_hidden
	}

	pub fn is_system(&self) -> bool {
		self.is_system
	}

	pub fn is_dot_file(&self) -> bool {
		self.name.starts_with('.')
	}

	pub fn kind(&self) -> FileKind {
		self.kind
	}

	pub fn is_archive(&self) -> bool {
		self.kind.is_archive()
	}

	/// Folders that aren't archives; archives sort and group with files
	pub fn sorts_as_directory(&self) -> bool {
		self.is_dir && !self.is_archive()
	}

	pub fn key(&self, case_insensitive: bool) -> PathKey {
		PathKey::new(&self.path, case_insensitive)
	}

	pub fn props(&self) -> RwLockReadGuard<'_, EntryProps> {
		self.props.read()
	}

	/// Mutate the entry in place, invalidating the memoized group key
	pub fn update<R>(&self, f: impl FnOnce(&mut EntryProps) -> R) -> R {
		let result = f(&mut self.props.write());
		self.group_memo.lock().take();
		self.revision.fetch_add(1, Ordering::AcqRel);
		result
	}

	/// Changes whenever the mutable attributes were updated
	pub fn revision(&self) -> u64 {
		self.revision.load(Ordering::Acquire)
	}

	pub fn apply_stat(&self, stat: &EntryStat) {
		self.update(|props| {
			props.size = stat.size;
			props.created = stat.created;
			props.modified = stat.modified;
			props.accessed = stat.accessed;
		});
	}

	pub fn stat(&self) -> EntryStat {
		let props = self.props();
		EntryStat {
			is_dir: self.is_dir,
			size: props.size,
			created: props.created,
			modified: props.modified,
			accessed: props.accessed,
			is_hidden: self.is_hidden,
			is_system: self.is_system,
		}
	}

	pub(crate) fn group_memo(&self) -> &Mutex<Option<GroupMemo>> {
		&self.group_memo
	}
}

impl PartialEq for Entry {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for Entry {}

#[cfg(test)]
pub(crate) mod test_utils {
	use super::*;

	use chrono::TimeZone;

	pub fn file(path: &str, size: u64) -> EntryRef {
		Arc::new(Entry::new(
			PathBuf::from(path),
			EntryStat {
				size: Some(size),
				modified: Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).single(),
				..Default::default()
			},
		))
	}

	pub fn dir(path: &str) -> EntryRef {
		Arc::new(Entry::new(
			PathBuf::from(path),
			EntryStat {
				is_dir: true,
				..Default::default()
			},
		))
	}
}

#[cfg(test)]
mod tests {
	use super::{test_utils::*, *};

	#[test]
	fn ids_are_never_reused() {
		let a = file("/d/a.txt", 1);
		let again = file("/d/a.txt", 1);
		assert_ne!(a.id(), again.id());
		assert_ne!(*a, *again);
	}

	#[test]
	fn kind_and_extension_come_from_the_name() {
		let entry = file("/d/Photo.JPG", 10);
		assert_eq!(entry.name(), "Photo.JPG");
		assert_eq!(entry.extension(), Some("jpg"));
		assert_eq!(entry.kind(), FileKind::Image);
		assert_eq!(dir("/d/sub").kind(), FileKind::Folder);
	}

	#[test]
	fn path_keys_fold_case_only_when_asked() {
		let entry = file("/d/README.md", 1);
		assert_eq!(
			entry.key(true),
			PathKey::new(Path::new("/d/readme.md"), true)
		);
		assert_ne!(
			entry.key(false),
			PathKey::new(Path::new("/d/readme.md"), false)
		);
	}

	#[test]
	fn apply_stat_replaces_filesystem_attributes() {
		let entry = file("/d/a.txt", 1);
		entry.apply_stat(&EntryStat {
			size: Some(42),
			..Default::default()
		});
		assert_eq!(entry.props().size, Some(42));
		assert_eq!(entry.props().modified, None);
	}

	#[test]
	fn updates_bump_the_revision() {
		let entry = file("/d/a.txt", 1);
		let before = entry.revision();
		entry.update(|props| props.tags.push("red".to_string()));
		assert_ne!(entry.revision(), before);
	}
}
