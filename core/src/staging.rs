//! The authoritative, unordered-until-published list of entries for the loaded
//! directory. All structural changes go through here before they are published.

use std::{collections::HashSet, path::Path};

use parking_lot::RwLock;

use crate::entry::{EntryRef, PathKey};

#[derive(Debug, Default)]
struct StagingInner {
	entries: Vec<EntryRef>,
	keys: HashSet<PathKey>,
}

#[derive(Debug)]
pub struct StagingList {
	case_insensitive: bool,
	inner: RwLock<StagingInner>,
}

impl StagingList {
	pub fn new(case_insensitive: bool) -> Self {
		Self {
			case_insensitive,
			inner: RwLock::default(),
		}
	}

	pub fn len(&self) -> usize {
		self.inner.read().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn key_of(&self, path: &Path) -> PathKey {
		PathKey::new(path, self.case_insensitive)
	}

	/// Append an entry; returns `false` if an entry with the same path is already listed
	pub fn insert(&self, entry: EntryRef) -> bool {
		let key = entry.key(self.case_insensitive);
		let mut inner = self.inner.write();
		if inner.keys.insert(key) {
			inner.entries.push(entry);
			true
		} else {
			false
		}
	}

	/// Append many entries, skipping duplicates; returns how many were added
	pub fn extend(&self, entries: impl IntoIterator<Item = EntryRef>) -> usize {
		let mut inner = self.inner.write();
		let mut added = 0;
		for entry in entries {
			if inner.keys.insert(entry.key(self.case_insensitive)) {
				inner.entries.push(entry);
				added += 1;
			}
		}
		added
	}

	pub fn contains(&self, path: &Path) -> bool {
		self.inner.read().keys.contains(&self.key_of(path))
	}

	pub fn find(&self, path: &Path) -> Option<EntryRef> {
		let key = self.key_of(path);
		let inner = self.inner.read();
		if !inner.keys.contains(&key) {
			return None;
		}

		inner
			.entries
			.iter()
			.find(|entry| entry.key(self.case_insensitive) == key)
			.cloned()
	}

	pub fn remove_by_path(&self, path: &Path) -> Option<EntryRef> {
		let key = self.key_of(path);
		let mut inner = self.inner.write();
		if !inner.keys.remove(&key) {
			return None;
		}

		let index = inner
			.entries
			.iter()
			.position(|entry| entry.key(self.case_insensitive) == key)?;
		Some(inner.entries.remove(index))
	}

	pub fn snapshot(&self) -> Vec<EntryRef> {
		self.inner.read().entries.clone()
	}

	/// Replace the contents, dropping duplicate paths
	pub fn replace_all(&self, entries: Vec<EntryRef>) {
		let mut inner = self.inner.write();
		inner.entries.clear();
		inner.keys.clear();
		for entry in entries {
			if inner.keys.insert(entry.key(self.case_insensitive)) {
				inner.entries.push(entry);
			}
		}
	}

	pub fn clear(&self) {
		let mut inner = self.inner.write();
		inner.entries.clear();
		inner.keys.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entry::test_utils::file;

	#[test]
	fn duplicate_paths_are_rejected() {
		let staging = StagingList::new(false);
		assert!(staging.insert(file("/d/a.txt", 1)));
		assert!(!staging.insert(file("/d/a.txt", 2)));
		assert_eq!(staging.len(), 1);
		assert_eq!(staging.find(Path::new("/d/a.txt")).unwrap().props().size, Some(1));
	}

	#[test]
	fn case_insensitive_staging_folds_paths() {
		let staging = StagingList::new(true);
		assert!(staging.insert(file("/d/Readme.md", 1)));
		assert!(!staging.insert(file("/d/README.MD", 1)));
		assert!(staging.contains(Path::new("/D/readme.md")));

		let sensitive = StagingList::new(false);
		assert!(sensitive.insert(file("/d/Readme.md", 1)));
		assert!(sensitive.insert(file("/d/README.MD", 1)));
	}

	#[test]
	fn removal_forgets_the_path() {
		let staging = StagingList::new(false);
		staging.extend([file("/d/a", 1), file("/d/b", 1), file("/d/c", 1)]);

		let removed = staging.remove_by_path(Path::new("/d/b")).unwrap();
		assert_eq!(removed.name(), "b");
		assert!(!staging.contains(Path::new("/d/b")));
		assert!(staging.insert(file("/d/b", 2)));

		assert!(staging.remove_by_path(Path::new("/d/missing")).is_none());
	}

	#[test]
	fn replace_all_deduplicates() {
		let staging = StagingList::new(false);
		staging.replace_all(vec![file("/d/a", 1), file("/d/a", 1), file("/d/b", 1)]);
		assert_eq!(staging.len(), 2);
	}
}
