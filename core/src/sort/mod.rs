use std::{cmp::Ordering, iter::Peekable, str::Chars, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::entry::{EntryRef, SyncStatus};

pub mod group;

#[derive(
	Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum SortKey {
	#[default]
	Name,
	DateModified,
	DateCreated,
	DateAccessed,
	Size,
	FileType,
	SyncStatus,
	FileTag,
	Path,
}

impl SortKey {
	/// Whether the key reads attributes that change when a file is modified
	pub fn depends_on_mutable_attributes(self) -> bool {
		matches!(
			self,
			Self::DateModified | Self::DateAccessed | Self::Size | Self::SyncStatus | Self::FileTag
		)
	}
}

#[derive(
	Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum SortDirection {
	#[default]
	Ascending,
	Descending,
}

impl SortDirection {
	pub fn apply(self, ordering: Ordering) -> Ordering {
		match self {
			Self::Ascending => ordering,
			Self::Descending => ordering.reverse(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortOptions {
	pub key: SortKey,
	pub direction: SortDirection,
	/// Folders before files; wins over `files_first` when both are set. Off by
	/// default, so entries are listed in pure key order.
	pub directories_first: bool,
	pub files_first: bool,
}

impl Default for SortOptions {
	fn default() -> Self {
		Self {
			key: SortKey::Name,
			direction: SortDirection::Ascending,
			directories_first: false,
			files_first: false,
		}
	}
}

/// Snapshot of the attribute an entry is sorted by, taken once per sort so
/// concurrent enrichment can't change the order mid-sort.
enum SortValue {
	Text(String),
	Time(Option<DateTime<Utc>>),
	Size(Option<u64>),
	Status(SyncStatus),
}

impl SortValue {
	fn of(entry: &EntryRef, key: SortKey) -> Self {
		let props = entry.props();
		match key {
			SortKey::Name => Self::Text(entry.name().to_owned()),
			SortKey::DateModified => Self::Time(props.modified),
			SortKey::DateCreated => Self::Time(props.created),
			SortKey::DateAccessed => Self::Time(props.accessed),
			SortKey::Size => Self::Size(props.size),
			SortKey::FileType => Self::Text(
				props
					.display_type
					.clone()
					.or_else(|| entry.extension().map(str::to_owned))
					.unwrap_or_default(),
			),
			SortKey::SyncStatus => Self::Status(props.sync_status),
			SortKey::FileTag => Self::Text(props.tags.first().cloned().unwrap_or_default()),
			SortKey::Path => Self::Text(entry.path().to_string_lossy().into_owned()),
		}
	}

	fn compare(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Self::Text(a), Self::Text(b)) => natural_cmp(a, b),
			(Self::Time(a), Self::Time(b)) => a.cmp(b),
			(Self::Size(a), Self::Size(b)) => a.cmp(b),
			(Self::Status(a), Self::Status(b)) => a.cmp(b),
			_ => Ordering::Equal,
		}
	}
}

/// Orders entries by the given options.
///
/// Folder/file partitioning is applied first and is not affected by direction.
/// Within a partition entries are ordered by the key, then by name; the sort is
/// stable, so entries equal on both keep their relative order.
pub fn order(entries: &[EntryRef], options: &SortOptions) -> Vec<EntryRef> {
	let mut keyed = entries
		.iter()
		.map(|entry| (SortValue::of(entry, options.key), entry))
		.collect::<Vec<_>>();

	keyed.sort_by(|(value_a, a), (value_b, b)| {
		partition(a, b, options).then_with(|| {
			options.direction.apply(
				value_a
					.compare(value_b)
					.then_with(|| natural_cmp(a.name(), b.name())),
			)
		})
	});

	keyed.into_iter().map(|(_, entry)| Arc::clone(entry)).collect()
}

fn partition(a: &EntryRef, b: &EntryRef, options: &SortOptions) -> Ordering {
	let (a_dir, b_dir) = (a.sorts_as_directory(), b.sorts_as_directory());

	if options.directories_first {
		b_dir.cmp(&a_dir)
	} else if options.files_first {
		a_dir.cmp(&b_dir)
	} else {
		Ordering::Equal
	}
}

/// Case-insensitive comparison where runs of digits compare by numeric value,
/// so "file2" sorts before "file10".
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
	let mut a_chars = a.chars().peekable();
	let mut b_chars = b.chars().peekable();

	loop {
		match (a_chars.peek().copied(), b_chars.peek().copied()) {
			(None, None) => return Ordering::Equal,
			(None, Some(_)) => return Ordering::Less,
			(Some(_), None) => return Ordering::Greater,
			(Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
				let ordering = compare_digits(
					&take_digits(&mut a_chars),
					&take_digits(&mut b_chars),
				);
				if ordering != Ordering::Equal {
					return ordering;
				}
			}
			(Some(x), Some(y)) => {
				let ordering = x.to_lowercase().cmp(y.to_lowercase());
				if ordering != Ordering::Equal {
					return ordering;
				}
				a_chars.next();
				b_chars.next();
			}
		}
	}
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
	let mut digits = String::new();
	while let Some(c) = chars.next_if(char::is_ascii_digit) {
		digits.push(c);
	}
	digits
}

fn compare_digits(a: &str, b: &str) -> Ordering {
	let (a, b) = (a.trim_start_matches('0'), b.trim_start_matches('0'));
	a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entry::test_utils::{dir, file};

	use pretty_assertions::assert_eq;

	fn names(entries: &[EntryRef]) -> Vec<&str> {
		entries.iter().map(|entry| entry.name()).collect()
	}

	#[test]
	fn natural_order_handles_numbers_and_case() {
		assert_eq!(natural_cmp("file2", "file10"), Ordering::Less);
		assert_eq!(natural_cmp("File", "file"), Ordering::Equal);
		assert_eq!(natural_cmp("a", "B"), Ordering::Less);
		assert_eq!(natural_cmp("img007", "img7"), Ordering::Equal);
		assert_eq!(natural_cmp("abc", "ab"), Ordering::Greater);
	}

	#[test]
	fn stable_for_equal_keys() {
		let a = file("/d/x/same.txt", 5);
		let b = file("/d/y/same.txt", 5);

		let options = SortOptions {
			key: SortKey::Size,
			..Default::default()
		};

		let sorted = order(&[Arc::clone(&a), Arc::clone(&b)], &options);
		assert_eq!(sorted[0].id(), a.id());
		assert_eq!(sorted[1].id(), b.id());
	}

	#[test]
	fn directories_first_is_not_reversed_by_direction() {
		let entries = [file("/d/b.txt", 1), dir("/d/zeta"), file("/d/a.txt", 2), dir("/d/alpha")];
		let folders_first = SortOptions {
			directories_first: true,
			..Default::default()
		};

		let ascending = order(&entries, &folders_first);
		assert_eq!(names(&ascending), ["alpha", "zeta", "a.txt", "b.txt"]);

		let descending = order(
			&entries,
			&SortOptions {
				direction: SortDirection::Descending,
				..folders_first
			},
		);
		assert_eq!(names(&descending), ["zeta", "alpha", "b.txt", "a.txt"]);
	}

	#[test]
	fn files_first_and_mixed() {
		let entries = [dir("/d/m"), file("/d/z.txt", 1), file("/d/a.txt", 1)];

		let files_first = order(
			&entries,
			&SortOptions {
				directories_first: false,
				files_first: true,
				..Default::default()
			},
		);
		assert_eq!(names(&files_first), ["a.txt", "z.txt", "m"]);

		let mixed = order(&entries, &SortOptions::default());
		assert_eq!(names(&mixed), ["a.txt", "m", "z.txt"]);
	}

	#[test]
	fn default_order_is_pure_name_order() {
		let entries = [
			dir("/d/b_dir"),
			file("/d/c.txt", 1),
			file("/d/b.txt", 1),
			file("/d/a.txt", 1),
		];
		let sorted = order(&entries, &SortOptions::default());
		assert_eq!(names(&sorted), ["a.txt", "b.txt", "b_dir", "c.txt"]);
	}

	#[test]
	fn size_ties_fall_back_to_name() {
		let entries = [file("/d/b", 10), file("/d/c", 1), file("/d/a", 10)];
		let sorted = order(
			&entries,
			&SortOptions {
				key: SortKey::Size,
				direction: SortDirection::Descending,
				..Default::default()
			},
		);
		assert_eq!(names(&sorted), ["b", "a", "c"]);
	}
}
