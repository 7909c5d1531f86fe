use std::{cmp::Ordering, collections::HashMap};

use chrono::{DateTime, Datelike, Local, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{natural_cmp, order, SortDirection, SortOptions};
use crate::entry::{Entry, EntryId, EntryRef};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

#[derive(
	Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum GroupOption {
	#[default]
	None,
	Name,
	DateModified,
	DateCreated,
	Size,
	FileType,
	SyncStatus,
	FileTag,
	FolderPath,
}

#[derive(
	Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum DateUnit {
	Year,
	#[default]
	Month,
	Day,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupOptions {
	pub option: GroupOption,
	pub direction: SortDirection,
	pub date_unit: DateUnit,
}

impl GroupOptions {
	pub fn is_enabled(&self) -> bool {
		self.option != GroupOption::None
	}

	/// Groups keyed on data that only shows up after enrichment
	pub fn depends_on_enrichment(&self) -> bool {
		matches!(self.option, GroupOption::FileTag | GroupOption::SyncStatus)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GroupHeader {
	pub key: String,
	pub text: String,
	pub sort_index: i64,
}

impl GroupHeader {
	fn new(key: impl Into<String>, text: impl Into<String>, sort_index: i64) -> Self {
		Self {
			key: key.into(),
			text: text.into(),
			sort_index,
		}
	}
}

#[derive(Debug)]
pub(crate) struct GroupMemo {
	option: GroupOption,
	date_unit: DateUnit,
	header: GroupHeader,
}

/// Header of the group an entry belongs to, memoized on the entry until its
/// attributes change or a different grouping is requested.
pub fn group_header(entry: &Entry, options: &GroupOptions) -> GroupHeader {
	let mut memo = entry.group_memo().lock();

	if let Some(GroupMemo {
		option,
		date_unit,
		header,
	}) = memo.as_ref()
	{
		if *option == options.option && *date_unit == options.date_unit {
			return header.clone();
		}
	}

	let header = compute_header(entry, options);
	*memo = Some(GroupMemo {
		option: options.option,
		date_unit: options.date_unit,
		header: header.clone(),
	});

	header
}

fn compute_header(entry: &Entry, options: &GroupOptions) -> GroupHeader {
	let props = entry.props();

	match options.option {
		GroupOption::None => GroupHeader::new("", "", 0),
		GroupOption::Name => match entry.name().chars().next() {
			Some(c) if c.is_alphabetic() => {
				let letter = c.to_uppercase().collect::<String>();
				GroupHeader::new(letter.to_lowercase(), letter, 1)
			}
			_ => GroupHeader::new("#", "#", 0),
		},
		GroupOption::DateModified => date_header(props.modified, options.date_unit),
		GroupOption::DateCreated => date_header(props.created, options.date_unit),
		GroupOption::Size => size_header(entry, props.size),
		GroupOption::FileType => {
			if entry.sorts_as_directory() {
				GroupHeader::new("folder", "Folder", 0)
			} else {
				let key = entry.extension().unwrap_or_default().to_owned();
				let text = props.display_type.clone().unwrap_or_else(|| match &key[..] {
					"" => "File".to_owned(),
					ext => format!("{} File", ext.to_uppercase()),
				});
				GroupHeader::new(key, text, 0)
			}
		}
		GroupOption::SyncStatus => GroupHeader::new(
			props.sync_status.to_string(),
			props.sync_status.to_string(),
			props.sync_status as i64,
		),
		GroupOption::FileTag => match props.tags.first() {
			Some(tag) => GroupHeader::new(tag.clone(), tag.clone(), 0),
			None => GroupHeader::new("untagged", "Untagged", i64::MAX),
		},
		GroupOption::FolderPath => {
			let parent = entry
				.path()
				.parent()
				.map(|parent| parent.to_string_lossy().into_owned())
				.unwrap_or_default();
			GroupHeader::new(parent.clone(), parent, 0)
		}
	}
}

fn date_header(date: Option<DateTime<Utc>>, unit: DateUnit) -> GroupHeader {
	let Some(date) = date else {
		return GroupHeader::new("unknown", "Unknown", i64::MAX);
	};

	let local = date.with_timezone(&Local);
	let (year, month, day) = (
		i64::from(local.year()),
		i64::from(local.month()),
		i64::from(local.day()),
	);

	match unit {
		DateUnit::Year => {
			let text = local.format("%Y").to_string();
			GroupHeader::new(text.clone(), text, year)
		}
		DateUnit::Month => GroupHeader::new(
			local.format("%Y-%m").to_string(),
			local.format("%B %Y").to_string(),
			year * 100 + month,
		),
		DateUnit::Day => GroupHeader::new(
			local.format("%Y-%m-%d").to_string(),
			local.format("%A, %B %-d, %Y").to_string(),
			year * 10_000 + month * 100 + day,
		),
	}
}

fn size_header(entry: &Entry, size: Option<u64>) -> GroupHeader {
	if entry.sorts_as_directory() {
		return GroupHeader::new("folder", "Folder", -1);
	}

	match size.unwrap_or(0) {
		0 => GroupHeader::new("empty", "Empty (0 bytes)", 0),
		size if size < 16 * KIB => GroupHeader::new("tiny", "Tiny (< 16 KiB)", 1),
		size if size < MIB => GroupHeader::new("small", "Small (16 KiB - 1 MiB)", 2),
		size if size < 128 * MIB => GroupHeader::new("medium", "Medium (1 MiB - 128 MiB)", 3),
		size if size < GIB => GroupHeader::new("large", "Large (128 MiB - 1 GiB)", 4),
		size if size < 5 * GIB => GroupHeader::new("very_large", "Very large (1 GiB - 5 GiB)", 5),
		_ => GroupHeader::new("huge", "Huge (> 5 GiB)", 6),
	}
}

#[derive(Debug, Clone)]
pub struct Group {
	pub header: GroupHeader,
	pub items: Vec<EntryRef>,
	pub is_sorted: bool,
}

impl Group {
	fn is_directory_group(&self) -> bool {
		self.items
			.first()
			.is_some_and(|entry| entry.sorts_as_directory())
	}
}

#[derive(Debug)]
struct Membership {
	key: String,
	/// Entry revision the group was last ordered with
	revision: u64,
}

/// Groups kept in step with the flat published list.
///
/// Only groups that gained members or whose members changed are re-ordered, and
/// the group list itself is re-ordered only when a group was added.
#[derive(Debug, Default)]
pub struct GroupedView {
	groups: Vec<Group>,
	is_sorted: bool,
	membership: HashMap<EntryId, Membership>,
}

impl GroupedView {
	pub fn build(entries: &[EntryRef], options: &GroupOptions, sort: &SortOptions) -> Self {
		let mut view = Self::default();
		view.update(entries, options, sort);
		view
	}

	pub fn groups(&self) -> &[Group] {
		&self.groups
	}

	/// Re-order every group, used when the sort order changed
	pub fn mark_unsorted(&mut self) {
		self.is_sorted = false;
		self.groups
			.iter_mut()
			.for_each(|group| group.is_sorted = false);
	}

	/// Bring groups in line with `entries`; returns whether anything changed
	pub fn update(
		&mut self,
		entries: &[EntryRef],
		options: &GroupOptions,
		sort: &SortOptions,
	) -> bool {
		let mut changed = false;

		let headers = entries
			.iter()
			.map(|entry| (entry.id(), group_header(entry, options)))
			.collect::<HashMap<_, _>>();

		// Members that left the listing or moved to another group
		for group in &mut self.groups {
			let before = group.items.len();
			let key = &group.header.key;
			let membership = &mut self.membership;
			group.items.retain(|entry| {
				let keep = headers
					.get(&entry.id())
					.is_some_and(|header| header.key == *key);
				if !keep {
					membership.remove(&entry.id());
				}
				keep
			});
			changed |= group.items.len() != before;
		}

		for entry in entries {
			let Some(header) = headers.get(&entry.id()) else {
				continue;
			};

			if let Some(member) = self.membership.get_mut(&entry.id()) {
				let revision = entry.revision();
				if member.revision != revision {
					member.revision = revision;
					if let Some(group) = self
						.groups
						.iter_mut()
						.find(|group| group.header.key == member.key)
					{
						group.is_sorted = false;
					}
				}
				continue;
			}

			let group = match self
				.groups
				.iter_mut()
				.position(|group| group.header.key == header.key)
			{
				Some(index) => &mut self.groups[index],
				None => {
					self.is_sorted = false;
					self.groups.push(Group {
						header: header.clone(),
						items: Vec::new(),
						is_sorted: true,
					});
					let last = self.groups.len() - 1;
					&mut self.groups[last]
				}
			};

			group.items.push(EntryRef::clone(entry));
			group.is_sorted = false;
			self.membership.insert(
				entry.id(),
				Membership {
					key: header.key.clone(),
					revision: entry.revision(),
				},
			);
			changed = true;
		}

		let before = self.groups.len();
		self.groups.retain(|group| !group.items.is_empty());
		changed |= self.groups.len() != before;

		changed |= self.order(options, sort);

		changed
	}

	fn order(&mut self, options: &GroupOptions, sort: &SortOptions) -> bool {
		let mut changed = false;

		for group in self.groups.iter_mut().filter(|group| !group.is_sorted) {
			let sorted = order(&group.items, sort);
			changed |= sorted
				.iter()
				.map(|entry| entry.id())
				.ne(group.items.iter().map(|entry| entry.id()));
			group.items = sorted;
			group.is_sorted = true;
		}

		if self.is_sorted {
			return changed;
		}

		let direction = options.direction;
		let directories_on_top = options.option == GroupOption::Size;

		self.groups.sort_by(|a, b| {
			let partition = if directories_on_top {
				b.is_directory_group().cmp(&a.is_directory_group())
			} else {
				Ordering::Equal
			};

			partition.then_with(|| {
				direction.apply(
					a.header
						.sort_index
						.cmp(&b.header.sort_index)
						.then_with(|| natural_cmp(&a.header.text, &b.header.text)),
				)
			})
		});
		self.is_sorted = true;

		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		entry::test_utils::{dir, file},
		sort::SortKey,
	};

	use pretty_assertions::assert_eq;

	fn keys(view: &GroupedView) -> Vec<&str> {
		view.groups()
			.iter()
			.map(|group| group.header.key.as_str())
			.collect()
	}

	fn size_grouping(direction: SortDirection) -> GroupOptions {
		GroupOptions {
			option: GroupOption::Size,
			direction,
			..Default::default()
		}
	}

	#[test]
	fn size_grouping_puts_folders_first_in_both_directions() {
		let entries = [file("/d/one", 1), dir("/d/folder"), file("/d/thousand", 1000)];
		let sort = SortOptions::default();

		let ascending =
			GroupedView::build(&entries, &size_grouping(SortDirection::Ascending), &sort);
		assert_eq!(keys(&ascending), ["folder", "tiny"]);
		assert_eq!(ascending.groups()[1].items.len(), 2);

		let larger = [
			file("/d/one", 1),
			dir("/d/folder"),
			file("/d/big", 2 * MIB),
		];
		let descending =
			GroupedView::build(&larger, &size_grouping(SortDirection::Descending), &sort);
		assert_eq!(keys(&descending), ["folder", "medium", "tiny"]);
	}

	#[test]
	fn members_are_sorted_within_groups() {
		let entries = [file("/d/b.png", 1), file("/d/a.png", 1), file("/d/c.txt", 1)];
		let view = GroupedView::build(
			&entries,
			&GroupOptions {
				option: GroupOption::FileType,
				..Default::default()
			},
			&SortOptions {
				key: SortKey::Name,
				..Default::default()
			},
		);

		assert_eq!(keys(&view), ["png", "txt"]);
		let png = view.groups()[0]
			.items
			.iter()
			.map(|entry| entry.name())
			.collect::<Vec<_>>();
		assert_eq!(png, ["a.png", "b.png"]);
		assert_eq!(view.groups()[0].header.text, "PNG File");
	}

	#[test]
	fn incremental_update_adds_and_drops_groups() {
		let options = size_grouping(SortDirection::Ascending);
		let sort = SortOptions::default();

		let tiny = file("/d/tiny", 10);
		let big = file("/d/big", 2 * GIB);
		let mut view = GroupedView::build(&[EntryRef::clone(&tiny)], &options, &sort);
		assert_eq!(keys(&view), ["tiny"]);

		assert!(view.update(&[EntryRef::clone(&tiny), EntryRef::clone(&big)], &options, &sort));
		assert_eq!(keys(&view), ["tiny", "very_large"]);

		assert!(view.update(&[EntryRef::clone(&big)], &options, &sort));
		assert_eq!(keys(&view), ["very_large"]);

		assert!(!view.update(&[EntryRef::clone(&big)], &options, &sort));
	}

	#[test]
	fn changed_attributes_move_entries_between_groups() {
		let options = size_grouping(SortDirection::Ascending);
		let sort = SortOptions::default();
		let entry = file("/d/growing", 10);

		let mut view = GroupedView::build(&[EntryRef::clone(&entry)], &options, &sort);
		assert_eq!(keys(&view), ["tiny"]);

		entry.update(|props| props.size = Some(20 * MIB));
		assert!(view.update(&[EntryRef::clone(&entry)], &options, &sort));
		assert_eq!(keys(&view), ["medium"]);
	}

	#[test]
	fn members_follow_a_changed_sort_attribute() {
		let options = GroupOptions {
			option: GroupOption::FileType,
			..Default::default()
		};
		let sort = SortOptions {
			key: SortKey::Size,
			..Default::default()
		};

		let small = file("/d/small.txt", 1);
		let big = file("/d/big.txt", 50);
		let entries = [EntryRef::clone(&small), EntryRef::clone(&big)];
		let names = |view: &GroupedView| {
			view.groups()[0]
				.items
				.iter()
				.map(|entry| entry.name().to_owned())
				.collect::<Vec<_>>()
		};

		let mut view = GroupedView::build(&entries, &options, &sort);
		assert_eq!(names(&view), ["small.txt", "big.txt"]);

		small.update(|props| props.size = Some(100));
		assert!(view.update(&entries, &options, &sort));
		assert_eq!(keys(&view), ["txt"]);
		assert_eq!(names(&view), ["big.txt", "small.txt"]);

		assert!(!view.update(&entries, &options, &sort));
	}

	#[test]
	fn missing_dates_group_last() {
		let dated = file("/d/dated", 1);
		let undated = file("/d/undated", 1);
		undated.update(|props| props.modified = None);

		let view = GroupedView::build(
			&[undated, dated],
			&GroupOptions {
				option: GroupOption::DateModified,
				date_unit: DateUnit::Year,
				..Default::default()
			},
			&SortOptions::default(),
		);

		assert_eq!(view.groups().last().map(|g| g.header.key.as_str()), Some("unknown"));
	}
}
