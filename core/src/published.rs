use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::trace;

use crate::{
	entry::{EntryId, EntryRef},
	events::{CollectionChange, DirectoryEvent, EventBus},
	reconcile::{apply, diff},
	sort::{
		group::{Group, GroupOptions, GroupedView},
		SortOptions,
	},
};

#[derive(Debug, Default)]
struct PublishedState {
	items: Vec<EntryRef>,
	groups: Option<GroupedView>,
}

/// The externally observable listing.
///
/// Only changed through reconciliation passes; each pass takes the publish
/// guard and raises at most one [`CollectionChange`].
#[derive(Debug)]
pub struct PublishedCollection {
	state: RwLock<PublishedState>,
	publish_guard: Mutex<()>,
	events: EventBus,
}

impl PublishedCollection {
	pub fn new(events: EventBus) -> Self {
		Self {
			state: RwLock::default(),
			publish_guard: Mutex::new(()),
			events,
		}
	}

	pub fn snapshot(&self) -> Vec<EntryRef> {
		self.state.read().items.clone()
	}

	pub fn len(&self) -> usize {
		self.state.read().items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn contains(&self, id: EntryId) -> bool {
		self.state.read().items.iter().any(|entry| entry.id() == id)
	}

	/// The listed entry that takes the place of `id` once it is gone: the first
	/// one after it that is still `kept`, otherwise the closest one before it
	pub fn neighbour_of(&self, id: EntryId, kept: impl Fn(&EntryRef) -> bool) -> Option<EntryRef> {
		let state = self.state.read();
		let index = state.items.iter().position(|entry| entry.id() == id)?;

		state.items[index + 1..]
			.iter()
			.find(|entry| kept(entry))
			.or_else(|| state.items[..index].iter().rev().find(|entry| kept(entry)))
			.cloned()
	}

	pub fn groups(&self) -> Option<Vec<Group>> {
		self.state
			.read()
			.groups
			.as_ref()
			.map(|view| view.groups().to_vec())
	}

	/// Replace everything at once, used for the first pass of a new directory
	pub async fn reset(&self, items: Vec<EntryRef>, group: &GroupOptions, sort: &SortOptions) {
		let _guard = self.publish_guard.lock().await;

		let len = items.len();
		{
			let mut state = self.state.write();
			state.groups = group
				.is_enabled()
				.then(|| GroupedView::build(&items, group, sort));
			state.items = items;
		}

		self.events
			.emit(DirectoryEvent::CollectionChanged(CollectionChange::Reset { len }));
	}

	/// Bring the published list in line with `items`; returns whether anything changed
	pub async fn reconcile(
		&self,
		items: Vec<EntryRef>,
		group: &GroupOptions,
		sort: &SortOptions,
	) -> bool {
		let _guard = self.publish_guard.lock().await;

		let (mutations, groups_changed) = {
			let mut guard = self.state.write();
			let state = &mut *guard;

			let mutations = diff(&state.items, &items);
			apply(&mut state.items, &mutations);

			let groups_changed = if group.is_enabled() {
				match &mut state.groups {
					Some(view) => view.update(&items, group, sort),
					None => {
						state.groups = Some(GroupedView::build(&items, group, sort));
						true
					}
				}
			} else {
				state.groups.take().is_some()
			};

			(mutations, groups_changed)
		};

		if mutations.is_empty() && !groups_changed {
			trace!("Reconciliation found nothing to publish");
			return false;
		}

		self.events
			.emit(DirectoryEvent::CollectionChanged(CollectionChange::Updated {
				mutations,
				groups_changed,
			}));

		true
	}

	/// Rebuild groups from scratch, after the grouping option changed or
	/// enrichment filled in the attributes they are keyed on
	pub async fn regroup(&self, group: &GroupOptions, sort: &SortOptions) {
		let _guard = self.publish_guard.lock().await;

		{
			let mut guard = self.state.write();
			let state = &mut *guard;
			state.groups = group
				.is_enabled()
				.then(|| GroupedView::build(&state.items, group, sort));
		}

		self.events
			.emit(DirectoryEvent::CollectionChanged(CollectionChange::Updated {
				mutations: Vec::new(),
				groups_changed: true,
			}));
	}

	/// Flag every group for re-ordering on the next pass
	pub fn invalidate_group_order(&self) {
		if let Some(view) = self.state.write().groups.as_mut() {
			view.mark_unsorted();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		entry::test_utils::{dir, file},
		sort::group::GroupOption,
	};

	use pretty_assertions::assert_eq;

	#[tokio::test]
	async fn reconciling_twice_emits_once() {
		let events = EventBus::new(16);
		let mut subscriber = events.subscribe();
		let published = PublishedCollection::new(events);

		let items = vec![file("/d/a", 1), file("/d/b", 1)];
		let no_groups = GroupOptions::default();
		let sort = SortOptions::default();

		assert!(published.reconcile(items.clone(), &no_groups, &sort).await);
		assert!(!published.reconcile(items.clone(), &no_groups, &sort).await);

		assert!(matches!(
			subscriber.try_recv(),
			Ok(DirectoryEvent::CollectionChanged(CollectionChange::Updated { .. }))
		));
		assert!(subscriber.try_recv().is_err());
		assert_eq!(published.len(), 2);
	}

	#[tokio::test]
	async fn neighbour_skips_entries_that_are_gone() {
		let published = PublishedCollection::new(EventBus::new(16));
		let items = vec![file("/d/a", 1), file("/d/b", 1), file("/d/c", 1)];
		let [a, b, c] = [0, 1, 2].map(|i| EntryRef::clone(&items[i]));
		published
			.reconcile(items, &GroupOptions::default(), &SortOptions::default())
			.await;

		let next = published.neighbour_of(a.id(), |_| true).unwrap();
		assert_eq!(next.id(), b.id());

		let next = published.neighbour_of(a.id(), |entry| entry.id() != b.id()).unwrap();
		assert_eq!(next.id(), c.id());

		let previous = published.neighbour_of(c.id(), |entry| entry.id() != b.id()).unwrap();
		assert_eq!(previous.id(), a.id());

		assert!(published.contains(b.id()));
		assert!(published.neighbour_of(a.id(), |_| false).is_none());
	}

	#[tokio::test]
	async fn groups_follow_reconciliation() {
		let published = PublishedCollection::new(EventBus::default());
		let grouping = GroupOptions {
			option: GroupOption::Size,
			..Default::default()
		};
		let sort = SortOptions::default();

		let folder = dir("/d/folder");
		let small = file("/d/small", 10);
		published
			.reset(vec![folder.clone(), small.clone()], &grouping, &sort)
			.await;
		assert_eq!(published.groups().map(|groups| groups.len()), Some(2));

		published.reconcile(vec![small], &grouping, &sort).await;
		let keys = published
			.groups()
			.unwrap_or_default()
			.into_iter()
			.map(|group| group.header.key)
			.collect::<Vec<_>>();
		assert_eq!(keys, ["tiny"]);

		published
			.reconcile(vec![folder], &GroupOptions::default(), &sort)
			.await;
		assert!(published.groups().is_none());
	}
}
