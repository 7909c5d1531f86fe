//! Minimal index-walk diff between the published list and its next state.
//!
//! Positions where both lists hold different entries become `Replace` runs; a
//! longer new list appends with a single `Insert`, a shorter one trims the tail
//! with a single `Remove`.

use crate::entry::EntryRef;

#[derive(Debug, Clone)]
pub enum Mutation {
	Replace { index: usize, items: Vec<EntryRef> },
	Insert { index: usize, items: Vec<EntryRef> },
	Remove { index: usize, count: usize },
}

pub fn diff(old: &[EntryRef], new: &[EntryRef]) -> Vec<Mutation> {
	let mut mutations = Vec::new();
	let shared = old.len().min(new.len());
	let mut run_start = None;

	for index in 0..shared {
		if old[index].id() != new[index].id() {
			if run_start.is_none() {
				run_start = Some(index);
			}
		} else if let Some(start) = run_start.take() {
			mutations.push(Mutation::Replace {
				index: start,
				items: new[start..index].to_vec(),
			});
		}
	}

	if let Some(start) = run_start {
		mutations.push(Mutation::Replace {
			index: start,
			items: new[start..shared].to_vec(),
		});
	}

	if new.len() > shared {
		mutations.push(Mutation::Insert {
			index: shared,
			items: new[shared..].to_vec(),
		});
	} else if old.len() > shared {
		mutations.push(Mutation::Remove {
			index: shared,
			count: old.len() - shared,
		});
	}

	mutations
}

pub fn apply(target: &mut Vec<EntryRef>, mutations: &[Mutation]) {
	for mutation in mutations {
		match mutation {
			Mutation::Replace { index, items } => {
				target.splice(*index..*index + items.len(), items.iter().cloned());
			}
			Mutation::Insert { index, items } => {
				target.splice(*index..*index, items.iter().cloned());
			}
			Mutation::Remove { index, count } => {
				target.drain(*index..*index + count);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entry::test_utils::file;

	fn ids(entries: &[EntryRef]) -> Vec<crate::entry::EntryId> {
		entries.iter().map(|entry| entry.id()).collect()
	}

	#[test]
	fn identical_lists_produce_nothing() {
		let list = vec![file("/d/a", 1), file("/d/b", 1)];
		assert!(diff(&list, &list).is_empty());
		assert!(diff(&[], &[]).is_empty());
	}

	#[test]
	fn single_change_is_a_single_replacement() {
		let (a, b, c, d, x) = (
			file("/d/a", 1),
			file("/d/b", 1),
			file("/d/c", 1),
			file("/d/d", 1),
			file("/d/x", 1),
		);
		let old = vec![a.clone(), b.clone(), c, d.clone()];
		let new = vec![a, b, x.clone(), d];

		let mutations = diff(&old, &new);
		assert_eq!(mutations.len(), 1);
		match &mutations[0] {
			Mutation::Replace { index, items } => {
				assert_eq!(*index, 2);
				assert_eq!(ids(items), vec![x.id()]);
			}
			other => panic!("expected a replacement, got {other:?}"),
		}
	}

	#[test]
	fn applying_the_diff_yields_the_new_list() {
		let pool = (0..8)
			.map(|i| file(&format!("/d/{i}"), 1))
			.collect::<Vec<_>>();

		let cases = [
			(vec![0, 1, 2], vec![0, 3, 1, 2]),
			(vec![0, 1, 2, 3, 4], vec![0, 2, 4]),
			(vec![], vec![5, 6]),
			(vec![5, 6], vec![]),
			(vec![0, 1, 2], vec![2, 1, 0, 7]),
		];

		for (old, new) in cases {
			let old = old.into_iter().map(|i| pool[i].clone()).collect::<Vec<_>>();
			let new = new.into_iter().map(|i| pool[i].clone()).collect::<Vec<_>>();

			let mut target = old.clone();
			apply(&mut target, &diff(&old, &new));
			assert_eq!(ids(&target), ids(&new));
			assert!(diff(&target, &new).is_empty());
		}
	}

	#[test]
	fn shrinking_removes_only_the_tail() {
		let (a, b, c) = (file("/d/a", 1), file("/d/b", 1), file("/d/c", 1));
		let mutations = diff(&[a.clone(), b.clone(), c], &[a, b]);
		assert!(matches!(
			mutations.as_slice(),
			[Mutation::Remove { index: 2, count: 1 }]
		));
	}
}
