//! Typed change operations and the raw notification shape they come from.
//!
//! [`RawNotifyEvent`] is the only place that knows about `notify`'s event
//! representation; everything downstream works with [`Operation`].

use std::{
	path::{Path, PathBuf},
	time::SystemTime,
};

use notify::{
	event::{AccessKind, AccessMode, ModifyKind, RenameMode},
	Event, EventKind,
};
use serde::{Deserialize, Serialize};

/// A single change observed in a watched directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
	Added(PathBuf),
	Removed(PathBuf),
	Modified(PathBuf),
	RenamedFrom(PathBuf),
	RenamedTo(PathBuf),
}

impl Operation {
	pub fn path(&self) -> &Path {
		match self {
			Self::Added(path)
			| Self::Removed(path)
			| Self::Modified(path)
			| Self::RenamedFrom(path)
			| Self::RenamedTo(path) => path,
		}
	}

	/// Whether the operation changes membership of the listing, as opposed to
	/// only the attributes of an entry already in it.
	pub fn is_structural(&self) -> bool {
		!matches!(self, Self::Modified(_))
	}
}

/// Which half of a rename a raw event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenamePart {
	/// Both paths present, `[from, to]`
	Both,
	From,
	To,
	/// The backend couldn't tell; resolved by probing the path
	Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEventKind {
	Create,
	Remove,
	Modify,
	Rename(RenamePart),
	Other(String),
}

#[derive(Debug, Clone)]
pub struct RawNotifyEvent {
	pub kind: RawEventKind,
	pub paths: Vec<PathBuf>,
	pub timestamp: SystemTime,
}

impl RawNotifyEvent {
	pub fn new(kind: RawEventKind, paths: Vec<PathBuf>) -> Self {
		Self {
			kind,
			paths,
			timestamp: SystemTime::now(),
		}
	}

	pub fn primary_path(&self) -> Option<&PathBuf> {
		self.paths.first()
	}
}

impl From<Event> for RawNotifyEvent {
	fn from(event: Event) -> Self {
		let kind = match event.kind {
			EventKind::Create(_) => RawEventKind::Create,
			EventKind::Remove(_) => RawEventKind::Remove,
			EventKind::Modify(ModifyKind::Name(mode)) => RawEventKind::Rename(match mode {
				RenameMode::Both => RenamePart::Both,
				RenameMode::From => RenamePart::From,
				RenameMode::To => RenamePart::To,
				RenameMode::Any | RenameMode::Other => RenamePart::Unknown,
			}),
			EventKind::Modify(_) => RawEventKind::Modify,
			// A file closed after being opened for writing was updated
			EventKind::Access(AccessKind::Close(AccessMode::Write)) => RawEventKind::Modify,
			other => RawEventKind::Other(format!("{other:?}")),
		};

		Self {
			kind,
			paths: event.paths,
			timestamp: SystemTime::now(),
		}
	}
}
