//! Live directory model for a file manager.
//!
//! [`LiveDirectory`] enumerates a folder, keeps the listing in sync with
//! changes reported by the OS and publishes an ordered, optionally grouped view
//! that is updated with minimal mutations. Expensive attributes (thumbnails,
//! sync status, tags) are filled in asynchronously by the enricher.

pub mod collaborators;
pub mod config;
pub mod entry;
pub mod enrich;
pub mod enumerate;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod processor;
pub mod published;
pub mod reconcile;
pub mod sampler;
pub mod sort;
pub mod staging;

pub use collaborators::Collaborators;
pub use config::LiveDirectoryConfig;
pub use entry::{Entry, EntryId, EntryRef, FileKind, SyncStatus};
pub use enumerate::EnumerationOutcome;
pub use error::LoadError;
pub use events::{CollectionChange, DirectoryEvent, EventSubscriber};
pub use model::{LiveDirectory, LoadSummary};
pub use reconcile::Mutation;
pub use sort::{
	group::{DateUnit, GroupOption, GroupOptions},
	SortDirection, SortKey, SortOptions,
};

pub use fm_fs_watcher::{NotifyBackend, Operation, WatchBackend, WatchMode};
