//! Change watching for a single directory.
//!
//! Raw notifications from the OS are translated into [`Operation`]s by a platform
//! [`EventHandler`] and forwarded to whoever owns the receiving end of the channel
//! passed to [`DirectoryWatcher::start`].

pub mod backend;
pub mod error;
pub mod event;
pub mod platform;
pub mod watcher;

pub use backend::{NotifyBackend, WatchBackend, WatchHandle};
pub use error::WatcherError;
pub use event::{Operation, RawEventKind, RawNotifyEvent, RenamePart};
pub use platform::{EventHandler, GenericHandler, LinuxHandler, PlatformHandler};
pub use watcher::{DirectoryWatcher, WatchMode};

pub type Result<T> = std::result::Result<T, WatcherError>;
