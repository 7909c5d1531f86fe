//! Platform event handlers.
//!
//! Each handler turns [`RawNotifyEvent`]s into [`Operation`]s, buffering whatever
//! the platform needs buffered until the next [`EventHandler::tick`].

use async_trait::async_trait;

use crate::{
	event::{Operation, RawNotifyEvent},
	Result,
};

mod generic;
mod linux;

pub use generic::GenericHandler;
pub use linux::LinuxHandler;

#[cfg(target_os = "linux")]
pub type PlatformHandler = LinuxHandler;

#[cfg(not(target_os = "linux"))]
pub type PlatformHandler = GenericHandler;

#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
	/// Translate one raw event; may return nothing while the handler waits for more context.
	async fn process(&self, event: RawNotifyEvent) -> Result<Vec<Operation>>;

	/// As handlers keep some inner state, this is called periodically so they can
	/// flush operations that are ready.
	async fn tick(&self) -> Result<Vec<Operation>>;

	async fn reset(&self);
}
