use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
	#[error("notify backend error: {0}")]
	Notify(#[from] notify::Error),
	#[error("path <path='{}'> can't be watched: {reason}", .path.display())]
	Unsupported { path: PathBuf, reason: String },
	#[error("operations channel closed")]
	ChannelClosed,
}

impl WatcherError {
	pub fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
		Self::Unsupported {
			path: path.into(),
			reason: reason.into(),
		}
	}
}
