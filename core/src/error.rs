use std::io;

use fm_utils::FileIOError;
use serde::Serialize;
use thiserror::Error;

/// Why a directory could not be loaded
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum LoadError {
	#[error("directory not found")]
	NotFound,
	#[error("access to the directory was denied")]
	Unauthorized,
	#[error("the device holding the directory is unavailable")]
	DeviceUnavailable,
	#[error("timed out while opening the directory")]
	Timeout,
	/// Another load started before this one finished; not reported to the user
	#[error("load was superseded by a newer one")]
	Superseded,
}

impl LoadError {
	pub fn from_io_kind(kind: io::ErrorKind, raw_os_error: Option<i32>) -> Self {
		match kind {
			io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => Self::NotFound,
			io::ErrorKind::PermissionDenied => Self::Unauthorized,
			io::ErrorKind::TimedOut => Self::Timeout,
			_ if is_missing_directory(raw_os_error) => Self::NotFound,
			_ => Self::DeviceUnavailable,
		}
	}

	/// Whether a notification should be shown for this failure
	pub fn is_reportable(&self) -> bool {
		!matches!(self, Self::Superseded)
	}
}

impl From<&FileIOError> for LoadError {
	fn from(e: &FileIOError) -> Self {
		Self::from_io_kind(e.kind(), e.raw_os_error())
	}
}

#[cfg(unix)]
fn is_missing_directory(raw_os_error: Option<i32>) -> bool {
	matches!(raw_os_error, Some(libc::ENOTDIR) | Some(libc::ENOENT))
}

#[cfg(not(unix))]
fn is_missing_directory(_raw_os_error: Option<i32>) -> bool {
	false
}

#[derive(Debug, Error)]
pub enum EnumerationError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("enumeration task failed: {0}")]
	TaskJoin(#[from] tokio::task::JoinError),
	#[error("timed out acquiring directory handle")]
	HandleTimeout,
}

impl EnumerationError {
	pub fn as_load_error(&self) -> LoadError {
		match self {
			Self::FileIO(e) => e.into(),
			Self::TaskJoin(_) => LoadError::DeviceUnavailable,
			Self::HandleTimeout => LoadError::Timeout,
		}
	}
}
