//! Listing a directory's immediate children.
//!
//! The walk strategy is chosen by a [`CapabilityProbe`]: the native walk for
//! ordinary local folders, the storage-object walk for provider-backed or
//! virtual locations. A native walk that is denied access is retried through
//! the storage provider before the load is reported as unauthorized.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use fm_utils::FileIOError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::{
	config::{EnumerationConfig, VisibilityConfig},
	entry::{EntryRef, EntryStat},
	error::{EnumerationError, LoadError},
};

mod native;
pub mod probe;
pub mod storage;

use probe::{CapabilityProbe, WalkStrategy};
use storage::StorageProvider;

/// Single-item metadata lookups, used when a change notification arrives
#[async_trait]
pub trait MetadataSource: Send + Sync {
	async fn stat(&self, path: &Path) -> Result<EntryStat, FileIOError>;
}

#[derive(Debug, Default)]
pub struct FsMetadataSource;

#[async_trait]
impl MetadataSource for FsMetadataSource {
	async fn stat(&self, path: &Path) -> Result<EntryStat, FileIOError> {
		let metadata = match tokio::fs::metadata(path).await {
			Ok(metadata) => metadata,
			Err(_) => tokio::fs::symlink_metadata(path)
				.await
				.map_err(|e| FileIOError::from((path, e)))?,
		};

		Ok(EntryStat::from_metadata(&metadata))
	}
}

#[derive(Debug, Clone)]
pub(crate) struct WalkSettings {
	pub batch_size: usize,
	pub progress_interval: Duration,
	pub handle_timeout: Duration,
	pub visibility: VisibilityConfig,
}

impl WalkSettings {
	pub fn new(config: &EnumerationConfig, visibility: VisibilityConfig) -> Self {
		Self {
			batch_size: config.batch_size.max(1),
			progress_interval: config.progress_interval(),
			handle_timeout: config.handle_timeout(),
			visibility,
		}
	}
}

#[derive(Debug, Default)]
pub(crate) struct WalkSummary {
	pub entries: usize,
	pub partial_failure: Option<FileIOError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumerationOutcome {
	FastNativeWalk,
	StorageObjectWalk { needs_watch_degraded: bool },
	Failed(LoadError),
}

#[derive(Debug)]
pub struct EnumerationReport {
	pub outcome: EnumerationOutcome,
	/// Visible entries handed over as chunks
	pub entries: usize,
	/// The walk stopped early; what was gathered before is still valid
	pub partial_failure: Option<FileIOError>,
}

impl EnumerationReport {
	fn failed(error: LoadError) -> Self {
		Self {
			outcome: EnumerationOutcome::Failed(error),
			entries: 0,
			partial_failure: None,
		}
	}

	fn from_summary(outcome: EnumerationOutcome, summary: WalkSummary) -> Self {
		Self {
			outcome,
			entries: summary.entries,
			partial_failure: summary.partial_failure,
		}
	}
}

/// Runs one directory enumeration, streaming entries in chunks
pub struct Enumerator {
	probe: Arc<dyn CapabilityProbe>,
	storage: Arc<dyn StorageProvider>,
	settings: WalkSettings,
}

impl Enumerator {
	pub(crate) fn new(
		probe: Arc<dyn CapabilityProbe>,
		storage: Arc<dyn StorageProvider>,
		settings: WalkSettings,
	) -> Self {
		Self {
			probe,
			storage,
			settings,
		}
	}

	#[instrument(skip(self, cancel, chunks_tx), fields(path = %path.display()))]
	pub async fn run(
		&self,
		path: &Path,
		cancel: &CancellationToken,
		chunks_tx: mpsc::Sender<Vec<EntryRef>>,
	) -> EnumerationReport {
		let report = match self.probe.probe(path) {
			WalkStrategy::Native => {
				let walked = native::walk(path, &self.settings, cancel, &chunks_tx).await;
				self.finish_native(walked, path, cancel, &chunks_tx).await
			}
			WalkStrategy::StorageObjects { live_watch } => {
				match storage::walk(&self.storage, path, &self.settings, cancel, &chunks_tx).await {
					Ok(summary) => EnumerationReport::from_summary(
						EnumerationOutcome::StorageObjectWalk {
							needs_watch_degraded: !live_watch,
						},
						summary,
					),
					Err(e) => EnumerationReport::failed(e.as_load_error()),
				}
			}
		};

		if let Some(e) = &report.partial_failure {
			warn!(?e, entries = report.entries, "Enumeration stopped early;");
		}

		report
	}

	async fn finish_native(
		&self,
		walked: Result<WalkSummary, EnumerationError>,
		path: &Path,
		cancel: &CancellationToken,
		chunks_tx: &mpsc::Sender<Vec<EntryRef>>,
	) -> EnumerationReport {
		match walked {
			Ok(summary) => {
				EnumerationReport::from_summary(EnumerationOutcome::FastNativeWalk, summary)
			}
			Err(e) if e.as_load_error() == LoadError::Unauthorized => {
				debug!(?e, "Native walk denied, falling back to storage objects;");
				self.storage_fallback(path, cancel, chunks_tx).await
			}
			Err(e) => EnumerationReport::failed(e.as_load_error()),
		}
	}

	async fn storage_fallback(
		&self,
		path: &Path,
		cancel: &CancellationToken,
		chunks_tx: &mpsc::Sender<Vec<EntryRef>>,
	) -> EnumerationReport {
		match storage::walk(&self.storage, path, &self.settings, cancel, chunks_tx).await {
			// Nothing visible through either API means we really are locked out
			Ok(summary) if summary.entries == 0 => {
				EnumerationReport::failed(LoadError::Unauthorized)
			}
			Ok(summary) => EnumerationReport::from_summary(
				EnumerationOutcome::StorageObjectWalk {
					needs_watch_degraded: false,
				},
				summary,
			),
			Err(e) => {
				debug!(?e, "Storage object fallback failed;");
				EnumerationReport::failed(LoadError::Unauthorized)
			}
		}
	}
}
