//! Item-by-item enumeration through a storage provider, used for locations the
//! native walk can't handle and as a fallback when it is denied access.

use std::{
	mem,
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use fm_utils::FileIOError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{WalkSettings, WalkSummary};
use crate::{
	entry::{Entry, EntryRef, EntryStat},
	error::EnumerationError,
	sampler::IntervalSampler,
};

#[derive(Debug, Clone)]
pub struct StorageItem {
	pub path: PathBuf,
	pub stat: EntryStat,
}

/// What a provider managed to list
#[derive(Debug, Default)]
pub struct StorageListing {
	pub items: Vec<StorageItem>,
	/// Listing stopped early; `items` holds everything gathered before
	pub partial_failure: Option<FileIOError>,
}

impl From<Vec<StorageItem>> for StorageListing {
	fn from(items: Vec<StorageItem>) -> Self {
		Self {
			items,
			partial_failure: None,
		}
	}
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
	/// Fails only when the location can't be listed at all
	async fn list(&self, path: &Path) -> Result<StorageListing, FileIOError>;
}

/// Lists through the async filesystem API
#[derive(Debug, Default)]
pub struct LocalStorageProvider;

#[async_trait]
impl StorageProvider for LocalStorageProvider {
	async fn list(&self, path: &Path) -> Result<StorageListing, FileIOError> {
		let mut read_dir = tokio::fs::read_dir(path)
			.await
			.map_err(|e| FileIOError::from((path, e)))?;

		let mut listing = StorageListing::default();
		loop {
			let dir_entry = match read_dir.next_entry().await {
				Ok(Some(dir_entry)) => dir_entry,
				Ok(None) => break,
				Err(e) => {
					listing.partial_failure = Some(FileIOError::from_std_io_err_with_msg(
						path,
						e,
						"listing storage items",
					));
					break;
				}
			};

			let item_path = dir_entry.path();
			match dir_entry.metadata().await {
				Ok(metadata) => listing.items.push(StorageItem {
					stat: EntryStat::from_metadata(&metadata),
					path: item_path,
				}),
				Err(e) => trace!(?e, path = %item_path.display(), "Skipping vanished item;"),
			}
		}

		Ok(listing)
	}
}

pub(super) async fn walk(
	provider: &Arc<dyn StorageProvider>,
	path: &Path,
	settings: &WalkSettings,
	cancel: &CancellationToken,
	chunks_tx: &mpsc::Sender<Vec<EntryRef>>,
) -> Result<WalkSummary, EnumerationError> {
	let StorageListing {
		items,
		partial_failure,
	} = tokio::select! {
		() = cancel.cancelled() => return Ok(WalkSummary::default()),
		listing = provider.list(path) => listing?,
	};

	let mut summary = WalkSummary {
		partial_failure,
		..Default::default()
	};
	let mut sampler = IntervalSampler::new(settings.progress_interval);
	let mut batch = Vec::with_capacity(settings.batch_size);

	for StorageItem { path, stat } in items {
		if cancel.is_cancelled() {
			break;
		}

		let entry = Entry::new(path, stat);
		if !settings
			.visibility
			.allows(entry.is_hidden(), entry.is_system(), entry.is_dot_file())
		{
			continue;
		}

		batch.push(Arc::new(entry));
		summary.entries += 1;

		if (batch.len() >= settings.batch_size || sampler.check_now())
			&& chunks_tx.send(mem::take(&mut batch)).await.is_err()
		{
			trace!("Chunk receiver dropped, stopping storage walk");
			return Ok(summary);
		}
	}

	if !batch.is_empty() && chunks_tx.send(batch).await.is_err() {
		trace!("Chunk receiver dropped before the last chunk");
	}

	Ok(summary)
}
