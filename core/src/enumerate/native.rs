use std::{fs, mem, path::Path, sync::Arc};

use fm_utils::FileIOError;
use tokio::{sync::mpsc, task::spawn_blocking, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::{WalkSettings, WalkSummary};
use crate::{
	entry::{Entry, EntryRef, EntryStat},
	error::EnumerationError,
	sampler::IntervalSampler,
};

/// Bulk walk through the OS directory API.
///
/// Acquiring the directory handle is bounded by the configured timeout. Errors
/// while iterating keep what was gathered so far and are reported as a partial
/// failure.
pub(super) async fn walk(
	path: &Path,
	settings: &WalkSettings,
	cancel: &CancellationToken,
	chunks_tx: &mpsc::Sender<Vec<EntryRef>>,
) -> Result<WalkSummary, EnumerationError> {
	let read_dir = {
		let path = path.to_path_buf();
		match timeout(
			settings.handle_timeout,
			spawn_blocking(move || {
				fs::read_dir(&path).map_err(|e| FileIOError::from((path.as_path(), e)))
			}),
		)
		.await
		{
			Ok(joined) => joined??,
			Err(_) => return Err(EnumerationError::HandleTimeout),
		}
	};

	let path = path.to_path_buf();
	let settings = settings.clone();
	let cancel = cancel.clone();
	let chunks_tx = chunks_tx.clone();

	spawn_blocking(move || {
		let mut summary = WalkSummary::default();
		let mut sampler = IntervalSampler::new(settings.progress_interval);
		let mut batch = Vec::with_capacity(settings.batch_size);

		for dir_entry in read_dir {
			if cancel.is_cancelled() {
				trace!("Native walk cancelled");
				return summary;
			}

			let dir_entry = match dir_entry {
				Ok(dir_entry) => dir_entry,
				Err(e) => {
					summary.partial_failure = Some(FileIOError::from_std_io_err_with_msg(
						&path,
						e,
						"iterating directory",
					));
					break;
				}
			};

			let entry_path = dir_entry.path();
			let Some(stat) = stat(&entry_path) else {
				continue;
			};

			let entry = Entry::new(entry_path, stat);
			if !settings
				.visibility
				.allows(entry.is_hidden(), entry.is_system(), entry.is_dot_file())
			{
				continue;
			}

			batch.push(Arc::new(entry));
			summary.entries += 1;

			if (batch.len() >= settings.batch_size || sampler.check_now())
				&& chunks_tx.blocking_send(mem::take(&mut batch)).is_err()
			{
				trace!("Chunk receiver dropped, stopping native walk");
				return summary;
			}
		}

		if !batch.is_empty() && chunks_tx.blocking_send(batch).is_err() {
			trace!("Chunk receiver dropped before the last chunk");
		}

		summary
	})
	.await
	.map_err(Into::into)
}

/// Follows symlinks, falling back to the link itself when the target is gone
fn stat(path: &Path) -> Option<EntryStat> {
	match fs::metadata(path).or_else(|_| fs::symlink_metadata(path)) {
		Ok(metadata) => Some(EntryStat::from_metadata(&metadata)),
		Err(e) => {
			warn!(?e, path = %path.display(), "Skipping entry with unreadable metadata;");
			None
		}
	}
}
