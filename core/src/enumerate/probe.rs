use std::path::{Path, PathBuf};

use crate::entry::FileKind;

/// Prefixes of locations that never support native change notification
const VIRTUAL_PREFIXES: [&str; 5] = [r"\\wsl$", r"\\wsl.localhost", r"\\?\usb", "ftp:", "mtp:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStrategy {
	/// Bulk enumeration through the OS directory API
	Native,
	/// Item-by-item enumeration through the storage provider
	StorageObjects { live_watch: bool },
}

pub trait CapabilityProbe: Send + Sync {
	fn probe(&self, path: &Path) -> WalkStrategy;
}

/// Decides the strategy from the shape of the path and the configured storage roots
#[derive(Debug, Default, Clone)]
pub struct PathCapabilityProbe {
	storage_roots: Vec<PathBuf>,
}

impl PathCapabilityProbe {
	pub fn new(storage_roots: Vec<PathBuf>) -> Self {
		Self { storage_roots }
	}
}

impl CapabilityProbe for PathCapabilityProbe {
	fn probe(&self, path: &Path) -> WalkStrategy {
		if is_virtual(path) || is_inside_archive(path) {
			return WalkStrategy::StorageObjects { live_watch: false };
		}

		if self.storage_roots.iter().any(|root| path.starts_with(root)) {
			return WalkStrategy::StorageObjects { live_watch: true };
		}

		WalkStrategy::Native
	}
}

fn is_virtual(path: &Path) -> bool {
	let raw = path.to_string_lossy().to_lowercase();
	raw.contains("://") || VIRTUAL_PREFIXES.iter().any(|prefix| raw.starts_with(prefix))
}

fn is_inside_archive(path: &Path) -> bool {
	path.ancestors().any(|ancestor| {
		ancestor
			.extension()
			.is_some_and(|ext| FileKind::from_extension(&ext.to_string_lossy()).is_archive())
			&& ancestor.is_file()
	})
}
