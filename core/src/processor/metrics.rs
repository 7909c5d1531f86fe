//! Counters for the operation processor

use std::{
	path::Path,
	sync::atomic::{AtomicU64, Ordering},
	time::Duration,
};

use serde::Serialize;
use tracing::info;

#[derive(Debug, Default)]
pub struct ProcessorMetrics {
	/// Operations received from the watcher
	pub events_processed: AtomicU64,
	/// Modifications folded into an already pending update
	pub events_coalesced: AtomicU64,
	/// Entries added to or removed from the listing
	pub structural_edits: AtomicU64,
	/// Single-item metadata lookups after a modification
	pub refetches: AtomicU64,
	/// Reconciliation passes started by the processor
	pub publications: AtomicU64,
	pub batches_processed: AtomicU64,
	pub total_batch_size: AtomicU64,
	pub queue_depth: AtomicU64,
	pub max_queue_depth: AtomicU64,
	pub last_batch_duration: AtomicU64,
	pub max_batch_duration: AtomicU64,
}

/// Point-in-time copy of [`ProcessorMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
	pub events_processed: u64,
	pub events_coalesced: u64,
	pub structural_edits: u64,
	pub refetches: u64,
	pub publications: u64,
	pub batches_processed: u64,
	pub max_queue_depth: u64,
	pub max_batch_duration_ms: u64,
}

impl ProcessorMetrics {
	pub fn record_event_processed(&self) {
		self.events_processed.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_event_coalesced(&self) {
		self.events_coalesced.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_structural_edit(&self) {
		self.structural_edits.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_refetch(&self) {
		self.refetches.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_publication(&self) {
		self.publications.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_batch_processed(&self, batch_size: usize, duration: Duration) {
		self.batches_processed.fetch_add(1, Ordering::Relaxed);
		self.total_batch_size
			.fetch_add(batch_size as u64, Ordering::Relaxed);

		let duration_ms = duration.as_millis() as u64;
		self.last_batch_duration.store(duration_ms, Ordering::Relaxed);
		store_max(&self.max_batch_duration, duration_ms);
	}

	pub fn update_queue_depth(&self, depth: usize) {
		let depth = depth as u64;
		self.queue_depth.store(depth, Ordering::Relaxed);
		store_max(&self.max_queue_depth, depth);
	}

	pub fn average_batch_size(&self) -> f64 {
		let batches = self.batches_processed.load(Ordering::Relaxed);
		if batches == 0 {
			0.0
		} else {
			self.total_batch_size.load(Ordering::Relaxed) as f64 / batches as f64
		}
	}

	/// Percentage of received operations that were coalesced
	pub fn coalescing_rate(&self) -> f64 {
		let processed = self.events_processed.load(Ordering::Relaxed);
		if processed == 0 {
			0.0
		} else {
			(self.events_coalesced.load(Ordering::Relaxed) as f64 / processed as f64) * 100.0
		}
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			events_processed: self.events_processed.load(Ordering::Relaxed),
			events_coalesced: self.events_coalesced.load(Ordering::Relaxed),
			structural_edits: self.structural_edits.load(Ordering::Relaxed),
			refetches: self.refetches.load(Ordering::Relaxed),
			publications: self.publications.load(Ordering::Relaxed),
			batches_processed: self.batches_processed.load(Ordering::Relaxed),
			max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
			max_batch_duration_ms: self.max_batch_duration.load(Ordering::Relaxed),
		}
	}

	pub fn log_metrics(&self, path: &Path) {
		info!(
			"Directory {} metrics: processed={}, coalesced={}, edits={}, refetches={}, publications={}, avg_batch_size={:.2}, coalescing_rate={:.2}%, max_queue_depth={}, max_batch_duration={}ms",
			path.display(),
			self.events_processed.load(Ordering::Relaxed),
			self.events_coalesced.load(Ordering::Relaxed),
			self.structural_edits.load(Ordering::Relaxed),
			self.refetches.load(Ordering::Relaxed),
			self.publications.load(Ordering::Relaxed),
			self.average_batch_size(),
			self.coalescing_rate(),
			self.max_queue_depth.load(Ordering::Relaxed),
			self.max_batch_duration.load(Ordering::Relaxed)
		);
	}
}

fn store_max(slot: &AtomicU64, value: u64) {
	let mut current_max = slot.load(Ordering::Relaxed);
	while value > current_max {
		match slot.compare_exchange_weak(current_max, value, Ordering::Relaxed, Ordering::Relaxed) {
			Ok(_) => break,
			Err(val) => current_max = val,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn batches_and_maxima() {
		let metrics = ProcessorMetrics::default();

		metrics.record_batch_processed(10, Duration::from_millis(50));
		metrics.record_batch_processed(20, Duration::from_millis(10));
		metrics.update_queue_depth(7);
		metrics.update_queue_depth(2);

		let snapshot = metrics.snapshot();
		assert_eq!(snapshot.batches_processed, 2);
		assert_eq!(snapshot.max_batch_duration_ms, 50);
		assert_eq!(snapshot.max_queue_depth, 7);
		assert_eq!(metrics.average_batch_size(), 15.0);
	}

	#[test]
	fn coalescing_rate() {
		let metrics = ProcessorMetrics::default();

		for _ in 0..10 {
			metrics.record_event_processed();
		}
		for _ in 0..3 {
			metrics.record_event_coalesced();
		}

		assert_eq!(metrics.coalescing_rate(), 30.0);
	}
}
