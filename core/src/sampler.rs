use std::time::Duration;

use tokio::time::Instant;

/// Lets an action through at most once per interval
#[derive(Debug)]
pub struct IntervalSampler {
	interval: Duration,
	last: Instant,
}

impl IntervalSampler {
	pub fn new(interval: Duration) -> Self {
		Self {
			interval,
			last: Instant::now(),
		}
	}

	pub fn check_now(&mut self) -> bool {
		let now = Instant::now();
		if now.duration_since(self.last) >= self.interval {
			self.last = now;
			true
		} else {
			false
		}
	}
}
