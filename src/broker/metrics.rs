// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters covering every attestation exchange a broker initiated.
#[derive(Debug, Default)]
pub struct ExchangeMetrics {
	attempts: AtomicU64,
	successes: AtomicU64,
	failures: AtomicU64,
}
impl ExchangeMetrics {
	/// Exchanges started, deduplicated joiners excluded.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Exchanges that produced a token.
	pub fn successes(&self) -> u64 {
		self.successes.load(Ordering::Relaxed)
	}

	/// Exchanges that settled with an error.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.successes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failures.fetch_add(1, Ordering::Relaxed);
	}
}
