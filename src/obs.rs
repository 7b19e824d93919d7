//! Optional observability helpers for broker operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `appcheck_broker.op` with the `op`
//!   (operation) and `stage` (call site) fields, plus warn/error events on degraded paths.
//! - Enable `metrics` to increment the `appcheck_broker_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Broker operations observed by spans and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Cached/deduplicated token acquisition.
	GetToken,
	/// Cache-bypassing limited-use token acquisition.
	LimitedUseToken,
	/// Proactive refresh operation driven by the scheduler.
	Refresh,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::GetToken => "get_token",
			OpKind::LimitedUseToken => "limited_use_token",
			OpKind::Refresh => "refresh",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to a broker operation.
	Attempt,
	/// The operation produced a real token.
	Success,
	/// The operation degraded to the dummy token or an error.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Logs a failed exchange: throttled rejections are expected and warn-level, everything
/// else is error-level.
pub(crate) fn log_exchange_failure(error: &Error) {
	#[cfg(feature = "tracing")]
	{
		if error.is_throttled() {
			::tracing::warn!(error = %error, "Token exchange throttled.");
		} else {
			::tracing::error!(error = %error, "Token exchange failed.");
		}
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = error;
	}
}

/// Logs a best-effort persistence failure; never surfaced to callers.
pub(crate) fn log_store_failure(stage: &'static str, error: &crate::store::StoreError) {
	#[cfg(feature = "tracing")]
	{
		::tracing::warn!(stage, error = %error, "Persistent cache operation failed.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (stage, error);
	}
}
