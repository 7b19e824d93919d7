//! Proactive refresh scheduler that keeps tokens fresh ahead of expiry.
//!
//! One [`Refresher`] exists per application while listeners are registered. It runs a single
//! scheduled operation at a time: after a success the next attempt lands shortly before the
//! token expires, after a failure it retries on an exponential-with-jitter schedule bounded
//! by [`RETRIAL_MIN_WAIT`] and [`RETRIAL_MAX_WAIT`]. Stopping cancels the pending wait but
//! never an exchange already in flight; the broker's exchange task completes and caches its
//! result independently.

// crates.io
use rand::rng;
use tokio::{task::JoinHandle, time::sleep};
// self
use crate::{_prelude::*, backoff};

/// Safety margin subtracted from the token expiry when scheduling the next refresh.
pub const REFRESH_OFFSET: Duration = Duration::minutes(5);
/// Floor of the failure-retry schedule.
pub const RETRIAL_MIN_WAIT: Duration = Duration::seconds(30);
/// Ceiling of the failure-retry schedule.
pub const RETRIAL_MAX_WAIT: Duration = Duration::minutes(16);

/// Boxed future produced by one scheduled refresh attempt.
pub type OperationFuture = Pin<Box<dyn Future<Output = Result<(), Arc<Error>>> + Send>>;
/// Factory invoked once per scheduled attempt.
pub type Operation = Arc<dyn Fn() -> OperationFuture + Send + Sync>;
/// Computes the delay before the next attempt after a success.
pub type NextDelay = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Cancellable scheduler driving repeated refresh operations.
#[derive(Clone)]
pub struct Refresher {
	inner: Arc<RefresherInner>,
}
struct RefresherInner {
	operation: Operation,
	next_delay: NextDelay,
	retry_min: Duration,
	retry_max: Duration,
	task: Mutex<Option<JoinHandle<()>>>,
}
impl Refresher {
	/// Creates a stopped refresher around the provided operation and schedule.
	pub fn new(
		operation: Operation,
		next_delay: NextDelay,
		retry_min: Duration,
		retry_max: Duration,
	) -> Self {
		Self {
			inner: Arc::new(RefresherInner {
				operation,
				next_delay,
				retry_min,
				retry_max,
				task: Mutex::new(None),
			}),
		}
	}

	/// Starts the schedule, running the first operation immediately. Idempotent.
	pub fn start(&self) {
		let mut task = self.inner.task.lock();

		if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
			return;
		}

		let operation = self.inner.operation.clone();
		let next_delay = self.inner.next_delay.clone();
		let retry_min = self.inner.retry_min;
		let retry_max = self.inner.retry_max;

		*task = Some(tokio::spawn(run_schedule(operation, next_delay, retry_min, retry_max)));
	}

	/// Cancels any pending scheduled operation. Idempotent.
	pub fn stop(&self) {
		if let Some(handle) = self.inner.task.lock().take() {
			handle.abort();
		}
	}

	/// Returns `true` while a schedule is armed.
	pub fn is_running(&self) -> bool {
		self.inner.task.lock().as_ref().is_some_and(|handle| !handle.is_finished())
	}
}
impl Drop for RefresherInner {
	fn drop(&mut self) {
		if let Some(handle) = self.task.lock().take() {
			handle.abort();
		}
	}
}
impl Debug for Refresher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Refresher").field("running", &self.is_running()).finish()
	}
}

async fn run_schedule(
	operation: Operation,
	next_delay: NextDelay,
	retry_min: Duration,
	retry_max: Duration,
) {
	let mut failures: u32 = 0;
	// The first operation runs immediately after `start`.
	let mut delay = Duration::ZERO;

	loop {
		sleep(wait_of(delay)).await;

		// Operations never overlap; the next wait is armed only after this one settles.
		match (operation)().await {
			Ok(()) => {
				failures = 0;
				delay = (next_delay)();
			},
			Err(_) => {
				let jitter = backoff::unit_jitter(&mut rng());

				delay = backoff::backoff_delay(failures, retry_min, backoff::BACKOFF_FACTOR, jitter)
					.clamp(retry_min, retry_max);
				failures = failures.saturating_add(1);
			},
		}
	}
}

fn wait_of(delay: Duration) -> std::time::Duration {
	if delay.is_negative() { std::time::Duration::ZERO } else { delay.unsigned_abs() }
}
