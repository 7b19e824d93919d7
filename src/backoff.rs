//! Pure backoff computations consumed by attestation providers around exchange attempts.
//!
//! The functions take every time- and randomness-dependent input as a parameter so callers
//! (and tests) control both the clock and the jitter source.

// self
use crate::_prelude::*;

/// Base delay for the exponential backoff series.
pub const BASE_INTERVAL: Duration = Duration::seconds(1);
/// Growth factor applied per accumulated failure.
pub const BACKOFF_FACTOR: f64 = 2.0;
/// Share of the computed delay that jitter may add on top.
pub const RANDOM_FACTOR: f64 = 0.5;
/// Lock-out window applied after a non-retriable exchange rejection.
pub const ONE_DAY: Duration = Duration::hours(24);
/// Exponent cap keeping the computed delay inside the representable date range.
pub const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Client-side throttle window produced after a failed exchange attempt.
///
/// Owned by the provider that failed; surfaced on broker state only for observability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleData {
	/// Instant after which new exchange attempts are allowed again.
	pub allow_requests_after: OffsetDateTime,
	/// Number of consecutive failed attempts accumulated so far.
	pub backoff_count: u32,
	/// HTTP status of the most recent failed attempt.
	pub http_status: u16,
}

/// Fails fast with [`Error::Throttled`] while `now` is inside the throttle window.
///
/// No network call may be made while this returns an error.
pub fn throw_if_throttled(throttle: Option<&ThrottleData>, now: OffsetDateTime) -> Result<()> {
	if let Some(data) = throttle
		&& now < data.allow_requests_after
	{
		return Err(Error::Throttled {
			retry_after: data.allow_requests_after - now,
			http_status: data.http_status,
		});
	}

	Ok(())
}

/// Computes the throttle window that follows a failed exchange attempt.
///
/// `403`/`404` are non-retriable (bad key, deleted project, failed attestation check) and lock
/// the provider out for a full day. Every other status backs off exponentially from the
/// previous window's count. `jitter_unit` must come from a uniform `[0, 1)` source; pass a
/// fixed value for deterministic tests.
pub fn set_backoff(
	http_status: u16,
	previous: Option<&ThrottleData>,
	now: OffsetDateTime,
	jitter_unit: f64,
) -> ThrottleData {
	match http_status {
		403 | 404 => ThrottleData {
			allow_requests_after: now + ONE_DAY,
			backoff_count: 1,
			http_status,
		},
		_ => {
			let count = previous.map(|data| data.backoff_count).unwrap_or(0);
			let delay = backoff_delay(count, BASE_INTERVAL, BACKOFF_FACTOR, jitter_unit);

			ThrottleData {
				allow_requests_after: now + delay,
				backoff_count: count.saturating_add(1),
				http_status,
			}
		},
	}
}

/// Pure exponential delay: `base × factor^count`, inflated by up to
/// [`RANDOM_FACTOR`] × `jitter_unit`.
///
/// `jitter_unit` is clamped to `[0, 1]` so the series stays bounded below by the
/// un-jittered delay. The exponent saturates at [`MAX_BACKOFF_EXPONENT`] so the delay stays
/// finite and addable to any clock reading.
pub fn backoff_delay(
	backoff_count: u32,
	base: Duration,
	factor: f64,
	jitter_unit: f64,
) -> Duration {
	let base_millis = base.whole_milliseconds() as f64;
	let raw = base_millis * factor.powi(backoff_count.min(MAX_BACKOFF_EXPONENT) as i32);
	let jittered = raw * (1.0 + RANDOM_FACTOR * jitter_unit.clamp(0.0, 1.0));

	Duration::milliseconds(jittered as i64)
}

/// Draws a jitter sample in `[0, 1)` from the provided randomness source.
pub fn unit_jitter(rng: &mut impl rand::Rng) -> f64 {
	rng.random::<f64>()
}
