//! App Check token value type and the never-fails token result.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
// self
use crate::_prelude::*;

/// Short-lived signed credential proving request authenticity for one application instance.
///
/// Immutable once constructed; the broker replaces whole tokens instead of mutating them.
#[derive(Clone, PartialEq, Eq)]
pub struct AppCheckToken {
	token: String,
	issued_at: OffsetDateTime,
	expires_at: OffsetDateTime,
}
impl AppCheckToken {
	/// Constructs a token from its credential string and lifetime instants.
	pub fn new(
		token: impl Into<String>,
		issued_at: OffsetDateTime,
		expires_at: OffsetDateTime,
	) -> Self {
		Self { token: token.into(), issued_at, expires_at }
	}

	/// Constructs a token from epoch-millisecond instants.
	///
	/// Out-of-range instants are clamped to the representable range instead of failing;
	/// persisted records never round-trip through this path with such values.
	pub fn from_millis(
		token: impl Into<String>,
		issued_at_millis: i64,
		expire_time_millis: i64,
	) -> Self {
		Self::new(
			token,
			datetime_from_millis(issued_at_millis),
			datetime_from_millis(expire_time_millis),
		)
	}

	/// Raw credential string callers attach to outbound requests.
	pub fn token(&self) -> &str {
		&self.token
	}

	/// Instant the backend issued the token.
	pub fn issued_at(&self) -> OffsetDateTime {
		self.issued_at
	}

	/// Instant the token stops being accepted.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.expires_at
	}

	/// Issued-at instant as epoch milliseconds.
	pub fn issued_at_millis(&self) -> i64 {
		millis_of(self.issued_at)
	}

	/// Expiry instant as epoch milliseconds.
	pub fn expire_time_millis(&self) -> i64 {
		millis_of(self.expires_at)
	}

	/// Returns `true` while the token has remaining lifetime at `now`.
	pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
		self.expires_at > now
	}

	/// Returns `true` while the token has remaining lifetime on the current clock.
	pub fn is_valid(&self) -> bool {
		self.is_valid_at(OffsetDateTime::now_utc())
	}
}
impl Debug for AppCheckToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AppCheckToken")
			.field("token", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Result of a token request; always carries *a* token string.
///
/// When `error` is set, `token` holds the fixed dummy encoding from [`format_dummy_token`] so
/// downstream consumers can attach something to their requests without branching on success.
#[derive(Clone, Debug)]
pub struct TokenResult {
	/// Credential string to attach to outbound requests.
	pub token: String,
	/// Failure that degraded this result, when the broker could not produce a real token.
	pub error: Option<Arc<Error>>,
}
impl TokenResult {
	/// Builds a successful result carrying a real token.
	pub fn ok(token: impl Into<String>) -> Self {
		Self { token: token.into(), error: None }
	}

	/// Builds a degraded result carrying the dummy token and the underlying failure.
	pub fn degraded(error: Arc<Error>) -> Self {
		Self { token: format_dummy_token(), error: Some(error) }
	}

	/// Returns `true` when the result carries a real token.
	pub fn is_ok(&self) -> bool {
		self.error.is_none()
	}
}
impl From<&AppCheckToken> for TokenResult {
	fn from(token: &AppCheckToken) -> Self {
		Self::ok(token.token())
	}
}

/// Encodes the fixed dummy token: standard base64 of the constant error payload.
///
/// The payload shape is shared across platforms; keep it stable.
pub fn format_dummy_token() -> String {
	let payload = serde_json::json!({ "error": "UNKNOWN_ERROR" });

	STANDARD.encode(payload.to_string())
}

fn millis_of(instant: OffsetDateTime) -> i64 {
	(instant.unix_timestamp_nanos() / 1_000_000) as i64
}

fn datetime_from_millis(millis: i64) -> OffsetDateTime {
	OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
		.unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
