//! Persistence contract and built-in caches for App Check tokens.
//!
//! The cache is a best-effort side channel: the broker reads it once per application lifetime
//! during hydration and writes through after successful exchanges. Read failures degrade to
//! "absent" and write failures are logged, never surfaced to callers.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{AppCheckToken, AppId},
};

/// Boxed future returned by [`PersistentCache`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable token cache keyed by application identity.
///
/// One record per application; absence of a record is a valid, common state (first run, or an
/// invalidated token).
pub trait PersistentCache
where
	Self: Send + Sync,
{
	/// Fetches the persisted token for the application, if any.
	fn read<'a>(&'a self, app: &'a AppId) -> StoreFuture<'a, Option<AppCheckToken>>;

	/// Persists the token, or deletes the record when `token` is `None`.
	fn write<'a>(&'a self, app: &'a AppId, token: Option<&'a AppCheckToken>)
	-> StoreFuture<'a, ()>;
}

/// Error type produced by [`PersistentCache`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Persisted record layout: credential plus epoch-millisecond lifetime bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
	/// Raw credential string.
	pub token: String,
	/// Issued-at instant as epoch milliseconds.
	pub issued_at_time_millis: i64,
	/// Expiry instant as epoch milliseconds.
	pub expire_time_millis: i64,
}
impl From<&AppCheckToken> for CacheRecord {
	fn from(token: &AppCheckToken) -> Self {
		Self {
			token: token.token().to_owned(),
			issued_at_time_millis: token.issued_at_millis(),
			expire_time_millis: token.expire_time_millis(),
		}
	}
}
impl From<CacheRecord> for AppCheckToken {
	fn from(record: CacheRecord) -> Self {
		AppCheckToken::from_millis(
			record.token,
			record.issued_at_time_millis,
			record.expire_time_millis,
		)
	}
}
