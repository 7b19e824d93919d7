//! Thread-safe in-memory [`PersistentCache`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{AppCheckToken, AppId},
	store::{PersistentCache, StoreFuture},
};

type CacheMap = Arc<RwLock<HashMap<AppId, AppCheckToken>>>;

/// Keeps cached tokens in-process; contents vanish with the process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(CacheMap);
impl MemoryStore {
	/// Number of cached records; used by tests to observe write-through behavior.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no records are cached.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn read_now(map: CacheMap, app: AppId) -> Option<AppCheckToken> {
		map.read().get(&app).cloned()
	}

	fn write_now(map: CacheMap, app: AppId, token: Option<AppCheckToken>) {
		match token {
			Some(token) => {
				map.write().insert(app, token);
			},
			None => {
				map.write().remove(&app);
			},
		}
	}
}
impl PersistentCache for MemoryStore {
	fn read<'a>(&'a self, app: &'a AppId) -> StoreFuture<'a, Option<AppCheckToken>> {
		let map = self.0.clone();
		let app = app.to_owned();

		Box::pin(async move { Ok(Self::read_now(map, app)) })
	}

	fn write<'a>(
		&'a self,
		app: &'a AppId,
		token: Option<&'a AppCheckToken>,
	) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let app = app.to_owned();
		let token = token.cloned();

		Box::pin(async move {
			Self::write_now(map, app, token);

			Ok(())
		})
	}
}
