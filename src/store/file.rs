//! Simple file-backed [`PersistentCache`] for desktop and CLI hosts.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{AppCheckToken, AppId},
	store::{CacheRecord, PersistentCache, StoreError, StoreFuture},
};

/// Persists cached tokens to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<HashMap<AppId, CacheRecord>>>,
}
impl FileStore {
	/// Opens (or creates) a cache at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = if path.exists() { Self::load_snapshot(&path)? } else { HashMap::new() };

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	fn load_snapshot(path: &Path) -> Result<HashMap<AppId, CacheRecord>, StoreError> {
		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(HashMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;
		let entries: Vec<(AppId, CacheRecord)> =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(entries.into_iter().collect())
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create cache directory {}: {e}", parent.display()),
			})?;
		}
		Ok(())
	}

	fn persist_locked(&self, contents: &HashMap<AppId, CacheRecord>) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let snapshot: Vec<_> = contents.iter().collect();
		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize cache snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl PersistentCache for FileStore {
	fn read<'a>(&'a self, app: &'a AppId) -> StoreFuture<'a, Option<AppCheckToken>> {
		Box::pin(async move {
			Ok(self.inner.read().get(app).cloned().map(AppCheckToken::from))
		})
	}

	fn write<'a>(
		&'a self,
		app: &'a AppId,
		token: Option<&'a AppCheckToken>,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			match token {
				Some(token) => {
					guard.insert(app.clone(), CacheRecord::from(token));
				},
				None => {
					guard.remove(app);
				},
			}

			self.persist_locked(&guard)?;

			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"appcheck_broker_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn build_token() -> (AppId, AppCheckToken) {
		let app = AppId::new("app-file-store").expect("Failed to build app identifier fixture.");
		let issued = OffsetDateTime::now_utc();
		let token = AppCheckToken::new("cached-credential", issued, issued + Duration::hours(1));

		(app, token)
	}

	#[test]
	fn write_and_reload_round_trip() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file cache snapshot.");
		let (app, token) = build_token();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file cache test.");

		rt.block_on(store.write(&app, Some(&token)))
			.expect("Failed to write fixture token to file cache.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file cache snapshot.");
		let fetched = rt
			.block_on(reopened.read(&app))
			.expect("Failed to read fixture token from file cache.")
			.expect("File cache lost the record after reopen.");

		assert_eq!(fetched.token(), token.token());
		assert_eq!(fetched.expire_time_millis(), token.expire_time_millis());

		rt.block_on(reopened.write(&app, None))
			.expect("Failed to delete fixture token from file cache.");

		assert!(
			rt.block_on(reopened.read(&app))
				.expect("Failed to re-read file cache after deletion.")
				.is_none()
		);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary cache snapshot {}: {e}", path.display())
		});
	}
}
