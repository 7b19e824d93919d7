//! Token broker orchestration.
//!
//! [`TokenBroker`] owns the per-application [`TokenStore`], the persistent cache, the wire
//! exchange client, and the debug-mode switch. Applications are registered once through
//! [`TokenBroker::activate`]; every later operation resolves its [`AppCheckState`] from the
//! store and fails with [`ActivationError::UseBeforeActivation`] when none exists.
//!
//! All operations must run inside a Tokio runtime; hydration, exchanges, and listener
//! deliveries are spawned as tasks.

mod get_token;
mod listeners;
pub use listeners::{ErrorListener, ListenerKind, TokenListener};
mod metrics;
pub use metrics::ExchangeMetrics;

// crates.io
use tokio::sync::{OnceCell, watch};
// self
use crate::{
	_prelude::*,
	auth::{AppCheckToken, AppId, TokenResult},
	backoff::ThrottleData,
	debug::DebugState,
	error::ActivationError,
	exchange::ExchangeClient,
	obs,
	provider::AttestationProvider,
	refresh::Refresher,
	store::PersistentCache,
};

/// Outcome shared between an exchange initiator and the callers that joined it.
pub(crate) type ExchangeOutcome = Result<AppCheckToken, Arc<Error>>;
/// Handle onto an in-flight exchange; resolves once the initiator publishes its outcome.
pub(crate) type ExchangeHandle = watch::Receiver<Option<ExchangeOutcome>>;

/// Front door of the crate.
///
/// Cheap to clone; clones share the token store, cache, exchange client, and metrics.
#[derive(Clone)]
pub struct TokenBroker {
	store: Arc<TokenStore>,
	cache: Arc<dyn PersistentCache>,
	exchange: Arc<dyn ExchangeClient>,
	debug: DebugState,
	exchange_metrics: Arc<ExchangeMetrics>,
}
impl TokenBroker {
	/// Creates a broker, picking up debug mode from the process environment.
	pub fn new(cache: Arc<dyn PersistentCache>, exchange: Arc<dyn ExchangeClient>) -> Self {
		Self::with_debug_state(cache, exchange, DebugState::process().clone())
	}

	/// Creates a broker with an explicit debug-mode state.
	pub fn with_debug_state(
		cache: Arc<dyn PersistentCache>,
		exchange: Arc<dyn ExchangeClient>,
		debug: DebugState,
	) -> Self {
		Self {
			store: Arc::new(TokenStore::default()),
			cache,
			exchange,
			debug,
			exchange_metrics: Arc::new(ExchangeMetrics::default()),
		}
	}

	/// The per-application state store.
	pub fn store(&self) -> &TokenStore {
		&self.store
	}

	/// Counters covering every attestation exchange this broker initiated.
	pub fn exchange_metrics(&self) -> &ExchangeMetrics {
		&self.exchange_metrics
	}

	/// Registers `app` with its attestation provider.
	///
	/// Registration is one-shot; a second call for the same application fails with
	/// [`ActivationError::AlreadyActivated`]. Hydration of the persisted token starts in the
	/// background immediately. With auto refresh enabled an internal listener is registered
	/// so the refresher runs without an explicit caller.
	pub fn activate(&self, app: AppId, options: ActivateOptions) -> Result<()> {
		let ActivateOptions { provider, auto_refresh } = options;
		let state = Arc::new(AppCheckState {
			app: app.clone(),
			provider,
			hydration: OnceCell::new(),
			inner: Mutex::new(StateInner {
				token: None,
				auto_refresh,
				observers: Vec::new(),
				refresher: None,
				exchange_in_flight: None,
			}),
		});

		if !self.store.insert(state.clone()) {
			return Err(ActivationError::AlreadyActivated { app }.into());
		}

		{
			let broker = self.clone();
			let state = state.clone();

			tokio::spawn(async move {
				broker.hydrate(&state).await;
			});
		}

		if auto_refresh {
			self.add_token_listener_inner(&state, ListenerKind::Internal, Arc::new(|_| {}), None);
		}

		Ok(())
	}

	/// Flips proactive refresh for `app`, starting or stopping its refresher in place.
	pub fn set_token_auto_refresh_enabled(&self, app: &AppId, enabled: bool) -> Result<()> {
		let state = self.state_of(app)?;
		let mut inner = state.inner.lock();

		inner.auto_refresh = enabled;

		if let Some(refresher) = &inner.refresher {
			if enabled {
				refresher.start();
			} else {
				refresher.stop();
			}
		}

		Ok(())
	}

	pub(crate) fn state_of(&self, app: &AppId) -> Result<Arc<AppCheckState>> {
		self.store
			.get(app)
			.ok_or_else(|| ActivationError::UseBeforeActivation { app: app.clone() }.into())
	}

	/// Reads the persisted token exactly once per application.
	///
	/// A valid persisted token is adopted and fanned out to listeners; a stale record is
	/// deleted. Later calls return the memoized outcome without touching the cache.
	pub(crate) async fn hydrate(&self, state: &Arc<AppCheckState>) -> Option<AppCheckToken> {
		state
			.hydration
			.get_or_init(|| async {
				let persisted = match self.cache.read(&state.app).await {
					Ok(persisted) => persisted,
					Err(e) => {
						obs::log_store_failure("hydration_read", &e);

						None
					},
				};

				match persisted {
					Some(token) if token.is_valid() => {
						state.adopt(token.clone());
						self.notify_token_listeners(state, &TokenResult::from(&token));

						Some(token)
					},
					Some(_) => {
						// An expired persisted token reads as absent; drop the stale record.
						if let Err(e) = self.cache.write(&state.app, None).await {
							obs::log_store_failure("stale_delete", &e);
						}

						None
					},
					None => None,
				}
			})
			.await
			.clone()
	}
}
impl Debug for TokenBroker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenBroker")
			.field("apps", &self.store.len())
			.field("debug", &self.debug.enabled())
			.finish_non_exhaustive()
	}
}

/// Options accepted by [`TokenBroker::activate`].
#[derive(Clone)]
pub struct ActivateOptions {
	provider: Arc<dyn AttestationProvider>,
	auto_refresh: bool,
}
impl ActivateOptions {
	/// Starts from an attestation provider with proactive refresh disabled.
	pub fn new(provider: Arc<dyn AttestationProvider>) -> Self {
		Self { provider, auto_refresh: false }
	}

	/// Enables or disables proactive refresh for the application.
	pub fn auto_refresh(mut self, enabled: bool) -> Self {
		self.auto_refresh = enabled;

		self
	}
}
impl Debug for ActivateOptions {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ActivateOptions")
			.field("auto_refresh", &self.auto_refresh)
			.finish_non_exhaustive()
	}
}

/// Mapping from application identity to its broker-owned state.
#[derive(Debug, Default)]
pub struct TokenStore(Mutex<HashMap<AppId, Arc<AppCheckState>>>);
impl TokenStore {
	/// Looks up the state of `app`.
	pub fn get(&self, app: &AppId) -> Option<Arc<AppCheckState>> {
		self.0.lock().get(app).cloned()
	}

	/// Number of activated applications.
	pub fn len(&self) -> usize {
		self.0.lock().len()
	}

	/// Whether no application has been activated yet.
	pub fn is_empty(&self) -> bool {
		self.0.lock().is_empty()
	}

	/// Removes and returns the state of `app`, stopping its refresher.
	pub fn clear(&self, app: &AppId) -> Option<Arc<AppCheckState>> {
		let state = self.0.lock().remove(app);

		if let Some(state) = &state
			&& let Some(refresher) = state.inner.lock().refresher.take()
		{
			refresher.stop();
		}

		state
	}

	fn insert(&self, state: Arc<AppCheckState>) -> bool {
		let mut apps = self.0.lock();

		if apps.contains_key(&state.app) {
			return false;
		}

		apps.insert(state.app.clone(), state);

		true
	}
}

/// Broker-owned state of one activated application.
pub struct AppCheckState {
	pub(crate) app: AppId,
	pub(crate) provider: Arc<dyn AttestationProvider>,
	pub(crate) hydration: OnceCell<Option<AppCheckToken>>,
	pub(crate) inner: Mutex<StateInner>,
}
impl AppCheckState {
	/// The application this state belongs to.
	pub fn app(&self) -> &AppId {
		&self.app
	}

	/// The in-memory token, valid or not.
	pub fn cached_token(&self) -> Option<AppCheckToken> {
		self.inner.lock().token.clone()
	}

	/// Snapshot of the provider's throttle window, if one is open.
	pub fn throttle(&self) -> Option<ThrottleData> {
		self.provider.throttle()
	}

	/// Whether proactive refresh is currently enabled.
	pub fn is_auto_refresh_enabled(&self) -> bool {
		self.inner.lock().auto_refresh
	}

	/// Whether the refresher schedule is armed.
	pub fn is_refresher_running(&self) -> bool {
		self.inner.lock().refresher.as_ref().is_some_and(Refresher::is_running)
	}

	/// Number of registered listeners, internal ones included.
	pub fn observer_count(&self) -> usize {
		self.inner.lock().observers.len()
	}

	pub(crate) fn valid_token(&self) -> Option<AppCheckToken> {
		self.inner.lock().token.as_ref().filter(|t| t.is_valid()).cloned()
	}

	// Replaces the in-memory token only when the candidate outlives the current one, so a
	// slow exchange can never roll the state back.
	pub(crate) fn adopt(&self, token: AppCheckToken) {
		let mut inner = self.inner.lock();

		if inner.token.as_ref().is_none_or(|current| token.expires_at() > current.expires_at()) {
			inner.token = Some(token);
		}
	}
}
impl Debug for AppCheckState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let inner = self.inner.lock();

		f.debug_struct("AppCheckState")
			.field("app", &self.app)
			.field("token", &inner.token)
			.field("auto_refresh", &inner.auto_refresh)
			.field("observers", &inner.observers.len())
			.finish_non_exhaustive()
	}
}
pub(crate) struct StateInner {
	pub(crate) token: Option<AppCheckToken>,
	pub(crate) auto_refresh: bool,
	pub(crate) observers: Vec<listeners::TokenObserver>,
	pub(crate) refresher: Option<Refresher>,
	pub(crate) exchange_in_flight: Option<ExchangeHandle>,
}

// Clears the in-flight slot when the exchange task settles, panic paths included, so a
// stuck handle can never wedge every later `get_token`.
struct ClearInFlight(Arc<AppCheckState>);
impl Drop for ClearInFlight {
	fn drop(&mut self) {
		self.0.inner.lock().exchange_in_flight = None;
	}
}
