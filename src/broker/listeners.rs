//! Listener registry and fan-out.
//!
//! Listeners observe every token outcome the broker produces for an application: hydration
//! adoptions, exchange successes, and degraded results. External listeners with an error
//! handler receive failures through that handler; everyone else receives the degraded
//! [`TokenResult`] on the regular channel. Fan-out happens in registration order and each
//! listener runs inside its own panic boundary.

// std
use std::panic::{self, AssertUnwindSafe};
// self
use super::*;
use crate::refresh::{self, REFRESH_OFFSET, RETRIAL_MAX_WAIT, RETRIAL_MIN_WAIT};

/// Callback receiving every token outcome for an application.
pub type TokenListener = Arc<dyn Fn(&TokenResult) + Send + Sync>;
/// Callback receiving failures instead of degraded results; external listeners only.
pub type ErrorListener = Arc<dyn Fn(&Error) + Send + Sync>;

/// Who registered a listener; decides which channel failures are delivered on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerKind {
	/// Registered by the broker itself; always receives [`TokenResult`]s.
	Internal,
	/// Registered by a host application; failures go to its error handler when it has one.
	External,
}

#[derive(Clone)]
pub(crate) struct TokenObserver {
	pub(crate) kind: ListenerKind,
	pub(crate) on_next: TokenListener,
	pub(crate) on_error: Option<ErrorListener>,
}
impl TokenObserver {
	fn deliver(&self, result: &TokenResult) {
		// One panicking listener must not starve the rest of the registry.
		let _ = panic::catch_unwind(AssertUnwindSafe(|| {
			match (&result.error, self.kind, &self.on_error) {
				(Some(error), ListenerKind::External, Some(on_error)) => on_error(error),
				_ => (self.on_next)(result),
			}
		}));
	}
}

impl TokenBroker {
	/// Registers a listener for `app` and arms the proactive refresher.
	///
	/// A valid in-memory token is delivered to the new listener asynchronously. The refresher
	/// is created on first registration and started once hydration has settled, provided
	/// auto-refresh is enabled. In debug mode no refresher ever runs.
	pub fn add_token_listener(
		&self,
		app: &AppId,
		kind: ListenerKind,
		on_next: TokenListener,
		on_error: Option<ErrorListener>,
	) -> Result<()> {
		let state = self.state_of(app)?;

		self.add_token_listener_inner(&state, kind, on_next, on_error);

		Ok(())
	}

	/// Deregisters a listener of `app`, matched by identity.
	///
	/// When the last listener goes away the refresher is stopped and discarded.
	pub fn remove_token_listener(&self, app: &AppId, listener: &TokenListener) -> Result<()> {
		let state = self.state_of(app)?;
		let mut inner = state.inner.lock();

		if let Some(i) = inner.observers.iter().position(|o| Arc::ptr_eq(&o.on_next, listener)) {
			inner.observers.remove(i);
		}
		if inner.observers.is_empty()
			&& let Some(refresher) = inner.refresher.take()
		{
			refresher.stop();
		}

		Ok(())
	}

	pub(crate) fn add_token_listener_inner(
		&self,
		state: &Arc<AppCheckState>,
		kind: ListenerKind,
		on_next: TokenListener,
		on_error: Option<ErrorListener>,
	) {
		state.inner.lock().observers.push(TokenObserver {
			kind,
			on_next: on_next.clone(),
			on_error,
		});

		if let Some(token) = state.valid_token() {
			tokio::spawn(async move {
				on_next(&TokenResult::from(&token));
			});
		}

		// No refresher in debug mode; the debug token is exchanged on demand instead.
		if self.debug.enabled() {
			return;
		}

		// Arm the refresher only after the one-time hydration has settled, so its first
		// scheduled run sees the persisted token.
		let broker = self.clone();
		let state = state.clone();

		tokio::spawn(async move {
			broker.hydrate(&state).await;
			broker.init_token_refresher(&state);
		});
	}

	/// Fans `result` out to every listener of `state`, in registration order.
	pub(crate) fn notify_token_listeners(&self, state: &Arc<AppCheckState>, result: &TokenResult) {
		let observers = state.inner.lock().observers.clone();

		for observer in observers {
			observer.deliver(result);
		}
	}

	fn init_token_refresher(&self, state: &Arc<AppCheckState>) {
		let mut inner = state.inner.lock();

		if inner.observers.is_empty() {
			return;
		}
		if inner.refresher.is_none() {
			inner.refresher = Some(self.create_token_refresher(state));
		}
		if inner.auto_refresh
			&& let Some(refresher) = &inner.refresher
			&& !refresher.is_running()
		{
			refresher.start();
		}
	}

	fn create_token_refresher(&self, state: &Arc<AppCheckState>) -> Refresher {
		let operation: refresh::Operation = {
			let broker = self.clone();
			let state = state.clone();

			Arc::new(move || {
				let broker = broker.clone();
				let state = state.clone();

				Box::pin(async move { broker.refresh_token(&state).await })
			})
		};
		let next_delay: refresh::NextDelay = {
			let state = state.clone();

			Arc::new(move || match state.valid_token() {
				Some(token) =>
					(token.expires_at() - OffsetDateTime::now_utc() - REFRESH_OFFSET)
						.max(Duration::ZERO),
				None => Duration::ZERO,
			})
		};

		Refresher::new(operation, next_delay, RETRIAL_MIN_WAIT, RETRIAL_MAX_WAIT)
	}
}
