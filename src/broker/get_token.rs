//! The `get_token` operation and its in-flight exchange deduplication.
//!
//! Once an application is activated, `get_token` never fails: a degraded
//! [`TokenResult`] carrying a placeholder credential and the causing error stands in for any
//! exchange failure. At most one exchange is in flight per application; concurrent callers
//! join it through a watch channel and all observe the same outcome.

// self
use super::*;
use crate::{
	debug::DebugTokenSource,
	error::ExchangeError,
	exchange::ExchangeRequest,
	obs::{OpKind, OpOutcome},
};

impl TokenBroker {
	/// Returns an attestation token for `app`.
	///
	/// A valid in-memory or persisted token is served as-is unless `force_refresh` is set.
	/// Otherwise the broker performs (or joins) one exchange; on failure a still-valid cached
	/// token wins over the fresh error, and only when none exists does the caller receive a
	/// degraded result. The only `Err` this returns is
	/// [`ActivationError::UseBeforeActivation`].
	pub async fn get_token(&self, app: &AppId, force_refresh: bool) -> Result<TokenResult> {
		let state = self.state_of(app)?;

		Ok(self.get_token_of(&state, force_refresh).await)
	}

	/// Returns a single-use attestation token for `app`.
	///
	/// Bypasses the in-memory token, the persistent cache, exchange deduplication, listeners,
	/// and the refresher entirely; every call is its own exchange. Shares the never-fails
	/// contract of [`Self::get_token`].
	pub async fn get_limited_use_token(&self, app: &AppId) -> Result<TokenResult> {
		const KIND: OpKind = OpKind::LimitedUseToken;

		let state = self.state_of(app)?;
		let span = obs::OpSpan::new(KIND, "get_limited_use_token");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async {
				if self.debug.enabled() {
					return self.debug_exchange(&state, false).await;
				}

				self.exchange_metrics.record_attempt();

				match state.provider.get_token(&state.app).await {
					Ok(token) => {
						self.exchange_metrics.record_success();

						TokenResult::from(&token)
					},
					Err(e) => {
						self.exchange_metrics.record_failure();

						let error = Arc::new(e);

						obs::log_exchange_failure(&error);

						TokenResult::degraded(error)
					},
				}
			})
			.await;

		obs::record_op_outcome(
			KIND,
			if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure },
		);

		Ok(result)
	}

	pub(crate) async fn get_token_of(
		&self,
		state: &Arc<AppCheckState>,
		force_refresh: bool,
	) -> TokenResult {
		const KIND: OpKind = OpKind::GetToken;

		let span = obs::OpSpan::new(KIND, "get_token");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.get_token_inner(state, force_refresh)).await;

		obs::record_op_outcome(
			KIND,
			if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure },
		);

		result
	}

	/// One scheduled refresher run.
	///
	/// Unlike [`Self::get_token`], a failed exchange here is reported as a failure even while
	/// a still-valid token remains in memory; the refresher must observe the real outcome to
	/// back off instead of rescheduling against the untouched expiry.
	pub(crate) async fn refresh_token(&self, state: &Arc<AppCheckState>) -> Result<(), Arc<Error>> {
		const KIND: OpKind = OpKind::Refresh;

		let span = obs::OpSpan::new(KIND, "refresh_token");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let outcome = span.instrument(self.refresh_token_inner(state)).await;

		obs::record_op_outcome(
			KIND,
			if outcome.is_ok() { OpOutcome::Success } else { OpOutcome::Failure },
		);

		outcome
	}

	async fn refresh_token_inner(&self, state: &Arc<AppCheckState>) -> Result<(), Arc<Error>> {
		let had_token = state.cached_token().is_some();

		self.hydrate(state).await;

		// Hydration may satisfy the very first run without touching the wire.
		if !had_token && state.valid_token().is_some() {
			return Ok(());
		}

		let (handle, initiated) = self.join_or_spawn_exchange(state);

		match await_exchange(handle).await {
			Ok(token) => {
				if initiated {
					self.notify_token_listeners(state, &TokenResult::from(&token));
				}

				Ok(())
			},
			Err(error) => {
				obs::log_exchange_failure(&error);

				if initiated {
					self.notify_token_listeners(state, &TokenResult::degraded(error.clone()));
				}

				Err(error)
			},
		}
	}

	async fn get_token_inner(&self, state: &Arc<AppCheckState>, force_refresh: bool) -> TokenResult {
		if self.debug.enabled() {
			return self.debug_exchange(state, true).await;
		}

		self.hydrate(state).await;

		if !force_refresh && let Some(token) = state.valid_token() {
			return TokenResult::from(&token);
		}

		let (handle, initiated) = self.join_or_spawn_exchange(state);

		match await_exchange(handle).await {
			Ok(token) => {
				let result = TokenResult::from(&token);

				// Joiners skip fan-out; only the initiator notifies, once per exchange.
				if initiated {
					self.notify_token_listeners(state, &result);
				}

				result
			},
			Err(error) => {
				obs::log_exchange_failure(&error);

				if initiated {
					self.notify_token_listeners(state, &TokenResult::degraded(error.clone()));
				}

				// A still-valid cached token beats a fresh failure.
				match state.valid_token() {
					Some(token) => TokenResult::from(&token),
					None => TokenResult::degraded(error),
				}
			},
		}
	}

	/// Exchanges the configured debug token instead of a real attestation.
	///
	/// With `persist` set the resulting token is adopted and written through to the cache,
	/// so restarts inside a debug session skip the exchange.
	async fn debug_exchange(&self, state: &Arc<AppCheckState>, persist: bool) -> TokenResult {
		let Some(debug_token) = self.debug.debug_token() else {
			let error = Arc::new(Error::attestation(
				"Debug mode is enabled but no debug token is configured.",
			));

			obs::log_exchange_failure(&error);

			return TokenResult::degraded(error);
		};

		self.exchange_metrics.record_attempt();

		match self
			.exchange
			.exchange(ExchangeRequest::DebugToken { token: debug_token }, &state.app)
			.await
		{
			Ok(token) => {
				self.exchange_metrics.record_success();

				let result = TokenResult::from(&token);

				if persist {
					state.adopt(token.clone());

					if let Err(e) = self.cache.write(&state.app, Some(&token)).await {
						obs::log_store_failure("debug_write_through", &e);
					}

					self.notify_token_listeners(state, &result);
				}

				result
			},
			Err(e) => {
				self.exchange_metrics.record_failure();

				let error = Arc::new(Error::from(e));

				obs::log_exchange_failure(&error);

				TokenResult::degraded(error)
			},
		}
	}

	// Joins the in-flight exchange when one exists, otherwise spawns one and becomes the
	// initiator. The spawned task outlives its callers: adoption and the cache write-through
	// happen even if every caller is cancelled mid-wait.
	fn join_or_spawn_exchange(&self, state: &Arc<AppCheckState>) -> (ExchangeHandle, bool) {
		let mut inner = state.inner.lock();

		if let Some(handle) = &inner.exchange_in_flight {
			return (handle.clone(), false);
		}

		let (tx, rx) = watch::channel(None);

		inner.exchange_in_flight = Some(rx.clone());

		drop(inner);

		let broker = self.clone();
		let state = state.clone();

		tokio::spawn(async move {
			let slot = ClearInFlight(state.clone());

			broker.exchange_metrics.record_attempt();

			let outcome = state.provider.get_token(&state.app).await.map_err(Arc::new);

			match &outcome {
				Ok(token) => {
					broker.exchange_metrics.record_success();
					state.adopt(token.clone());

					// The cache is an optimization; a failed write degrades nothing.
					if let Err(e) = broker.cache.write(&state.app, Some(token)).await {
						obs::log_store_failure("write_through", &e);
					}
				},
				Err(_) => broker.exchange_metrics.record_failure(),
			}

			// Free the slot before waking the waiters so a caller retrying immediately
			// starts a fresh exchange instead of re-joining this one.
			drop(slot);

			let _ = tx.send(Some(outcome));
		});

		(rx, true)
	}
}

async fn await_exchange(mut handle: ExchangeHandle) -> ExchangeOutcome {
	loop {
		{
			let outcome = handle.borrow_and_update();

			if let Some(outcome) = outcome.as_ref() {
				return outcome.clone();
			}
		}

		if handle.changed().await.is_err() {
			// The initiator task was torn down without publishing; surface that rather
			// than hanging forever.
			return Err(Arc::new(ExchangeError::Interrupted.into()));
		}
	}
}
