//! Client-side App Check attestation token broker: cached, deduplicated, proactively
//! refreshed trust tokens with throttle-aware providers and observable listener fan-out.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod backoff;
pub mod broker;
pub mod debug;
pub mod error;
pub mod exchange;
pub mod obs;
pub mod provider;
pub mod refresh;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and mock collaborators for integration tests; enabled via
	//! `cfg(test)` or the `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicU64, Ordering};
	// self
	use crate::{
		auth::{AppCheckToken, AppId},
		broker::TokenBroker,
		debug::DebugState,
		error::ExchangeError,
		exchange::{ExchangeClient, ExchangeFuture, ExchangeRequest},
		provider::{AttestationProvider, ProviderFuture},
		store::MemoryStore,
	};
	#[cfg(feature = "reqwest")] use crate::exchange::ReqwestExchangeClient;
	#[cfg(feature = "reqwest")] use url::Url;

	/// Builds a reqwest-backed exchange client that accepts the self-signed certificates
	/// `httpmock` serves during tests.
	#[cfg(feature = "reqwest")]
	pub fn test_exchange_client(endpoint: Url) -> ReqwestExchangeClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.build()
			.expect("Insecure reqwest client for tests should build.");

		ReqwestExchangeClient::with_client(client, endpoint)
	}

	/// Builds an App Check token fixture valid for `ttl` from now.
	pub fn test_token(value: &str, ttl: Duration) -> AppCheckToken {
		let issued = OffsetDateTime::now_utc();

		AppCheckToken::new(value, issued, issued + ttl)
	}

	/// Builds an already-expired App Check token fixture.
	pub fn expired_token(value: &str) -> AppCheckToken {
		let issued = OffsetDateTime::now_utc() - Duration::hours(2);

		AppCheckToken::new(value, issued, issued + Duration::hours(1))
	}

	/// App identifier fixture.
	pub fn test_app(value: &str) -> AppId {
		AppId::new(value).expect("App identifier fixture should be valid.")
	}

	/// Scripted [`AttestationProvider`] that pops one outcome per call and counts invocations.
	#[derive(Default)]
	pub struct MockProvider {
		calls: AtomicU64,
		outcomes: Mutex<Vec<Result<AppCheckToken>>>,
	}
	impl MockProvider {
		/// Queues an outcome; outcomes are consumed in queue order.
		pub fn push(&self, outcome: Result<AppCheckToken>) {
			self.outcomes.lock().push(outcome);
		}

		/// Number of `get_token` invocations observed so far.
		pub fn calls(&self) -> u64 {
			self.calls.load(Ordering::Relaxed)
		}
	}
	impl AttestationProvider for MockProvider {
		fn get_token<'a>(&'a self, _app: &'a AppId) -> ProviderFuture<'a> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::Relaxed);

				let mut outcomes = self.outcomes.lock();

				if outcomes.is_empty() {
					return Err(Error::attestation("Mock provider ran out of scripted outcomes."));
				}

				outcomes.remove(0)
			})
		}
	}

	/// Scripted [`ExchangeClient`] that records requests and pops one outcome per call.
	#[derive(Default)]
	pub struct MockExchange {
		calls: AtomicU64,
		outcomes: Mutex<Vec<Result<AppCheckToken, ExchangeError>>>,
		requests: Mutex<Vec<ExchangeRequest>>,
	}
	impl MockExchange {
		/// Queues an outcome; outcomes are consumed in queue order.
		pub fn push(&self, outcome: Result<AppCheckToken, ExchangeError>) {
			self.outcomes.lock().push(outcome);
		}

		/// Number of `exchange` invocations observed so far.
		pub fn calls(&self) -> u64 {
			self.calls.load(Ordering::Relaxed)
		}

		/// Requests captured in invocation order.
		pub fn requests(&self) -> Vec<ExchangeRequest> {
			self.requests.lock().clone()
		}
	}
	impl ExchangeClient for MockExchange {
		fn exchange<'a>(&'a self, request: ExchangeRequest, _app: &'a AppId) -> ExchangeFuture<'a> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::Relaxed);
				self.requests.lock().push(request.clone());

				let mut outcomes = self.outcomes.lock();

				if outcomes.is_empty() {
					return Err(ExchangeError::Status { http_status: 500 });
				}

				outcomes.remove(0)
			})
		}
	}

	/// Constructs a [`TokenBroker`] backed by an in-memory cache and mock exchange client,
	/// with debug mode disabled regardless of the host environment.
	pub fn build_test_broker() -> (TokenBroker, Arc<MemoryStore>, Arc<MockExchange>) {
		let cache = Arc::new(MemoryStore::default());
		let exchange = Arc::new(MockExchange::default());
		let broker =
			TokenBroker::with_debug_state(cache.clone(), exchange.clone(), DebugState::disabled());

		(broker, cache, exchange)
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::Client as ReqwestClient;
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use color_eyre as _;
#[cfg(all(test, feature = "reqwest"))] use httpmock as _;
