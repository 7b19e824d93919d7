//! Broker-level error types shared across the token pipeline.
//!
//! Everything except [`ActivationError`] is caught at the
//! [`TokenBroker`](crate::broker::TokenBroker) boundary and converted into a degraded
//! [`TokenResult`](crate::auth::TokenResult); activation errors are programmer-usage errors
//! and surface synchronously.

// self
use crate::{_prelude::*, auth::AppId};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Activation-sequence misuse; raised synchronously to the caller.
	#[error(transparent)]
	Activation(#[from] ActivationError),
	/// Token-exchange failure classified by the exchange client.
	#[error(transparent)]
	Exchange(#[from] ExchangeError),

	/// The attestation mechanism itself failed to produce a credential.
	#[error("Attestation failed: {reason}.")]
	Attestation {
		/// Mechanism-supplied reason string.
		reason: String,
	},
	/// The provider is inside a client-side throttle window; no request was made.
	#[error("Requests are throttled for another {retry_after}; last HTTP status was {http_status}.")]
	Throttled {
		/// Remaining wait before the next exchange attempt is allowed.
		retry_after: Duration,
		/// HTTP status that opened the throttle window.
		http_status: u16,
	},
}
impl Error {
	/// Wraps an attestation-mechanism failure.
	pub fn attestation(reason: impl Into<String>) -> Self {
		Self::Attestation { reason: reason.into() }
	}

	/// Returns `true` when the error is a client-side throttle rejection.
	pub fn is_throttled(&self) -> bool {
		matches!(self, Self::Throttled { .. })
	}

	/// HTTP status associated with the failure, when one was observed.
	pub fn http_status(&self) -> Option<u16> {
		match self {
			Self::Exchange(e) => e.http_status(),
			Self::Throttled { http_status, .. } => Some(*http_status),
			_ => None,
		}
	}
}

/// Activation lifecycle misuse raised by broker entry points.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ActivationError {
	/// A broker operation was invoked before `activate` for the application.
	#[error("App Check has not been activated for application `{app}`.")]
	UseBeforeActivation {
		/// Application identity the operation targeted.
		app: AppId,
	},
	/// `activate` was called twice for the same application identity.
	#[error("App Check is already activated for application `{app}`.")]
	AlreadyActivated {
		/// Application identity that was activated twice.
		app: AppId,
	},
}

/// Failures classified by an [`ExchangeClient`](crate::exchange::ExchangeClient).
#[derive(Debug, ThisError)]
pub enum ExchangeError {
	/// Transport failure (DNS, TCP, TLS) before a response was received.
	#[error("Network error occurred while calling the token exchange endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Exchange endpoint answered with a non-success HTTP status.
	#[error("Token exchange endpoint returned HTTP status {http_status}.")]
	Status {
		/// HTTP status code returned by the endpoint.
		http_status: u16,
	},
	/// Exchange endpoint responded with a body that could not be parsed.
	#[error("Token exchange endpoint returned a malformed response.")]
	Parse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		http_status: Option<u16>,
	},
	/// Exchange endpoint returned a TTL field the client cannot interpret.
	#[error("Token exchange endpoint returned an unparseable TTL: {raw:?}.")]
	TtlFormat {
		/// Raw TTL payload as received.
		raw: String,
	},
	/// The deduplicated in-flight exchange was dropped before publishing a result.
	#[error("The in-flight token exchange was abandoned before it produced a result.")]
	Interrupted,
}
impl ExchangeError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// HTTP status carried by the failure, when one was observed.
	pub fn http_status(&self) -> Option<u16> {
		match self {
			Self::Status { http_status } => Some(*http_status),
			Self::Parse { http_status, .. } => *http_status,
			_ => None,
		}
	}
}
#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for ExchangeError {
	fn from(e: reqwest::Error) -> Self {
		Self::network(e)
	}
}
