//! Attestation provider contracts and the throttle-aware exchange provider.
//!
//! [`AttestationProvider`] is the broker's only dependency on an attestation mechanism: it
//! produces a fully exchanged App Check token for an application identity. The built-in
//! [`ExchangeAttestationProvider`] composes a raw credential source with an exchange client
//! and owns the throttle state applied around every exchange attempt; custom mechanisms may
//! implement [`AttestationProvider`] directly and manage their own throttling.

// crates.io
use rand::rng;
// self
use crate::{
	_prelude::*,
	auth::{AppCheckToken, AppId},
	backoff::{self, ThrottleData},
	exchange::{ExchangeClient, ExchangeRequest},
};

/// Boxed future returned by [`AttestationProvider::get_token`].
pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<AppCheckToken>> + 'a + Send>>;

/// Boxed future returned by [`AttestationSource::credential`].
pub type CredentialFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + 'a + Send>>;

/// Produces an exchanged App Check token for an application identity.
///
/// Implementations own their throttle state and must apply the backoff policy around their
/// own exchange calls; the broker deduplicates concurrent callers but never throttles.
pub trait AttestationProvider
where
	Self: Send + Sync,
{
	/// Obtains a fresh token; fails with the broker taxonomy (attestation, exchange,
	/// throttled).
	fn get_token<'a>(&'a self, app: &'a AppId) -> ProviderFuture<'a>;

	/// Snapshot of the provider's throttle window, surfaced for observability only.
	fn throttle(&self) -> Option<ThrottleData> {
		None
	}
}

/// Produces the raw attestation credential handed to the exchange endpoint.
///
/// This is the seam for concrete attestation mechanisms (challenge/response widgets,
/// enterprise verification UIs); failures surface as [`Error::Attestation`].
pub trait AttestationSource
where
	Self: Send + Sync,
{
	/// Obtains one attestation credential for the application.
	fn credential<'a>(&'a self, app: &'a AppId) -> CredentialFuture<'a>;
}

/// Built-in provider that exchanges credentials from an [`AttestationSource`] while applying
/// client-side throttling.
///
/// A non-success exchange status opens a throttle window computed by
/// [`backoff::set_backoff`]; while the window is open,
/// [`get_token`](AttestationProvider::get_token) fails fast without any network call. A
/// successful exchange clears the window entirely.
pub struct ExchangeAttestationProvider {
	source: Arc<dyn AttestationSource>,
	exchange: Arc<dyn ExchangeClient>,
	throttle: Mutex<Option<ThrottleData>>,
}
impl ExchangeAttestationProvider {
	/// Composes a credential source with an exchange client.
	pub fn new(source: Arc<dyn AttestationSource>, exchange: Arc<dyn ExchangeClient>) -> Self {
		Self { source, exchange, throttle: Mutex::new(None) }
	}

	fn record_failure(&self, http_status: u16) {
		let mut guard = self.throttle.lock();
		let jitter = backoff::unit_jitter(&mut rng());

		*guard = Some(backoff::set_backoff(
			http_status,
			guard.as_ref(),
			OffsetDateTime::now_utc(),
			jitter,
		));
	}
}
impl AttestationProvider for ExchangeAttestationProvider {
	fn get_token<'a>(&'a self, app: &'a AppId) -> ProviderFuture<'a> {
		Box::pin(async move {
			backoff::throw_if_throttled(self.throttle.lock().as_ref(), OffsetDateTime::now_utc())?;

			let credential = self.source.credential(app).await?;
			let request = ExchangeRequest::Attestation { credential };

			match self.exchange.exchange(request, app).await {
				Ok(token) => {
					// No lingering backoff state survives a success.
					*self.throttle.lock() = None;

					Ok(token)
				},
				Err(e) => {
					if let Some(status) = e.http_status() {
						self.record_failure(status);
					}

					Err(e.into())
				},
			}
		})
	}

	fn throttle(&self) -> Option<ThrottleData> {
		*self.throttle.lock()
	}
}
impl Debug for ExchangeAttestationProvider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ExchangeAttestationProvider")
			.field("throttle", &*self.throttle.lock())
			.finish()
	}
}
