//! Exchange-client contract turning attestation credentials into signed App Check tokens.
//!
//! The broker depends only on [`ExchangeClient`]; the reqwest-backed implementation behind the
//! `reqwest` feature covers the common hosted-endpoint deployment. Responses carry the issued
//! credential plus a TTL formatted as seconds with an `s` suffix (`"3600s"`).

// self
use crate::{
	_prelude::*,
	auth::{AppCheckToken, AppId},
	error::ExchangeError,
};
#[cfg(feature = "reqwest")] use url::Url;

/// Boxed future returned by [`ExchangeClient::exchange`].
pub type ExchangeFuture<'a> =
	Pin<Box<dyn Future<Output = Result<AppCheckToken, ExchangeError>> + 'a + Send>>;

/// Backend call that signs an attestation credential into an App Check token.
///
/// Implementations classify every failure into [`ExchangeError`]; the broker never inspects
/// transport details beyond that taxonomy.
pub trait ExchangeClient
where
	Self: Send + Sync,
{
	/// Performs one token exchange for the provided application identity.
	fn exchange<'a>(&'a self, request: ExchangeRequest, app: &'a AppId) -> ExchangeFuture<'a>;
}

/// Credential material submitted to the exchange endpoint.
#[derive(Clone)]
pub enum ExchangeRequest {
	/// Credential produced by an attestation mechanism.
	Attestation {
		/// Raw attestation credential; must not be logged.
		credential: String,
	},
	/// Development-only debug credential substituting for real attestation.
	DebugToken {
		/// Debug token configured for this process.
		token: String,
	},
}
impl Debug for ExchangeRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Attestation { .. } =>
				f.debug_struct("ExchangeRequest::Attestation").field("credential", &"<redacted>").finish(),
			Self::DebugToken { .. } =>
				f.debug_struct("ExchangeRequest::DebugToken").field("token", &"<redacted>").finish(),
		}
	}
}

#[derive(Debug, Deserialize)]
struct ExchangeResponseBody {
	token: String,
	ttl: String,
}

/// Parses an exchange response body into a token anchored at `now`.
///
/// Shared by transport implementations so body and TTL handling stays uniform.
pub fn parse_exchange_response(
	bytes: &[u8],
	http_status: Option<u16>,
	now: OffsetDateTime,
) -> Result<AppCheckToken, ExchangeError> {
	let mut deserializer = serde_json::Deserializer::from_slice(bytes);
	let body: ExchangeResponseBody = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| ExchangeError::Parse { source, http_status })?;
	let ttl = parse_ttl(&body.ttl)?;
	let expires_at =
		now.checked_add(ttl).ok_or_else(|| ExchangeError::TtlFormat { raw: body.ttl.clone() })?;

	Ok(AppCheckToken::new(body.token, now, expires_at))
}

/// Longest lifetime accepted from the wire; anything beyond it is rejected as malformed.
pub const MAX_TTL: Duration = Duration::days(366);

/// Parses a wire TTL such as `"3600s"` into a duration.
///
/// Grammatically valid but out-of-range values (negative, non-finite, or beyond
/// [`MAX_TTL`]) are rejected as [`ExchangeError::TtlFormat`] so no server response can
/// produce an unrepresentable expiry.
pub fn parse_ttl(raw: &str) -> Result<Duration, ExchangeError> {
	let seconds = raw
		.strip_suffix('s')
		.and_then(|view| view.parse::<f64>().ok())
		.filter(|secs| secs.is_finite() && *secs >= 0.0 && *secs <= MAX_TTL.as_seconds_f64())
		.ok_or_else(|| ExchangeError::TtlFormat { raw: raw.to_owned() })?;

	Ok(Duration::seconds_f64(seconds))
}

/// Reqwest-backed [`ExchangeClient`] targeting a hosted exchange endpoint.
///
/// Requests go to `{endpoint}/v1/apps/{app}:exchangeAttestationToken` (or
/// `:exchangeDebugToken` for debug credentials) as JSON POST bodies.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestExchangeClient {
	client: ReqwestClient,
	endpoint: Url,
}
#[cfg(feature = "reqwest")]
impl ReqwestExchangeClient {
	/// Creates a client with a default reqwest transport.
	pub fn new(endpoint: Url) -> Self {
		Self::with_client(ReqwestClient::default(), endpoint)
	}

	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestClient, endpoint: Url) -> Self {
		Self { client, endpoint }
	}

	fn request_url(&self, request: &ExchangeRequest, app: &AppId) -> Result<Url, ExchangeError> {
		let method = match request {
			ExchangeRequest::Attestation { .. } => "exchangeAttestationToken",
			ExchangeRequest::DebugToken { .. } => "exchangeDebugToken",
		};

		self.endpoint
			.join(&format!("v1/apps/{app}:{method}"))
			.map_err(ExchangeError::network)
	}

	fn request_body(request: &ExchangeRequest) -> serde_json::Value {
		match request {
			ExchangeRequest::Attestation { credential } =>
				serde_json::json!({ "attestation_token": credential }),
			ExchangeRequest::DebugToken { token } => serde_json::json!({ "debug_token": token }),
		}
	}
}
#[cfg(feature = "reqwest")]
impl ExchangeClient for ReqwestExchangeClient {
	fn exchange<'a>(&'a self, request: ExchangeRequest, app: &'a AppId) -> ExchangeFuture<'a> {
		Box::pin(async move {
			let url = self.request_url(&request, app)?;
			let body = Self::request_body(&request);
			let response = self.client.post(url).json(&body).send().await.map_err(ExchangeError::from)?;
			let status = response.status();

			if !status.is_success() {
				return Err(ExchangeError::Status { http_status: status.as_u16() });
			}

			let bytes = response.bytes().await.map_err(ExchangeError::from)?;

			parse_exchange_response(&bytes, Some(status.as_u16()), OffsetDateTime::now_utc())
		})
	}
}
