//! Debug-mode override that substitutes a fixed debug credential for the whole
//! attestation pipeline.
//!
//! The process-wide state is initialized once from the environment and read-only afterwards;
//! the broker consults it at a single dispatch point instead of threading conditionals through
//! every operation.

// std
use std::{env, sync::OnceLock};
// self
use crate::_prelude::*;

/// Environment variable inspected once at process start for the debug override.
pub const DEBUG_TOKEN_ENV: &str = "APPCHECK_DEBUG_TOKEN";

static PROCESS_DEBUG_STATE: OnceLock<DebugState> = OnceLock::new();

/// Source of the debug credential; only consulted while debug mode is enabled.
pub trait DebugTokenSource
where
	Self: Send + Sync,
{
	/// Returns the configured debug credential, if any.
	fn debug_token(&self) -> Option<String>;
}

/// Immutable debug override captured at initialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugState {
	enabled: bool,
	token: Option<String>,
}
impl DebugState {
	/// Debug mode off; the broker follows the regular attestation path.
	pub fn disabled() -> Self {
		Self { enabled: false, token: None }
	}

	/// Debug mode on with a fixed credential; used by hosts that configure the token
	/// programmatically.
	pub fn with_token(token: impl Into<String>) -> Self {
		Self { enabled: true, token: Some(token.into()) }
	}

	/// Captures the override from [`DEBUG_TOKEN_ENV`]; a present, non-empty value enables
	/// debug mode for the lifetime of the process.
	pub fn from_env() -> Self {
		match env::var(DEBUG_TOKEN_ENV) {
			Ok(value) if !value.trim().is_empty() => Self::with_token(value),
			_ => Self::disabled(),
		}
	}

	/// Process-wide state, initialized from the environment on first access.
	pub fn process() -> &'static Self {
		PROCESS_DEBUG_STATE.get_or_init(Self::from_env)
	}

	/// Returns `true` while the debug override supersedes regular attestation.
	pub fn enabled(&self) -> bool {
		self.enabled
	}
}
impl DebugTokenSource for DebugState {
	fn debug_token(&self) -> Option<String> {
		self.token.clone()
	}
}
