//! Strongly typed application identifier enforced across the broker domain.

// std
use std::{borrow::Borrow, ops::Deref, str::FromStr};
// self
use crate::_prelude::*;

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when application identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum AppIdError {
	/// The identifier was empty.
	#[error("App identifier cannot be empty.")]
	Empty,
	/// The identifier contains whitespace characters.
	#[error("App identifier contains whitespace.")]
	ContainsWhitespace,
	/// The identifier exceeded the allowed character count.
	#[error("App identifier exceeds {max} characters.")]
	TooLong {
		/// Maximum permitted character count.
		max: usize,
	},
}

/// Unique identifier for one logical application instance.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppId(String);
impl AppId {
	/// Creates a new identifier after validation.
	pub fn new(value: impl AsRef<str>) -> Result<Self, AppIdError> {
		let view = value.as_ref();

		validate_view(view)?;

		Ok(Self(view.to_owned()))
	}
}
impl Deref for AppId {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl AsRef<str> for AppId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl Borrow<str> for AppId {
	fn borrow(&self) -> &str {
		&self.0
	}
}
impl From<AppId> for String {
	fn from(value: AppId) -> Self {
		value.0
	}
}
impl TryFrom<String> for AppId {
	type Error = AppIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		validate_view(&value)?;

		Ok(Self(value))
	}
}
impl FromStr for AppId {
	type Err = AppIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl Debug for AppId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "App({})", self.0)
	}
}
impl Display for AppId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

fn validate_view(view: &str) -> Result<(), AppIdError> {
	if view.is_empty() {
		return Err(AppIdError::Empty);
	}
	if view.chars().any(char::is_whitespace) {
		return Err(AppIdError::ContainsWhitespace);
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(AppIdError::TooLong { max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}
