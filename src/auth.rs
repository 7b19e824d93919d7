//! Auth-domain identifiers and App Check token models.

pub mod id;
pub mod token;

pub use id::*;
pub use token::*;
