//! Bearer credential verification.

mod token;

pub use token::{Claims, TokenError, TokenVerifier};
