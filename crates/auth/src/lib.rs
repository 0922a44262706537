//! `creditgate-auth`: bearer-token boundary.
//!
//! Decodes and verifies HS256 tokens into [`JwtClaims`]. Decoupled from HTTP:
//! the API layer extracts the header and hands the raw token over.
//!
//! Whether a principal may use admin operations is decided by the account
//! record, not by anything carried in the token.

pub mod claims;
pub mod jwt;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtIssuer, Hs256JwtValidator, JwtError, JwtValidator};
