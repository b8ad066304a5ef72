//! `bazaar-auth`: authenticated user context for the storefront.
//!
//! Decodes HS256 bearer tokens into claims and answers role questions. This
//! crate is intentionally decoupled from HTTP and storage.

pub mod claims;
pub mod jwt;
pub mod roles;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use roles::Role;
