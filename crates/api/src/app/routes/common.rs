use axum::response::Response;

use bazaar_core::DomainResult;

use crate::app::errors;

/// Parse a path identifier, mapping failure to a 400 response.
pub fn parse_id<T>(raw: &str) -> Result<T, Response>
where
    T: core::str::FromStr<Err = bazaar_core::DomainError>,
{
    raw.parse().map_err(errors::domain_error_to_response)
}

/// Map a domain validation result straight to an error response.
pub fn validated<T>(result: DomainResult<T>) -> Result<T, Response> {
    result.map_err(errors::domain_error_to_response)
}
