//! Expiry inspection for identity tokens
//!
//! Identity tokens are handed to the token-exchange endpoint as-is. The only
//! thing inspected locally is the `exp` claim, so that an expired token
//! produces a useful error instead of an opaque rejection from the exchange.
//!
//! **No signature verification is performed.** The token arrives from a
//! provider controlled by the embedding application and is verified by the
//! exchange endpoint.

use aliri_base64::{Base64Url, InvalidBase64Data};
use serde::Deserialize;
use thiserror::Error;
use tsapi_clock::{Clock, System, UnixTime};

use crate::IdTokenRef;

/// An identity token that cannot be used for a token exchange
#[derive(Debug, Error)]
pub enum IdTokenError {
    /// The token does not consist of three `.`-separated segments
    #[error("invalid JWT format: expected 3 parts separated by '.', got {0}")]
    MalformedToken(usize),
    /// The payload segment is not unpadded base64url
    #[error("failed to decode JWT payload: {0}")]
    MalformedPayload(#[source] InvalidBase64Data),
    /// The decoded payload is not a JSON object with an integer `exp`
    #[error("failed to parse JWT claims: {0}")]
    MalformedClaims(#[source] serde_json::Error),
    /// The payload has no `exp` claim
    #[error("JWT is missing 'exp' (expiration) claim")]
    MissingExpiryClaim,
    /// The token's `exp` is not in the future
    #[error("ID token has expired (expired at {expired_at})")]
    Expired {
        /// The instant the token expired
        expired_at: UnixTime,
    },
}

#[derive(Deserialize)]
struct ExpiryClaims {
    #[serde(default)]
    exp: Option<u64>,
}

/// Validates that the token is a well-formed JWT that has not yet expired
/// according to the system clock
///
/// Returns the token's expiry on success.
pub fn validate_expiry(token: &IdTokenRef) -> Result<UnixTime, IdTokenError> {
    validate_expiry_with_clock(token, &System)
}

/// Validates the token's expiry against the time reported by `clock`
pub fn validate_expiry_with_clock<C: Clock>(
    token: &IdTokenRef,
    clock: &C,
) -> Result<UnixTime, IdTokenError> {
    validate_expiry_at(token, clock.now())
}

/// Validates the token's expiry as of `now`
pub fn validate_expiry_at(token: &IdTokenRef, now: UnixTime) -> Result<UnixTime, IdTokenError> {
    let exp = expiry(token)?;

    if now >= exp {
        return Err(IdTokenError::Expired { expired_at: exp });
    }

    Ok(exp)
}

/// Extracts the `exp` claim without checking it against any clock
pub fn expiry(token: &IdTokenRef) -> Result<UnixTime, IdTokenError> {
    let segments: Vec<&str> = token.as_str().split('.').collect();
    let payload = match segments.as_slice() {
        [_, payload, _] => *payload,
        _ => return Err(IdTokenError::MalformedToken(segments.len())),
    };

    let payload = Base64Url::from_encoded(payload).map_err(IdTokenError::MalformedPayload)?;
    let claims: ExpiryClaims =
        serde_json::from_slice(payload.as_slice()).map_err(IdTokenError::MalformedClaims)?;

    match claims.exp {
        Some(exp) if exp > 0 => Ok(UnixTime(exp)),
        _ => Err(IdTokenError::MissingExpiryClaim),
    }
}
