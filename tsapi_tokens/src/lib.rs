//! Facilities for on-demand management of API access tokens
//!
//! This library obtains and renews the bearer credentials used by the `tsapi`
//! client. Three credential flows are supported:
//!
//! * a static API key, which needs no token management at all and is only
//!   represented here by the [`ApiKey`] type;
//! * the OAuth2 _client credentials_ flow, via
//!   [`ClientCredentialsTokenSource`][sources::oauth2::ClientCredentialsTokenSource];
//! * workload identity federation, via
//!   [`IdentityFederationTokenSource`][sources::federation::IdentityFederationTokenSource],
//!   which trades an identity token from an application-supplied
//!   [`IdTokenProvider`][provider::IdTokenProvider] for an access token.
//!
//! Refreshes happen lazily, inline with the request that first observes an
//! expired access token. There is no background refresh task. A token is
//! considered expired a safety margin (five minutes by default) before the
//! end of the lifetime declared by the authority, so that it does not expire
//! while a request is in flight.
//!
//! Token sources are shared between concurrent requests by wrapping them in a
//! [`SharedTokenSource`], which serializes refreshes so that concurrent
//! requests observing the same expired token cause a single exchange.
//!
//! ```
//! use tsapi_tokens::{
//!     provider::StaticIdToken,
//!     sources::federation::{IdentityFederationConfig, IdentityFederationTokenSource},
//!     SharedTokenSource,
//! };
//!
//! # fn id_token() -> String { "header.payload.signature".to_owned() }
//! let config = IdentityFederationConfig::builder("https://api.tailscale.com".parse().unwrap())
//!     .client_id("my-client-id")
//!     .id_token_provider(StaticIdToken::new(id_token()))
//!     .build()
//!     .unwrap();
//!
//! let tokens = SharedTokenSource::lazy(IdentityFederationTokenSource::new(config));
//! # /* Commented out due to this trying to interact with the world.
//! let token = tokens.token().await?;
//! # */
//! ```
//!
//! Identity tokens are inspected only to read their `exp` claim (see
//! [`claims`]); their signatures are never verified locally.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod claims;
pub mod provider;
mod shared;
pub mod sources;
mod tokens;

pub use braids::*;
pub use shared::{RefreshError, SharedTokenSource};
pub use tokens::{TokenLifetimeConfig, TokenStatus, TokenWithLifetime, BEARER};
