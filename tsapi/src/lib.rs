//! A typed client for the Tailscale administrative API
//!
//! A [`Client`] owns exactly one credential strategy ([`Auth`]). Every request
//! sent through the client passes through a middleware stack that attaches
//! the credentials, acquiring and renewing access tokens on demand:
//!
//! * [`Auth::ApiKey`] sends the key as HTTP basic authentication;
//! * [`Auth::OAuth`] uses the OAuth2 client credentials flow, requesting an
//!   access token on the first request;
//! * [`Auth::IdentityFederation`] exchanges identity tokens obtained from an
//!   application-supplied provider for access tokens. The first exchange
//!   happens while the client is built.
//!
//! ```no_run
//! use tsapi::{Client, IdentityFederation};
//! use tsapi_tokens::provider;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), tsapi::Error> {
//! let client = Client::builder(
//!     IdentityFederation::new()
//!         .client_id("my-client-id")
//!         .id_token_provider(provider::from_fn(|| std::env::var("ID_TOKEN"))),
//! )
//! .tailnet("example.com")
//! .build()
//! .await?;
//!
//! let keys: serde_json::Value = client.get(client.build_tailnet_url(["keys"])).await?;
//! # Ok(()) }
//! ```

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

mod auth;
mod client;
mod error;

pub use auth::{Auth, IdentityFederation, OAuth};
pub use client::{
    Client, ClientBuilder, DEFAULT_BASE_URL, DEFAULT_HTTP_TIMEOUT, DEFAULT_TAILNET,
    DEFAULT_USER_AGENT,
};
pub use error::{ApiError, ApiErrorData, Error};
