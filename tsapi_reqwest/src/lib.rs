//! Middleware to automatically attach credentials to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to obtain
//! a fresh access token from a [`SharedTokenSource`] for each outbound
//! request. An expired token is refreshed inline before the request is
//! forwarded; concurrent requests share a single refresh.
//!
//! Any `Authorization` header already present on the request is replaced.
//!
//! ```
//! use tsapi_reqwest::AccessTokenMiddleware;
//! use tsapi_tokens::{
//!     provider::StaticIdToken,
//!     sources::federation::{IdentityFederationConfig, IdentityFederationTokenSource},
//!     SharedTokenSource,
//! };
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # fn main() {
//! let config = IdentityFederationConfig::builder("https://api.tailscale.com".parse().unwrap())
//!     .client_id("my-client-id")
//!     .id_token_provider(StaticIdToken::new("header.payload.signature"))
//!     .build()
//!     .unwrap();
//! let tokens = SharedTokenSource::lazy(IdentityFederationTokenSource::new(config));
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(tokens))
//!     .build();
//!
//! let req = client
//!     .get("https://api.tailscale.com/api/v2/tailnet/-/devices");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The middleware can also be configured to add an authorization token
//! only conditionally, using any [`Predicate`] over the outgoing
//! [`Request`]. This can be useful in the event that a single middleware
//! stack is shared by multiple backends and tokens must only be sent to
//! specific ones.
//!
//! Static API keys need no token management and are attached as HTTP basic
//! authentication by the [`BasicAuthMiddleware`].

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use aliri_base64::Base64;
use bytes::{BufMut, BytesMut};
use predicates::{constant::BooleanPredicate, prelude::*};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Error, Middleware, Next, Result};
use tsapi_clock::{Clock, System};
use tsapi_tokens::{sources::AsyncTokenSource, ApiKey, SharedTokenSource};

/// A middleware that injects an access token into outgoing requests
pub struct AccessTokenMiddleware<S, C = System, P = BooleanPredicate> {
    tokens: SharedTokenSource<S, C>,
    predicate: P,
}

impl<S, C> AccessTokenMiddleware<S, C, BooleanPredicate> {
    /// Construct a new middleware from a shared token source
    ///
    /// By default, this middleware attaches its token to every request. To
    /// change this behavior, provide a custom predicate with
    /// [`with_predicate()`][Self::with_predicate()].
    pub fn new(tokens: SharedTokenSource<S, C>) -> Self {
        Self {
            tokens,
            predicate: predicate::always(),
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<S, C, P> {
        AccessTokenMiddleware {
            tokens: self.tokens,
            predicate,
        }
    }
}

impl<S, C, P> AccessTokenMiddleware<S, C, P> {
    /// The shared token source backing this middleware
    pub fn tokens(&self) -> &SharedTokenSource<S, C> {
        &self.tokens
    }
}

impl<S, C, P> AccessTokenMiddleware<S, C, P>
where
    S: AsyncTokenSource + 'static,
    C: Clock,
{
    async fn get_token_from_source(&self) -> Result<header::HeaderValue> {
        let token = self.tokens.token().await.map_err(Error::middleware)?;

        if tracing::enabled!(tracing::Level::TRACE) {
            let now = self.tokens.clock().now();

            tracing::trace!(
                token.status = ?token.token_status_at(now),
                token.lifetime = token.lifetime().0,
                token.issued = token.issued().0,
                token.expiry = token.expiry().0,
                token.until_expired = token.until_expired_at(now).0,
                "obtained access token"
            );
        }

        sensitive_header(b"Bearer ", token.access_token().as_str().as_bytes())
    }
}

fn sensitive_header(scheme: &[u8], credential: &[u8]) -> Result<header::HeaderValue> {
    let mut header_value = BytesMut::with_capacity(scheme.len() + credential.len());
    header_value.put_slice(scheme);
    header_value.put_slice(credential);
    let mut value =
        header::HeaderValue::from_maybe_shared(header_value.freeze()).map_err(Error::middleware)?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait::async_trait]
impl<S, C, P> Middleware for AccessTokenMiddleware<S, C, P>
where
    S: AsyncTokenSource + 'static,
    C: Clock + Send + Sync + 'static,
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) {
            let value = self.get_token_from_source().await?;
            req.headers_mut().insert(header::AUTHORIZATION, value);
        }

        next.run(req, extensions).await
    }
}

impl<S, C: Clone, P: Clone> Clone for AccessTokenMiddleware<S, C, P> {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<S, C: fmt::Debug, P: fmt::Debug> fmt::Debug for AccessTokenMiddleware<S, C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenMiddleware")
            .field("tokens", &self.tokens)
            .field("predicate", &self.predicate)
            .finish()
    }
}

/// A middleware that authenticates every request with a static API key
///
/// The key is sent as the username of HTTP basic authentication, with an
/// empty password.
#[derive(Clone, Debug)]
pub struct BasicAuthMiddleware {
    api_key: ApiKey,
}

impl BasicAuthMiddleware {
    /// Construct a new middleware from an API key
    pub fn new(api_key: ApiKey) -> Self {
        Self { api_key }
    }

    fn header_value(&self) -> Result<header::HeaderValue> {
        let encoded = Base64::from_raw(format!("{}:", self.api_key.as_str())).to_string();
        sensitive_header(b"Basic ", encoded.as_bytes())
    }
}

#[async_trait::async_trait]
impl Middleware for BasicAuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let value = self.header_value()?;
        req.headers_mut().insert(header::AUTHORIZATION, value);

        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;
    use tsapi_clock::{DurationSecs, TestClock, UnixTime};
    use tsapi_tokens::{AccessToken, TokenLifetimeConfig, TokenWithLifetime, BEARER};

    use super::*;

    const BEARER_TEST_TOKEN: &str = "Bearer tok1";

    #[derive(Debug)]
    struct SourceFailed;

    impl fmt::Display for SourceFailed {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("token endpoint unavailable")
        }
    }

    impl std::error::Error for SourceFailed {}

    struct NumberedTokenSource {
        calls: Arc<AtomicUsize>,
        fail: bool,
        lifetime_config: TokenLifetimeConfig<TestClock>,
    }

    #[async_trait::async_trait]
    impl AsyncTokenSource for NumberedTokenSource {
        type Error = SourceFailed;

        async fn request_token(&mut self) -> std::result::Result<TokenWithLifetime, SourceFailed> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(SourceFailed);
            }
            Ok(self.lifetime_config.create_token(
                AccessToken::new(format!("tok{}", n)),
                BEARER,
                None,
                DurationSecs(3600),
            ))
        }
    }

    struct Prepared {
        clock: TestClock,
        calls: Arc<AtomicUsize>,
        middleware: AccessTokenMiddleware<NumberedTokenSource, TestClock>,
    }

    fn prepare_middleware(fail: bool) -> Prepared {
        let clock = TestClock::new(UnixTime(1_000));
        let calls = Arc::new(AtomicUsize::new(0));
        let source = NumberedTokenSource {
            calls: calls.clone(),
            fail,
            lifetime_config: TokenLifetimeConfig::default().with_clock(clock.clone()),
        };

        Prepared {
            clock: clock.clone(),
            calls,
            middleware: AccessTokenMiddleware::new(SharedTokenSource::lazy_with_clock(
                source, clock,
            )),
        }
    }

    struct AuthChecker {
        expected_authorization: String,
        checked: AtomicBool,
    }

    impl AuthChecker {
        pub fn new(expected: impl Into<String>) -> Self {
            Self {
                expected_authorization: expected.into(),
                checked: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Middleware for AuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let authorization_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .expect("no authorization header");

            assert!(authorization_header.is_sensitive());
            assert_eq!(
                authorization_header
                    .to_str()
                    .expect("authorization header was not valid UTF-8"),
                self.expected_authorization
            );
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    #[derive(Default)]
    struct NoAuthChecker {
        checked: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for NoAuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            assert_eq!(req.headers().get(header::AUTHORIZATION), None);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    mod when_request_does_not_have_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_with_defaults_attaches_token_on_any_request() {
            let prepared = prepare_middleware(false);
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(prepared.middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("http://example.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        mod and_predicate_evaluates_to_attach {
            use super::*;

            #[tokio::test]
            async fn middleware_attaches_access_token() {
                let middleware = prepare_middleware(false)
                    .middleware
                    .with_predicate(predicate::always());
                let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("https://example.com").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }

        mod and_predicate_evaluates_to_ignore {
            use super::*;

            #[tokio::test]
            async fn middleware_does_not_attach_access_token() {
                let prepared = prepare_middleware(false);
                let middleware = prepared.middleware.with_predicate(predicate::never());
                let auth_checker = Arc::new(NoAuthChecker::default());

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("https://example.com").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
                assert_eq!(prepared.calls.load(Ordering::SeqCst), 0);
            }
        }
    }

    mod when_request_already_contains_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_replaces_it_with_the_access_token() {
            let prepared = prepare_middleware(false);
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(prepared.middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get("https://example.com")
                .bearer_auth("overridden!")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }
    }

    mod when_token_source_fails {
        use super::*;

        #[tokio::test]
        async fn request_is_not_forwarded_and_error_is_preserved() {
            let prepared = prepare_middleware(true);
            let auth_checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(prepared.middleware)
                .with_arc(auth_checker.clone())
                .build();

            let err = client
                .get("https://example.com")
                .send()
                .await
                .unwrap_err();

            assert!(matches!(err, Error::Middleware(_)));
            assert!(err.to_string().contains("token endpoint unavailable"));
            assert!(!auth_checker.checked.load(Ordering::Acquire));
        }
    }

    mod when_token_expires_between_requests {
        use super::*;
        use wiremock::{
            matchers::{header as header_eq, method},
            Mock, MockServer, ResponseTemplate,
        };

        #[tokio::test]
        async fn next_request_carries_a_refreshed_token() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(header_eq("authorization", "Bearer tok1"))
                .respond_with(ResponseTemplate::new(200))
                .expect(2)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(header_eq("authorization", "Bearer tok2"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;

            let prepared = prepare_middleware(false);
            let client = ClientBuilder::new(Client::default())
                .with(prepared.middleware)
                .build();

            for _ in 0..2 {
                let resp = client.get(server.uri()).send().await.unwrap();
                assert_eq!(resp.status(), http::StatusCode::OK);
            }

            prepared.clock.advance(DurationSecs(3600));
            let resp = client.get(server.uri()).send().await.unwrap();
            assert_eq!(resp.status(), http::StatusCode::OK);

            assert_eq!(prepared.calls.load(Ordering::SeqCst), 2);
        }
    }

    mod basic_auth_middleware {
        use super::*;

        #[tokio::test]
        async fn attaches_api_key_as_basic_auth_username() {
            // base64("tskey-api-abc:")
            let auth_checker = Arc::new(AuthChecker::new("Basic dHNrZXktYXBpLWFiYzo="));

            let client = ClientBuilder::new(Client::default())
                .with(BasicAuthMiddleware::new(ApiKey::from_static("tskey-api-abc")))
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }
    }
}
