//! Sources of identity tokens for workload identity federation

use std::{error, fmt, future::Future};

use async_trait::async_trait;

use crate::IdToken;

/// A boxed error returned by an identity token provider
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// A provider of identity tokens, supplied by the embedding application
///
/// Implementations may read a token from the local filesystem, call out to a
/// metadata service, or return a constant. A provider is only consulted when
/// no cached identity token is usable.
#[async_trait]
pub trait IdTokenProvider: Send + Sync {
    /// Fetches a new identity token
    async fn fetch(&self) -> Result<IdToken, BoxError>;
}

/// A provider which always returns the same identity token
#[derive(Clone, Debug)]
pub struct StaticIdToken(IdToken);

impl StaticIdToken {
    /// Constructs a provider returning `token` on every fetch
    pub fn new(token: impl Into<IdToken>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl IdTokenProvider for StaticIdToken {
    async fn fetch(&self) -> Result<IdToken, BoxError> {
        Ok(self.0.clone())
    }
}

/// Constructs a provider from a synchronous closure
///
/// ```
/// use tsapi_tokens::provider::{self, IdTokenProvider};
///
/// let provider = provider::from_fn(|| std::env::var("ID_TOKEN"));
/// # let _: &dyn IdTokenProvider = &provider;
/// ```
pub fn from_fn<F, T, E>(f: F) -> FnProvider<F>
where
    F: Fn() -> Result<T, E> + Send + Sync,
    T: Into<IdToken>,
    E: Into<BoxError>,
{
    FnProvider(f)
}

/// Constructs a provider from a closure returning a future
pub fn from_async_fn<F, Fut, T, E>(f: F) -> AsyncFnProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Into<IdToken>,
    E: Into<BoxError>,
{
    AsyncFnProvider(f)
}

/// A provider backed by a synchronous closure
pub struct FnProvider<F>(F);

impl<F> fmt::Debug for FnProvider<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnProvider")
    }
}

#[async_trait]
impl<F, T, E> IdTokenProvider for FnProvider<F>
where
    F: Fn() -> Result<T, E> + Send + Sync,
    T: Into<IdToken>,
    E: Into<BoxError>,
{
    async fn fetch(&self) -> Result<IdToken, BoxError> {
        (self.0)().map(Into::into).map_err(Into::into)
    }
}

/// A provider backed by a closure returning a future
pub struct AsyncFnProvider<F>(F);

impl<F> fmt::Debug for AsyncFnProvider<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncFnProvider")
    }
}

#[async_trait]
impl<F, Fut, T, E> IdTokenProvider for AsyncFnProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Into<IdToken>,
    E: Into<BoxError>,
{
    async fn fetch(&self) -> Result<IdToken, BoxError> {
        (self.0)().await.map(Into::into).map_err(Into::into)
    }
}
