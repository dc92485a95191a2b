//! A token cell shared by every request sent through one client
//!
//! The cell guards both the token source (including whatever the source
//! caches internally, such as an identity token) and the most recently issued
//! access token with a single lock. Refreshes are lazy: the first caller to
//! observe an expired access token performs the refresh while holding the
//! lock. Callers that arrive in the meantime wait on the lock and, once they
//! acquire it, find the refreshed token already in place.
//!
//! The refresh itself runs on a spawned task that owns the lock guard. If the
//! caller that triggered it is cancelled, the refresh still runs to completion
//! and its result is cached for everyone else.

use std::{fmt, sync::Arc};

use thiserror::Error;
use tokio::sync::Mutex;
use tsapi_clock::{Clock, System};

use crate::{sources::AsyncTokenSource, TokenStatus, TokenWithLifetime};

/// An error while obtaining a token from a shared token cell
#[derive(Debug, Error)]
pub enum RefreshError<E> {
    /// The underlying token source failed
    #[error(transparent)]
    Source(E),
    /// The refresh task panicked or was cancelled by the runtime
    #[error("token refresh was aborted before completing")]
    Aborted(#[source] tokio::task::JoinError),
}

impl<E> RefreshError<E> {
    /// The underlying token source error, if that is what failed
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::Source(err) => Some(err),
            Self::Aborted(_) => None,
        }
    }
}

struct Inner<S> {
    source: S,
    token: Option<Arc<TokenWithLifetime>>,
}

/// A token source shared across concurrent callers
///
/// Cloning is cheap; clones share the same lock and cached token.
pub struct SharedTokenSource<S, C = System> {
    inner: Arc<Mutex<Inner<S>>>,
    clock: C,
}

impl<S> SharedTokenSource<S, System> {
    /// Wraps a token source without requesting a token
    ///
    /// The first call to [`token()`][Self::token()] will request one.
    pub fn lazy(source: S) -> Self {
        Self::lazy_with_clock(source, System)
    }

    /// Wraps a token source, requesting a token immediately
    ///
    /// Any error is returned here rather than on first use.
    pub async fn from_token_source(source: S) -> Result<Self, RefreshError<S::Error>>
    where
        S: AsyncTokenSource + 'static,
    {
        Self::from_token_source_with_clock(source, System).await
    }
}

impl<S, C> SharedTokenSource<S, C> {
    /// Wraps a token source using the given clock, without requesting a token
    pub fn lazy_with_clock(source: S, clock: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                source,
                token: None,
            })),
            clock,
        }
    }

    /// Wraps a token source using the given clock, requesting a token immediately
    pub async fn from_token_source_with_clock(
        source: S,
        clock: C,
    ) -> Result<Self, RefreshError<S::Error>>
    where
        S: AsyncTokenSource + 'static,
        C: Clock,
    {
        let shared = Self::lazy_with_clock(source, clock);
        shared.token().await?;
        Ok(shared)
    }

    /// The clock used to judge token freshness
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Inspects the currently cached token without refreshing it
    pub async fn cached_token(&self) -> Option<Arc<TokenWithLifetime>> {
        self.inner.lock().await.token.clone()
    }

    /// Runs `f` against the wrapped token source while holding the lock
    ///
    /// Useful for inspecting or resetting state cached inside the source.
    pub async fn with_source<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut inner = self.inner.lock().await;
        f(&mut inner.source)
    }

    /// Discards the cached access token so the next call refreshes
    pub async fn invalidate(&self) {
        self.inner.lock().await.token = None;
    }
}

impl<S, C> SharedTokenSource<S, C>
where
    S: AsyncTokenSource + 'static,
    C: Clock,
{
    /// Gets a fresh token, refreshing it first if needed
    pub async fn token(&self) -> Result<Arc<TokenWithLifetime>, RefreshError<S::Error>> {
        let guard = Arc::clone(&self.inner).lock_owned().await;

        if let Some(token) = &guard.token {
            if token.token_status_with_clock(&self.clock) == TokenStatus::Fresh {
                return Ok(Arc::clone(token));
            }

            tracing::debug!(
                token.expiry = token.expiry().0,
                "cached access token has expired, refreshing"
            );
        } else {
            tracing::debug!("no cached access token, requesting one");
        }

        let refresh = tokio::spawn(async move {
            let mut guard = guard;
            let token = Arc::new(guard.source.request_token().await?);
            guard.token = Some(Arc::clone(&token));
            Ok::<_, S::Error>(token)
        });

        match refresh.await {
            Ok(result) => result.map_err(RefreshError::Source),
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn std::error::Error),
                    "token refresh task failed"
                );
                Err(RefreshError::Aborted(error))
            }
        }
    }
}

impl<S, C: Clone> Clone for SharedTokenSource<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            clock: self.clock.clone(),
        }
    }
}

impl<S, C: fmt::Debug> fmt::Debug for SharedTokenSource<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTokenSource")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
