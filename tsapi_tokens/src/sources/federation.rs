//! A token source that exchanges workload identity tokens for access tokens
//!
//! The configuration ([`IdentityFederationConfig`]) is immutable once built.
//! The only mutable state, the most recently fetched identity token, lives in
//! [`IdentityFederationTokenSource`], which is expected to be driven from
//! behind a [`SharedTokenSource`][crate::SharedTokenSource] so that the
//! cached identity token and the cached access token are only ever touched
//! under the same lock.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tsapi_clock::{Clock, System, UnixTime};

use super::{
    exchange::{self, ExchangeError},
    AsyncTokenSource,
};
use crate::{
    claims::{self, IdTokenError},
    provider::{BoxError, IdTokenProvider},
    ClientId, ClientIdRef, IdToken, IdTokenRef, TokenLifetimeConfig, TokenWithLifetime,
};

/// A federation configuration that cannot be used
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No client ID, or an empty one, was configured
    #[error("identity federation requires a non-empty client ID")]
    MissingClientId,
    /// No identity token provider was configured
    #[error("identity federation requires an ID token provider")]
    MissingIdTokenProvider,
}

/// An error while obtaining an access token through identity federation
#[derive(Debug, Error)]
pub enum FederationError {
    /// The identity token provider failed
    #[error("failed to fetch ID token: {0}")]
    IdentityFetch(#[source] BoxError),
    /// The identity token returned by the provider cannot be used
    #[error("fetched ID token is invalid: {0}")]
    InvalidIdToken(#[source] IdTokenError),
    /// The token exchange failed
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Immutable configuration for identity federation
#[derive(Clone)]
pub struct IdentityFederationConfig {
    client: reqwest::Client,
    exchange_url: reqwest::Url,
    client_id: ClientId,
    provider: Arc<dyn IdTokenProvider>,
}

impl IdentityFederationConfig {
    /// Starts building a configuration against the API at `base_url`
    pub fn builder(base_url: reqwest::Url) -> IdentityFederationConfigBuilder {
        IdentityFederationConfigBuilder {
            base_url,
            client: None,
            client_id: None,
            provider: None,
        }
    }

    /// The client ID presented during the exchange
    #[inline]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The token-exchange endpoint
    #[inline]
    pub fn exchange_url(&self) -> &reqwest::Url {
        &self.exchange_url
    }
}

impl fmt::Debug for IdentityFederationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityFederationConfig")
            .field("exchange_url", &self.exchange_url.as_str())
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Builder for [`IdentityFederationConfig`]
pub struct IdentityFederationConfigBuilder {
    base_url: reqwest::Url,
    client: Option<reqwest::Client>,
    client_id: Option<ClientId>,
    provider: Option<Arc<dyn IdTokenProvider>>,
}

impl IdentityFederationConfigBuilder {
    /// Sets the client ID registered for federation
    pub fn client_id(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the provider consulted whenever a new identity token is required
    pub fn id_token_provider(mut self, provider: impl IdTokenProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Sets a provider that is already shared elsewhere
    pub fn shared_id_token_provider(mut self, provider: Arc<dyn IdTokenProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the HTTP client used for the exchange
    ///
    /// This should be the same undecorated client that carries API requests,
    /// so that proxy and TLS settings apply to the exchange as well.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Validates and builds the configuration
    ///
    /// No network requests are made.
    pub fn build(self) -> Result<IdentityFederationConfig, ConfigError> {
        let client_id = self
            .client_id
            .filter(|id| !id.as_str().is_empty())
            .ok_or(ConfigError::MissingClientId)?;
        let provider = self.provider.ok_or(ConfigError::MissingIdTokenProvider)?;

        Ok(IdentityFederationConfig {
            client: self.client.unwrap_or_default(),
            exchange_url: exchange::exchange_url(&self.base_url),
            client_id,
            provider,
        })
    }
}

impl fmt::Debug for IdentityFederationConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityFederationConfigBuilder")
            .field("base_url", &self.base_url.as_str())
            .field("client_id", &self.client_id)
            .field("has_provider", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

/// An identity token that has passed expiry validation
#[derive(Clone, Debug)]
pub struct CachedIdToken {
    token: IdToken,
    expiry: UnixTime,
}

impl CachedIdToken {
    /// The identity token
    #[inline]
    pub fn token(&self) -> &IdTokenRef {
        &self.token
    }

    /// The expiry parsed from the token's `exp` claim
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }
}

/// A token source performing identity federation token exchanges
#[derive(Debug)]
pub struct IdentityFederationTokenSource<C = System> {
    config: Arc<IdentityFederationConfig>,
    lifetime_config: TokenLifetimeConfig<C>,
    id_token: Option<CachedIdToken>,
}

impl IdentityFederationTokenSource<System> {
    /// Constructs a new identity federation token source
    pub fn new(config: IdentityFederationConfig) -> Self {
        Self::with_lifetime_config(config, TokenLifetimeConfig::default())
    }
}

impl<C> IdentityFederationTokenSource<C> {
    /// Constructs a new token source with a custom lifetime configuration
    pub fn with_lifetime_config(
        config: IdentityFederationConfig,
        lifetime_config: TokenLifetimeConfig<C>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            lifetime_config,
            id_token: None,
        }
    }

    /// The configuration this source was built from
    #[inline]
    pub fn config(&self) -> &IdentityFederationConfig {
        &self.config
    }

    /// The currently cached identity token, if any
    #[inline]
    pub fn cached_id_token(&self) -> Option<&CachedIdToken> {
        self.id_token.as_ref()
    }

    /// Discards the cached identity token, forcing the next request to consult the provider
    pub fn clear_cached_id_token(&mut self) {
        self.id_token = None;
    }
}

impl<C: Clock> IdentityFederationTokenSource<C> {
    /// Returns a usable identity token, fetching a new one only if the cached
    /// token is absent or no longer valid
    async fn current_id_token(&mut self) -> Result<IdToken, FederationError> {
        let now = self.lifetime_config.clock().now();

        if let Some(cached) = &self.id_token {
            match claims::validate_expiry_at(&cached.token, now) {
                Ok(_) => return Ok(cached.token.clone()),
                Err(error) => {
                    tracing::debug!(
                        error = (&error as &dyn std::error::Error),
                        "cached ID token is no longer usable, fetching a new one"
                    );
                }
            }
        }

        let token = self
            .config
            .provider
            .fetch()
            .await
            .map_err(FederationError::IdentityFetch)?;

        let expiry = claims::validate_expiry_at(&token, self.lifetime_config.clock().now())
            .map_err(FederationError::InvalidIdToken)?;

        tracing::debug!(id_token.expiry = expiry.0, "fetched new ID token");

        self.id_token = Some(CachedIdToken {
            token: token.clone(),
            expiry,
        });

        Ok(token)
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AsyncTokenSource for IdentityFederationTokenSource<C> {
    type Error = FederationError;

    async fn request_token(&mut self) -> Result<TokenWithLifetime, Self::Error> {
        let id_token = self.current_id_token().await?;

        let token = exchange::exchange_token(
            &self.config.client,
            self.config.exchange_url.clone(),
            &self.config.client_id,
            &id_token,
            &self.lifetime_config,
        )
        .await?;

        Ok(token)
    }
}
