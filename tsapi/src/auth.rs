//! Credential strategies
//!
//! A [`Client`][crate::Client] is built with exactly one [`Auth`]. The
//! strategy is consumed when the client is built and cannot be changed
//! afterwards.

use std::{fmt, sync::Arc};

use tsapi_clock::DurationSecs;
use tsapi_tokens::{
    provider::IdTokenProvider, ApiKey, ClientId, ClientSecret, TokenLifetimeConfig,
};

/// How a client authenticates to the API
#[derive(Clone, Debug)]
pub enum Auth {
    /// A static API key, sent with every request as HTTP basic authentication
    ApiKey(ApiKey),
    /// OAuth2 client credentials, exchanged for short-lived access tokens
    OAuth(OAuth),
    /// Workload identity federation, exchanging identity tokens for access tokens
    IdentityFederation(IdentityFederation),
}

impl Auth {
    /// Authenticates with a static API key
    pub fn api_key(key: impl Into<ApiKey>) -> Self {
        Self::ApiKey(key.into())
    }
}

impl From<OAuth> for Auth {
    fn from(oauth: OAuth) -> Self {
        Self::OAuth(oauth)
    }
}

impl From<IdentityFederation> for Auth {
    fn from(federation: IdentityFederation) -> Self {
        Self::IdentityFederation(federation)
    }
}

/// OAuth2 client credentials
///
/// Access tokens are requested lazily, on the first API request.
#[derive(Clone, Debug)]
pub struct OAuth {
    pub(crate) client_id: Option<ClientId>,
    pub(crate) client_secret: ClientSecret,
    pub(crate) scopes: Vec<String>,
    pub(crate) lifetime_config: TokenLifetimeConfig,
}

impl OAuth {
    /// Uses the given client secret
    ///
    /// Unless a client ID is set explicitly, it is derived from a secret of
    /// the form `tskey-client-{id}-{rest}`.
    pub fn new(client_secret: impl Into<ClientSecret>) -> Self {
        Self {
            client_id: None,
            client_secret: client_secret.into(),
            scopes: Vec::new(),
            lifetime_config: TokenLifetimeConfig::default(),
        }
    }

    /// Sets the client ID explicitly
    pub fn client_id(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the scopes to request
    pub fn scopes<I>(mut self, scopes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets how long before its declared expiry a token is renewed
    pub fn safety_margin(mut self, safety_margin: DurationSecs) -> Self {
        self.lifetime_config = TokenLifetimeConfig::new(safety_margin);
        self
    }
}

/// Workload identity federation
///
/// Building a client with this strategy performs one full token exchange, so
/// that misconfiguration is reported at construction rather than on the
/// first API request.
#[derive(Clone, Default)]
pub struct IdentityFederation {
    pub(crate) client_id: Option<ClientId>,
    pub(crate) provider: Option<Arc<dyn IdTokenProvider>>,
    pub(crate) lifetime_config: TokenLifetimeConfig,
}

impl IdentityFederation {
    /// Starts an empty federation configuration
    ///
    /// Both a client ID and an ID token provider must be set before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the client ID registered for federation
    pub fn client_id(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the provider consulted whenever a new identity token is needed
    pub fn id_token_provider(mut self, provider: impl IdTokenProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Sets a provider that is already shared elsewhere
    pub fn shared_id_token_provider(mut self, provider: Arc<dyn IdTokenProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets how long before its declared expiry an access token is renewed
    pub fn safety_margin(mut self, safety_margin: DurationSecs) -> Self {
        self.lifetime_config = TokenLifetimeConfig::new(safety_margin);
        self
    }
}

impl fmt::Debug for IdentityFederation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityFederation")
            .field("client_id", &self.client_id)
            .field("has_provider", &self.provider.is_some())
            .field("lifetime_config", &self.lifetime_config)
            .finish()
    }
}
