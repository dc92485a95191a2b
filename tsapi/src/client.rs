use std::{fmt, time::Duration};

use reqwest::{header, Method, Url};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tsapi_reqwest::{AccessTokenMiddleware, BasicAuthMiddleware};
use tsapi_tokens::{
    sources::{
        federation::{IdentityFederationConfig, IdentityFederationTokenSource},
        oauth2::{
            dto::{ClientCredentials, ClientCredentialsWithScopes},
            token_url, ClientCredentialsTokenSource,
        },
    },
    SharedTokenSource,
};

use crate::{
    auth::{Auth, IdentityFederation, OAuth},
    ApiError, Error,
};

/// The API server used unless another is configured
pub const DEFAULT_BASE_URL: &str = "https://api.tailscale.com";

/// The `User-Agent` sent unless another is configured
pub const DEFAULT_USER_AGENT: &str = concat!("tsapi-rust/", env!("CARGO_PKG_VERSION"));

/// The tailnet addressed unless another is configured
///
/// `-` refers to the default tailnet of the authenticated principal.
pub const DEFAULT_TAILNET: &str = "-";

/// The request timeout of the HTTP client created when none is supplied
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Builder for a [`Client`]
#[derive(Debug)]
pub struct ClientBuilder {
    auth: Auth,
    base_url: Option<Url>,
    user_agent: Option<String>,
    tailnet: Option<String>,
    http_client: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Starts building a client that authenticates with `auth`
    pub fn new(auth: impl Into<Auth>) -> Self {
        Self {
            auth: auth.into(),
            base_url: None,
            user_agent: None,
            tailnet: None,
            http_client: None,
        }
    }

    /// Sets the API server
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Sets the `User-Agent` header sent with every request
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the tailnet addressed by [`Client::build_tailnet_url()`]
    pub fn tailnet(mut self, tailnet: impl Into<String>) -> Self {
        self.tailnet = Some(tailnet.into());
        self
    }

    /// Sets the underlying HTTP client
    ///
    /// The client is used both for API requests and for credential exchanges.
    /// Credentials are layered on top of it; it is never replaced.
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Builds the client
    ///
    /// With [`Auth::IdentityFederation`], this performs one token exchange and
    /// fails if it does.
    pub async fn build(self) -> Result<Client, Error> {
        let base_url = match self.base_url {
            Some(url) => url,
            None => Url::parse(DEFAULT_BASE_URL)?,
        };
        if base_url.cannot_be_a_base() {
            return Err(Error::CannotBeABase(base_url));
        }

        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(DEFAULT_HTTP_TIMEOUT)
                .build()?,
        };

        let http = match self.auth {
            Auth::ApiKey(api_key) => reqwest_middleware::ClientBuilder::new(http_client)
                .with(BasicAuthMiddleware::new(api_key))
                .build(),
            Auth::OAuth(oauth) => oauth_client(oauth, http_client, &base_url),
            Auth::IdentityFederation(federation) => {
                federation_client(federation, http_client, &base_url).await?
            }
        };

        Ok(Client {
            base_url,
            user_agent: self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
            tailnet: self.tailnet.unwrap_or_else(|| DEFAULT_TAILNET.to_owned()),
            http,
        })
    }
}

fn oauth_client(
    oauth: OAuth,
    http_client: reqwest::Client,
    base_url: &Url,
) -> ClientWithMiddleware {
    let credentials = match oauth.client_id {
        Some(client_id) => ClientCredentials {
            client_id,
            client_secret: oauth.client_secret,
        },
        None => ClientCredentials::from_secret(oauth.client_secret),
    };

    let source = ClientCredentialsTokenSource::new(
        http_client.clone(),
        token_url(base_url),
        ClientCredentialsWithScopes {
            credentials: credentials.into(),
            scopes: oauth.scopes,
        },
        oauth.lifetime_config,
    );

    reqwest_middleware::ClientBuilder::new(http_client)
        .with(AccessTokenMiddleware::new(SharedTokenSource::lazy(source)))
        .build()
}

async fn federation_client(
    federation: IdentityFederation,
    http_client: reqwest::Client,
    base_url: &Url,
) -> Result<ClientWithMiddleware, Error> {
    let mut config =
        IdentityFederationConfig::builder(base_url.clone()).http_client(http_client.clone());
    if let Some(client_id) = federation.client_id {
        config = config.client_id(client_id);
    }
    if let Some(provider) = federation.provider {
        config = config.shared_id_token_provider(provider);
    }
    let config = config.build()?;

    tracing::debug!(
        client_id = %config.client_id(),
        exchange_url = %config.exchange_url(),
        "validating identity federation configuration"
    );

    let source =
        IdentityFederationTokenSource::with_lifetime_config(config, federation.lifetime_config);
    let tokens = SharedTokenSource::from_token_source(source).await?;

    Ok(reqwest_middleware::ClientBuilder::new(http_client)
        .with(AccessTokenMiddleware::new(tokens))
        .build())
}

/// A client for the administrative API
///
/// Cloning is cheap; clones share the same credentials and token cache.
#[derive(Clone)]
pub struct Client {
    base_url: Url,
    user_agent: String,
    tailnet: String,
    http: ClientWithMiddleware,
}

impl Client {
    /// Starts building a client that authenticates with `auth`
    pub fn builder(auth: impl Into<Auth>) -> ClientBuilder {
        ClientBuilder::new(auth)
    }

    /// The API server
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The tailnet addressed by [`build_tailnet_url()`][Self::build_tailnet_url()]
    pub fn tailnet(&self) -> &str {
        &self.tailnet
    }

    /// Builds `{base}/api/v2/{segments...}`
    ///
    /// Each segment is escaped as a single path segment, so a segment
    /// containing `/` stays one segment.
    pub fn build_url<I>(&self, segments: I) -> Url
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        let mut url = self.base_url.clone();
        // `build()` rejects base URLs that cannot take path segments
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v2"]);
            path.extend(segments.into_iter().map(|s| s.to_string()));
        }
        url
    }

    /// Builds `{base}/api/v2/tailnet/{tailnet}/{segments...}`
    pub fn build_tailnet_url<I>(&self, segments: I) -> Url
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        let prefix = ["tailnet".to_owned(), self.tailnet.clone()];
        self.build_url(prefix.into_iter().chain(segments.into_iter().map(|s| s.to_string())))
    }

    /// Sends a `GET` and decodes the JSON response
    pub async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        self.send(self.request(Method::GET, url)).await
    }

    /// Sends a `POST` with a JSON body and decodes the JSON response
    pub async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(self.request_with_body(Method::POST, url, body)).await
    }

    /// Sends a `DELETE`, ignoring any response body
    pub async fn delete(&self, url: Url) -> Result<(), Error> {
        self.send::<serde::de::IgnoredAny>(self.request(Method::DELETE, url))
            .await
            .map(drop)
    }

    /// Starts a request without a body
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::ACCEPT, "application/json")
    }

    /// Starts a request with a JSON body
    pub fn request_with_body<B>(&self, method: Method, url: Url, body: &B) -> RequestBuilder
    where
        B: Serialize + ?Sized,
    {
        self.http
            .request(method, url)
            .header(header::USER_AGENT, &self.user_agent)
            .json(body)
    }

    /// Sends a request and decodes its response
    ///
    /// A 2xx response is decoded as JSON; an empty body decodes as `null`, so
    /// `()` and `Option<_>` accept it. A response with status 400 or above
    /// becomes an [`ApiError`].
    pub async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, Error> {
        let resp = request.send().await?;
        let status = resp.status();
        let url = resp.url().clone();
        let body = resp.bytes().await?;

        tracing::debug!(
            response.status = status.as_u16(),
            response.len = body.len(),
            url = %url,
            "received API response"
        );

        if status.as_u16() >= 400 {
            return Err(api_error(status, &body).into());
        }

        let body: &[u8] = if body.is_empty() { b"null" } else { &body };
        Ok(serde_json::from_slice(body)?)
    }
}

fn api_error(status: reqwest::StatusCode, body: &[u8]) -> ApiError {
    let mut err = serde_json::from_slice::<ApiError>(body).unwrap_or_else(|_| ApiError {
        message: String::from_utf8_lossy(body).trim().to_owned(),
        ..ApiError::default()
    });
    if err.message.is_empty() {
        err.message = status.canonical_reason().unwrap_or("unknown error").to_owned();
    }
    err.status = status.as_u16();
    err
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("user_agent", &self.user_agent)
            .field("tailnet", &self.tailnet)
            .finish_non_exhaustive()
    }
}
