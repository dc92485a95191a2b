//! A token source that uses the OAuth2 client credentials flow

use async_trait::async_trait;
use thiserror::Error;
use tsapi_clock::Clock;

use super::AsyncTokenSource;
use crate::{AccessToken, TokenLifetimeConfig, TokenWithLifetime, BEARER};

pub mod dto;

/// The path of the OAuth2 token endpoint, relative to the API base URL
pub const TOKEN_PATH: &str = "/api/v2/oauth/token";

/// Builds the token endpoint URL for an API base URL
pub fn token_url(base: &reqwest::Url) -> reqwest::Url {
    super::api_url(base, TOKEN_PATH)
}

/// A token source for the client credentials flow
#[derive(Debug)]
pub struct ClientCredentialsTokenSource<C> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    credentials: dto::ClientCredentialsWithScopes,
    lifetime_config: TokenLifetimeConfig<C>,
}

impl<C> ClientCredentialsTokenSource<C> {
    /// Constructs a new client credentials source
    ///
    /// Credentials are sent to the authority as form data.
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        credentials: dto::ClientCredentialsWithScopes,
        lifetime_config: TokenLifetimeConfig<C>,
    ) -> Self {
        Self {
            client,
            token_url,
            credentials,
            lifetime_config,
        }
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AsyncTokenSource for ClientCredentialsTokenSource<C> {
    type Error = TokenRequestError;

    async fn request_token(&mut self) -> Result<TokenWithLifetime, Self::Error> {
        request_token(
            &self.client,
            self.token_url.clone(),
            &self.credentials,
            &self.lifetime_config,
        )
        .await
    }
}

/// An error while attempting to request a new token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(reqwest::Error),
}

#[tracing::instrument(
    err,
    skip(client, token_url, credentials, lifetime_config),
    fields(
        token_url = %token_url,
        credentials.grant_type = "client_credentials",
        credentials.client_id = %credentials.credentials.client_id,
        credentials.scopes = ?credentials.scopes,
    ),
)]
async fn request_token<C: Clock>(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    credentials: &dto::ClientCredentialsWithScopes,
    lifetime_config: &TokenLifetimeConfig<C>,
) -> Result<TokenWithLifetime, TokenRequestError> {
    tracing::trace!("requesting token from authority");

    let resp = client
        .post(token_url)
        .form(credentials)
        .send()
        .await
        .map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from issuing authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    let token = lifetime_config.create_token(
        AccessToken::new(resp.access_token),
        resp.token_type.unwrap_or_else(|| BEARER.to_owned()),
        resp.scope,
        resp.expires_in,
    );

    tracing::info!(
        lifetime = token.lifetime().0,
        expiry = token.expiry().0,
        "received new tokens"
    );

    Ok(token)
}
