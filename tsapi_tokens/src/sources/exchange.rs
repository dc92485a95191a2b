//! Exchange of an identity token for an API access token

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tsapi_clock::{Clock, DurationSecs};

use crate::{ClientIdRef, IdTokenRef, TokenLifetimeConfig, TokenWithLifetime, BEARER};

/// The path of the token-exchange endpoint, relative to the API base URL
pub const TOKEN_EXCHANGE_PATH: &str = "/api/v2/oauth/token-exchange";

/// Builds the token-exchange endpoint URL for an API base URL
pub fn exchange_url(base: &reqwest::Url) -> reqwest::Url {
    super::api_url(base, TOKEN_EXCHANGE_PATH)
}

/// An error while attempting to exchange an identity token
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Unable to send the exchange request or receive its response
    #[error("unexpected token exchange request error: {0}")]
    Network(#[source] reqwest::Error),
    /// Unable to read the response body
    #[error("error reading token exchange response body: {0}")]
    BodyRead(#[source] reqwest::Error),
    /// The exchange endpoint rejected the request
    #[error("token exchange failed with status {status}: {body}")]
    Rejected {
        /// The HTTP status code returned
        status: u16,
        /// The response body, verbatim
        body: String,
    },
    /// The success response was not the expected JSON shape
    #[error("failed to decode token exchange response: {0}")]
    MalformedResponse(#[source] serde_json::Error),
}

impl ExchangeError {
    /// The HTTP status returned by the exchange endpoint, if it responded with an error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    client_id: &'a ClientIdRef,
    jwt: &'a str,
}

/// The success response from the token-exchange endpoint
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenExchangeResponse {
    /// The issued access token
    pub access_token: String,
    /// The token type, expected to be `Bearer`
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// The token's lifetime
    pub expires_in: DurationSecs,
    /// The scope granted to the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    BEARER.to_owned()
}

/// Exchanges an identity token for an access token
///
/// Performs exactly one request through `client`. The returned token's expiry
/// has the configured safety margin already subtracted.
#[tracing::instrument(
    err,
    skip(client, exchange_url, client_id, id_token, lifetime_config),
    fields(
        exchange_url = %exchange_url,
        client_id = %client_id,
    ),
)]
pub async fn exchange_token<C: Clock>(
    client: &reqwest::Client,
    exchange_url: reqwest::Url,
    client_id: &ClientIdRef,
    id_token: &IdTokenRef,
    lifetime_config: &TokenLifetimeConfig<C>,
) -> Result<TokenWithLifetime, ExchangeError> {
    tracing::trace!("exchanging identity token for access token");

    let form = ExchangeRequest {
        client_id,
        jwt: id_token.as_str(),
    };

    let resp = client
        .post(exchange_url)
        .form(&form)
        .send()
        .await
        .map_err(ExchangeError::Network)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received token exchange response"
    );

    if status.as_u16() >= 400 {
        let body = resp.text().await.map_err(ExchangeError::BodyRead)?;
        return Err(ExchangeError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let body = resp.bytes().await.map_err(ExchangeError::BodyRead)?;
    let resp: TokenExchangeResponse =
        serde_json::from_slice(&body).map_err(ExchangeError::MalformedResponse)?;

    if !resp.token_type.eq_ignore_ascii_case(BEARER) {
        tracing::warn!(
            token_type = %resp.token_type,
            "token exchange returned an unexpected token type"
        );
    }

    let token = lifetime_config.create_token(
        crate::AccessToken::new(resp.access_token),
        resp.token_type,
        resp.scope,
        resp.expires_in,
    );

    tracing::info!(
        lifetime = token.lifetime().0,
        expiry = token.expiry().0,
        "received new access token from exchange"
    );

    Ok(token)
}

#[cfg(test)]
mod tests {
    use tsapi_clock::{TestClock, UnixTime};
    use wiremock::{
        matchers::{body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{ClientId, IdToken};

    fn lifetime_config() -> TokenLifetimeConfig<TestClock> {
        TokenLifetimeConfig::default().with_clock(TestClock::new(UnixTime(1_000)))
    }

    async fn exchange(server: &MockServer) -> Result<TokenWithLifetime, ExchangeError> {
        let base = server.uri().parse().unwrap();
        exchange_token(
            &reqwest::Client::new(),
            exchange_url(&base),
            &ClientId::from_static("test-client-id"),
            &IdToken::from_static("h.p.s"),
            &lifetime_config(),
        )
        .await
    }

    #[tokio::test]
    async fn posts_form_and_returns_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_EXCHANGE_PATH))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("client_id=test-client-id"))
            .and(body_string_contains("jwt=h.p.s"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok1",
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "all:read",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = exchange(&server).await.unwrap();

        assert_eq!(token.access_token().as_str(), "tok1");
        assert_eq!(token.token_type(), "Bearer");
        assert_eq!(token.scope(), Some("all:read"));
        assert_eq!(token.expiry(), UnixTime(1_000 + 3600 - 300));
    }

    #[tokio::test]
    async fn rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_EXCHANGE_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_client"}"#))
            .mount(&server)
            .await;

        let err = exchange(&server).await.unwrap_err();

        assert_eq!(err.status(), Some(401));
        let message = err.to_string();
        assert!(message.contains("401"), "{message}");
        assert!(message.contains(r#"{"error":"invalid_client"}"#), "{message}");
    }

    #[tokio::test]
    async fn nonstandard_error_status_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_EXCHANGE_PATH))
            .respond_with(ResponseTemplate::new(600).set_body_string("weird"))
            .mount(&server)
            .await;

        let err = exchange(&server).await.unwrap_err();

        assert!(
            matches!(&err, ExchangeError::Rejected { status: 600, body } if body == "weird"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_EXCHANGE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = exchange(&server).await.unwrap_err();

        assert!(matches!(err, ExchangeError::MalformedResponse(_)));
        assert!(err.to_string().contains("failed to decode token exchange response"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let server = MockServer::start().await;
        let base: reqwest::Url = server.uri().parse().unwrap();
        drop(server);

        let err = exchange_token(
            &reqwest::Client::new(),
            exchange_url(&base),
            &ClientId::from_static("test-client-id"),
            &IdToken::from_static("h.p.s"),
            &lifetime_config(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExchangeError::Network(_)));
    }

    #[tokio::test]
    async fn missing_token_type_defaults_to_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_EXCHANGE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok1",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        let token = exchange(&server).await.unwrap();
        assert_eq!(token.token_type(), BEARER);
        assert_eq!(token.scope(), None);
    }
}
