//! Token sources

use crate::TokenWithLifetime;
use async_trait::async_trait;
use std::error;

pub mod exchange;
pub mod federation;
pub mod oauth2;

/// An asynchronous source for tokens
///
/// A token source is only ever driven by one caller at a time; callers that
/// need to share a source across concurrent requests should wrap it in a
/// [`SharedTokenSource`][crate::SharedTokenSource].
#[async_trait]
pub trait AsyncTokenSource: Send + Sync {
    /// The error type returned in the event that retrieving a token fails
    type Error: error::Error + Send + Sync + 'static;

    /// Requests a token from an asynchronous source
    async fn request_token(&mut self) -> Result<TokenWithLifetime, Self::Error>;
}

/// Joins a path onto an API base URL, preserving any path prefix on the base
pub fn api_url(base: &reqwest::Url, path: &str) -> reqwest::Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_joins_paths() {
        let base: reqwest::Url = "https://api.example.com".parse().unwrap();
        assert_eq!(
            api_url(&base, "/api/v2/oauth/token").as_str(),
            "https://api.example.com/api/v2/oauth/token"
        );
    }

    #[test]
    fn api_url_keeps_base_prefix() {
        let base: reqwest::Url = "http://127.0.0.1:8080/proxy/".parse().unwrap();
        assert_eq!(
            api_url(&base, "api/v2/oauth/token-exchange").as_str(),
            "http://127.0.0.1:8080/proxy/api/v2/oauth/token-exchange"
        );
    }
}
