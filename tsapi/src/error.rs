use serde::Deserialize;
use thiserror::Error;
use tsapi_tokens::{
    sources::federation::{ConfigError, FederationError},
    RefreshError,
};

/// An error reported by the API itself
///
/// Rendered as `"{message} ({status})"`.
#[derive(Clone, Debug, Default, Deserialize, Error, PartialEq, Eq)]
#[error("{message} ({status})")]
pub struct ApiError {
    /// The human-readable error message
    #[serde(default)]
    pub message: String,

    /// Per-user details, returned by some endpoints
    #[serde(default)]
    pub data: Vec<ApiErrorData>,

    #[serde(skip)]
    pub(crate) status: u16,
}

impl ApiError {
    /// The HTTP status code of the response
    pub fn status(&self) -> u16 {
        self.status
    }
}

/// One element of the `data` field of an [`ApiError`]
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ApiErrorData {
    /// The user the errors relate to
    #[serde(default)]
    pub user: String,

    /// The individual error messages
    #[serde(default)]
    pub errors: Vec<String>,
}

/// An error from the API client
#[derive(Debug, Error)]
pub enum Error {
    /// The credential strategy is misconfigured
    #[error("invalid client configuration: {0}")]
    Config(#[from] ConfigError),
    /// The initial identity federation exchange failed
    #[error("identity federation failed: {0}")]
    Federation(#[from] RefreshError<FederationError>),
    /// The request could not be sent or its response could not be read
    ///
    /// This includes failures to obtain credentials for the request.
    #[error(transparent)]
    Transport(#[from] reqwest_middleware::Error),
    /// The API rejected the request
    #[error(transparent)]
    Api(#[from] ApiError),
    /// A successful response body could not be decoded
    #[error("failed to decode API response: {0}")]
    Decode(#[from] serde_json::Error),
    /// A URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The base URL cannot have API paths appended to it
    #[error("base URL cannot be used as a base: {0}")]
    CannotBeABase(url::Url),
}

impl Error {
    /// Whether this is an API error with status 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(err) if err.status == 404)
    }

    /// The `data` field of an API error, or nothing for other errors
    pub fn error_data(&self) -> &[ApiErrorData] {
        match self {
            Self::Api(err) => &err.data,
            _ => &[],
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.into())
    }
}
