use thiserror::Error;

// * Unified Error type for the Network Layer.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("empty response body")]
    EmptyResponse,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}
