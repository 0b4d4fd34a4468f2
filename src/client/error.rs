use thiserror::Error;

/// Everything that can go wrong talking to the bot backend. None of these
/// are fatal; callers log them and carry on with what they have.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("backend URL is not configured")]
    NotConfigured,
    #[error("request to {path} timed out")]
    Timeout { path: String },
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },
    #[error("cannot decode response from {path}: {reason}")]
    Decode { path: String, reason: String },
}

impl ApiError {
    pub(crate) fn from_reqwest(path: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            ApiError::Timeout {
                path: path.to_string(),
            }
        } else if source.is_decode() {
            ApiError::Decode {
                path: path.to_string(),
                reason: source.to_string(),
            }
        } else {
            ApiError::Transport {
                path: path.to_string(),
                source,
            }
        }
    }
}
