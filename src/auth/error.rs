use reqwest::StatusCode;

/// Failure of a single call to the refresh endpoint.
///
/// The coordinator never hands these to its callers; they are logged and
/// collapsed into a `false` result.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("refresh rejected with status {status}")]
    Rejected { status: StatusCode },
    #[error("invalid refresh endpoint: {0}")]
    Endpoint(String),
}

impl RefreshError {
    /// True when the backend refused the refresh credential itself, as
    /// opposed to a transient failure.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                status: StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            }
        )
    }
}
