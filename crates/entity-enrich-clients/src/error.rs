//! Error type for external collaborator calls.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("request to {url} blocked: {reason}")]
    SsrfBlocked { url: String, reason: String },

    #[error("http request failed: {0}")]
    Http(String),

    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("cache backend error: {0}")]
    Cache(String),

    #[error("collaborator timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssrf_blocked_display() {
        let err = Error::SsrfBlocked {
            url: "http://169.254.169.254/".into(),
            reason: "cloud metadata endpoint".into(),
        };
        assert_eq!(
            err.to_string(),
            "request to http://169.254.169.254/ blocked: cloud metadata endpoint"
        );
    }
}
