//! Typed failures callers need to match on.
//!
//! Operational code returns `anyhow::Result`; these types travel inside the
//! `anyhow` chain and are recovered by downcast where the distinction
//! matters (request handlers mapping validation failures to a stable code,
//! the sync loop deciding whether to re-login).

use thiserror::Error;

/// Stable error code surfaced for validation failures.
pub const VALIDATION_ERROR_CODE: u16 = 500;

/// A request the engine refuses outright: a hub-less single connection, or
/// a delete with no condition. Never retried.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn code(&self) -> u16 {
        VALIDATION_ERROR_CODE
    }
}

/// A failed push to the sync peer.
///
/// `Status` carries the HTTP status so the interval loop can spot a 401
/// and re-login; everything else is logged and retried next cycle.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("push to {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("push to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl PushError {
    /// HTTP status of the failure, when the peer answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            PushError::Status { status, .. } => Some(*status),
            PushError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_code_is_stable() {
        let err = ValidationError::new("connections must specify a hub");
        assert_eq!(err.code(), 500);
        assert_eq!(err.to_string(), "connections must specify a hub");
    }

    #[test]
    fn test_push_error_unauthorized() {
        let err = PushError::Status {
            url: "http://peer/api/sync".to_string(),
            status: 401,
        };
        assert!(err.is_unauthorized());

        let err = PushError::Status {
            url: "http://peer/api/sync".to_string(),
            status: 500,
        };
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_validation_error_downcasts_from_anyhow() {
        let err: anyhow::Error = ValidationError::new("missing condition").into();
        let recovered = err.downcast_ref::<ValidationError>();
        assert!(recovered.is_some());
        assert_eq!(recovered.map(|e| e.code()), Some(500));
    }
}
