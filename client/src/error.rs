use thiserror::Error;

/// Failures surfaced by the sync client. Validation failures happen
/// before any state change or I/O and never need rollback; transient
/// failures roll back the optimistic update; an auth rejection means the
/// session itself is dead, not just the request, and forces a logout.
/// Nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("sync failed: {0}")]
    Transient(String),

    #[error("session rejected: {0}")]
    AuthRejected(String),

    #[error("local store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        // Transport-level failures (connect, timeout, body) are all
        // transient; auth rejection is classified from the status code
        // in the remote client, not here.
        Self::Transient(err.to_string())
    }
}

/// Failures from the register/login boundary. The first three kinds must
/// stay distinguishable so the UI can show distinct messages.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("username is already taken")]
    UsernameTaken,

    #[error("too many attempts, try again later")]
    RateLimited,

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("auth request failed: {0}")]
    Transient(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_joins_messages() {
        let err = SyncError::Validation(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(err.to_string(), "validation failed: first; second");
    }

    #[test]
    fn test_auth_error_messages_distinct() {
        let messages = [
            AuthError::InvalidCredentials.to_string(),
            AuthError::UsernameTaken.to_string(),
            AuthError::RateLimited.to_string(),
        ];
        assert_eq!(
            messages.iter().collect::<std::collections::HashSet<_>>().len(),
            3
        );
    }
}
