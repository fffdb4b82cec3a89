use thiserror::Error;

use crate::traits::{ErrorClass, ServiceError};

/// Errors from the Trakt API client.
#[derive(Debug, Error)]
pub enum TraktError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl ServiceError for TraktError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Http(e) if e.is_decode() => ErrorClass::Fatal,
            Self::Http(_) => ErrorClass::Transient,
            Self::Auth(_) => ErrorClass::Auth,
            Self::Api { status, .. } => match *status {
                401 | 403 => ErrorClass::Auth,
                404 => ErrorClass::NotFound,
                408 | 429 | 500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            Self::Parse(_) => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> TraktError {
        TraktError::Api {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(api(401).class(), ErrorClass::Auth);
        assert_eq!(api(403).class(), ErrorClass::Auth);
        assert_eq!(api(404).class(), ErrorClass::NotFound);
        assert_eq!(api(429).class(), ErrorClass::Transient);
        assert_eq!(api(502).class(), ErrorClass::Transient);
        assert_eq!(api(422).class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_missing_token_is_auth() {
        assert_eq!(TraktError::Auth("no token".into()).class(), ErrorClass::Auth);
        assert_eq!(TraktError::Parse("bad".into()).class(), ErrorClass::Fatal);
    }
}
