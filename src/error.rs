//! Error types for claim validation and authorization

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use std::fmt;

/// Why a token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenErrorKind {
    /// No token was presented at all
    NoToken,
    /// Bad signature, malformed payload, revoked policy epoch or unreadable upstream answer
    Invalid,
    /// The token is past its expiry
    Expired,
    /// The subject no longer exists
    UserNotFound,
}

impl TokenErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenErrorKind::NoToken => "no_token",
            TokenErrorKind::Invalid => "invalid",
            TokenErrorKind::Expired => "expired",
            TokenErrorKind::UserNotFound => "user_not_found",
        }
    }
}

impl fmt::Display for TokenErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure class when talking to the authorization server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceErrorCode {
    Timeout,
    Connection,
    Other(String),
}

impl SourceErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            SourceErrorCode::Timeout => "timeout",
            SourceErrorCode::Connection => "connection",
            SourceErrorCode::Other(code) => code,
        }
    }
}

impl fmt::Display for SourceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure raised by a guard or an authorization check
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("Invalid token ({kind})")]
    InvalidToken {
        kind: TokenErrorKind,
        user_name: Option<String>,
    },

    #[error("Authorization server unavailable ({code}): {message}")]
    ClaimSource {
        code: SourceErrorCode,
        user_name: Option<String>,
        message: String,
    },

    #[error("Missing required roles. Required one of: {}", .required.join(", "))]
    MissingRequiredRoles {
        user_name: Option<String>,
        roles: Vec<String>,
        required: Vec<String>,
    },

    #[error("Missing required scopes. Required one of: {}", .required.join(", "))]
    MissingRequiredScopes {
        user_name: Option<String>,
        required: Vec<String>,
    },

    #[error(
        "Missing required roles or scopes. Required one of roles: {}; or scopes: {}",
        .required_roles.join(", "),
        .required_scopes.join(", ")
    )]
    MissingRequiredRolesOrScopes {
        user_name: Option<String>,
        roles: Vec<String>,
        required_roles: Vec<String>,
        required_scopes: Vec<String>,
    },

    #[error("Invalid credentials")]
    InvalidCredentials { user_name: Option<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClaimError>;

impl ClaimError {
    pub fn invalid_token(kind: TokenErrorKind) -> Self {
        ClaimError::InvalidToken { kind, user_name: None }
    }

    pub fn invalid_token_for(kind: TokenErrorKind, user_name: impl Into<String>) -> Self {
        ClaimError::InvalidToken {
            kind,
            user_name: Some(user_name.into()),
        }
    }

    pub fn source_failure(code: SourceErrorCode, message: impl Into<String>) -> Self {
        ClaimError::ClaimSource {
            code,
            user_name: None,
            message: message.into(),
        }
    }

    /// Name of the user the failure concerns, when known
    pub fn user_name(&self) -> Option<&str> {
        match self {
            ClaimError::InvalidToken { user_name, .. }
            | ClaimError::ClaimSource { user_name, .. }
            | ClaimError::MissingRequiredRoles { user_name, .. }
            | ClaimError::MissingRequiredScopes { user_name, .. }
            | ClaimError::MissingRequiredRolesOrScopes { user_name, .. }
            | ClaimError::InvalidCredentials { user_name } => user_name.as_deref(),
            ClaimError::Config(_) | ClaimError::Internal(_) => None,
        }
    }

    /// Attach a user name to errors raised before the user was known
    pub fn with_user_name(mut self, name: &str) -> Self {
        match &mut self {
            ClaimError::InvalidToken { user_name, .. }
            | ClaimError::ClaimSource { user_name, .. }
            | ClaimError::MissingRequiredRoles { user_name, .. }
            | ClaimError::MissingRequiredScopes { user_name, .. }
            | ClaimError::MissingRequiredRolesOrScopes { user_name, .. }
            | ClaimError::InvalidCredentials { user_name } => {
                if user_name.is_none() {
                    *user_name = Some(name.to_string());
                }
            }
            ClaimError::Config(_) | ClaimError::Internal(_) => {}
        }
        self
    }

    pub fn token_kind(&self) -> Option<TokenErrorKind> {
        match self {
            ClaimError::InvalidToken { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn source_code(&self) -> Option<&SourceErrorCode> {
        match self {
            ClaimError::ClaimSource { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ClaimError::InvalidToken { .. } | ClaimError::InvalidCredentials { .. } => {
                StatusCode::UNAUTHORIZED
            }
            ClaimError::MissingRequiredRoles { .. }
            | ClaimError::MissingRequiredScopes { .. }
            | ClaimError::MissingRequiredRolesOrScopes { .. } => StatusCode::FORBIDDEN,
            ClaimError::ClaimSource { .. } => StatusCode::BAD_GATEWAY,
            ClaimError::Config(_) | ClaimError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ClaimError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = serde_json::json!({ "error": self.to_string() });
        match &self {
            ClaimError::InvalidToken { kind, .. } => {
                body["kind"] = kind.as_str().into();
            }
            ClaimError::ClaimSource { code, .. } => {
                body["code"] = code.as_str().into();
            }
            _ => {}
        }
        if let Some(user_name) = self.user_name() {
            body["user_name"] = user_name.into();
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_kind_strings() {
        assert_eq!(TokenErrorKind::NoToken.as_str(), "no_token");
        assert_eq!(TokenErrorKind::Invalid.as_str(), "invalid");
        assert_eq!(TokenErrorKind::Expired.as_str(), "expired");
        assert_eq!(TokenErrorKind::UserNotFound.to_string(), "user_not_found");
    }

    #[test]
    fn test_source_code_strings() {
        assert_eq!(SourceErrorCode::Timeout.as_str(), "timeout");
        assert_eq!(SourceErrorCode::Connection.as_str(), "connection");
        assert_eq!(SourceErrorCode::Other("status_503".into()).as_str(), "status_503");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ClaimError::invalid_token(TokenErrorKind::NoToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ClaimError::source_failure(SourceErrorCode::Timeout, "slow").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ClaimError::MissingRequiredScopes { user_name: None, required: vec!["s1".into()] }
                .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ClaimError::Config("origin".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_roles_message() {
        let err = ClaimError::MissingRequiredRoles {
            user_name: Some("alice".into()),
            roles: vec!["viewer".into()],
            required: vec!["admin".into(), "owner".into()],
        };
        assert_eq!(err.to_string(), "Missing required roles. Required one of: admin, owner");
        assert_eq!(err.user_name(), Some("alice"));
    }

    #[test]
    fn test_with_user_name_keeps_existing() {
        let err = ClaimError::invalid_token_for(TokenErrorKind::Invalid, "bob").with_user_name("eve");
        assert_eq!(err.user_name(), Some("bob"));

        let err = ClaimError::source_failure(SourceErrorCode::Connection, "refused").with_user_name("eve");
        assert_eq!(err.user_name(), Some("eve"));
        assert_eq!(err.source_code(), Some(&SourceErrorCode::Connection));
    }

    #[tokio::test]
    async fn test_into_response_body() {
        let response = ClaimError::invalid_token(TokenErrorKind::Expired).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["kind"], "expired");
    }
}
