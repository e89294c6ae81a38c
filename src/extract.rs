//! Axum integration: token extraction, session cookies and the principal extractor
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{routing::get, Router};
//! use claimguard::extract::AuthenticatedUser;
//!
//! async fn protected_handler(user: AuthenticatedUser) -> String {
//!     format!("Hello, {}!", user.user_name)
//! }
//!
//! let app = Router::new()
//!     .route("/protected", get(protected_handler))
//!     .layer(AuthorizeLayer::new(guard.role(["admin"])));
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use std::ops::Deref;

use crate::config::CookieConfig;
use crate::error::{ClaimError, TokenErrorKind};
use crate::principal::Principal;

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Extract the value of cookie `name` from the Cookie headers
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Token from the session cookie, falling back to a bearer header
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    extract_cookie(headers, cookie_name).or_else(|| extract_bearer_token(headers))
}

fn cookie_attributes(config: &CookieConfig) -> String {
    let mut attrs = format!("Path=/; HttpOnly; SameSite={}", samesite(&config.samesite));
    if config.secure {
        attrs.push_str("; Secure");
    }
    attrs
}

fn samesite(value: &str) -> &'static str {
    match value.to_ascii_lowercase().as_str() {
        "strict" => "Strict",
        "none" => "None",
        _ => "Lax",
    }
}

/// `Set-Cookie` value carrying a freshly issued token
pub fn session_cookie(config: &CookieConfig, token: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; Max-Age={}; {}",
        config.name,
        token,
        max_age_secs,
        cookie_attributes(config)
    )
}

/// `Set-Cookie` value that clears the session cookie
pub fn logout_cookie(config: &CookieConfig) -> String {
    format!("{}=; Max-Age=0; {}", config.name, cookie_attributes(config))
}

/// Axum extractor for the principal resolved by [`crate::guard::AuthorizeLayer`]
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

impl Deref for AuthenticatedUser {
    type Target = Principal;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Principal> for AuthenticatedUser {
    fn from(principal: Principal) -> Self {
        Self(principal)
    }
}

impl AuthenticatedUser {
    pub fn into_inner(self) -> Principal {
        self.0
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ClaimError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthenticatedUser)
            .ok_or(ClaimError::invalid_token(TokenErrorKind::NoToken))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_extract_bearer_token_valid() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer my-secret-token".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), Some("my-secret-token".to_string()));
    }

    #[test]
    fn test_extract_bearer_token_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("Authorization", "Bearertoken".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("Authorization", "Bearer ".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn test_extract_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("Cookie", "theme=dark; access_token=abc.def; lang=en".parse().unwrap());
        assert_eq!(extract_cookie(&headers, "access_token"), Some("abc.def".to_string()));
        assert_eq!(extract_cookie(&headers, "missing"), None);

        headers.insert("Cookie", "access_token=".parse().unwrap());
        assert_eq!(extract_cookie(&headers, "access_token"), None);
    }

    #[test]
    fn test_cookie_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer from-header".parse().unwrap());
        assert_eq!(extract_token(&headers, "access_token"), Some("from-header".to_string()));

        headers.insert("Cookie", "access_token=from-cookie".parse().unwrap());
        assert_eq!(extract_token(&headers, "access_token"), Some("from-cookie".to_string()));

        assert_eq!(extract_token(&HeaderMap::new(), "access_token"), None);
    }

    #[test]
    fn test_session_and_logout_cookies() {
        let config = CookieConfig::default();
        assert_eq!(
            session_cookie(&config, "tok", 900),
            "access_token=tok; Max-Age=900; Path=/; HttpOnly; SameSite=Lax"
        );

        let secure = CookieConfig {
            name: "sid".into(),
            samesite: "strict".into(),
            secure: true,
        };
        assert_eq!(
            logout_cookie(&secure),
            "sid=; Max-Age=0; Path=/; HttpOnly; SameSite=Strict; Secure"
        );
    }

    #[tokio::test]
    async fn test_authenticated_user_extractor() {
        let (mut parts, _) = Request::builder().uri("/").body(()).unwrap().into_parts();
        let missing = AuthenticatedUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(
            missing,
            Err(ClaimError::InvalidToken { kind: TokenErrorKind::NoToken, .. })
        ));

        parts.extensions.insert(Principal::new("alice", 1));
        let user = AuthenticatedUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.user_name, "alice");
    }
}
