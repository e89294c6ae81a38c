//! # claimguard - signed identity claims and RBAC enforcement
//!
//! Issues and validates signed access tokens whose validity is bound to a
//! per-user policy epoch, and enforces role/scope requirements either
//! locally (inside the authorization server) or remotely (in an application
//! that delegates to it over HTTP).
//!
//! ## Building blocks
//!
//! - [`TokenCodec`]: HMAC-signed access tokens carrying the policy epoch
//! - [`DiscoveryCache`]: TTL cache of the authorization server's endpoints
//! - [`RemoteAuthority`] / [`LocalAuthority`]: the two [`Authority`] variants
//! - [`Guard`]: builds `role`, `scope` and `role_or_scope` checks
//! - [`AuthorizeLayer`]: tower middleware running a check in front of a service

pub mod authority;
pub mod claims;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod guard;
pub mod local;
pub mod memory;
pub mod principal;
pub mod remote;

pub use authority::{Authority, RoleOrScopeStrategy};
pub use claims::{Claims, TokenCodec};
pub use config::{load_config, AuthServerConfig, ClaimsConfig, CookieConfig, TokenConfig};
pub use discovery::{DiscoveryCache, Endpoints};
pub use error::{ClaimError, Result, SourceErrorCode, TokenErrorKind};
pub use extract::AuthenticatedUser;
pub use guard::{AuthorizeLayer, Check, Guard, RoleCheck, RoleOrScopeCheck, ScopeCheck};
pub use local::{LocalAuthority, UserDirectory};
pub use memory::MemoryDirectory;
pub use principal::Principal;
pub use remote::RemoteAuthority;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_error_status() {
        let error = ClaimError::invalid_token(TokenErrorKind::NoToken);
        assert_eq!(error.status_code(), http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_remote_guard_construction_is_offline() {
        let authority = RemoteAuthority::new(&AuthServerConfig::new("http://127.0.0.1:1")).unwrap();
        assert!(authority.discovery_cache().is_empty().await);

        let guard = Guard::new(Arc::new(authority));
        let _check = guard.role_or_scope(["admin"], ["read:users"]);
    }

    #[test]
    fn test_remote_requires_origin() {
        let err = RemoteAuthority::new(&AuthServerConfig::new("")).unwrap_err();
        assert!(matches!(err, ClaimError::Config(_)));

        let huge_timeout = AuthServerConfig {
            timeout_secs: 1e30,
            ..AuthServerConfig::new("http://127.0.0.1:1")
        };
        let err = RemoteAuthority::new(&huge_timeout).unwrap_err();
        assert!(matches!(err, ClaimError::Config(_)));
    }
}
