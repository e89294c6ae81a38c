//! Local authority: validates tokens and answers RBAC questions straight from the user directory

use std::sync::Arc;

use async_trait::async_trait;

use crate::authority::Authority;
use crate::claims::TokenCodec;
use crate::error::{ClaimError, Result, TokenErrorKind};
use crate::principal::Principal;

/// Persistence interface the local authority reads from.
///
/// Scope grants are transitive: a user is granted a scope when one of
/// their roles is bound to it.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Current stored state of `user_name`, or `None` if it does not exist
    async fn find_user(&self, user_name: &str) -> anyhow::Result<Option<Principal>>;

    /// Does `user_name` hold any of `roles`? Unknown users hold nothing.
    async fn has_any_role(&self, user_name: &str, roles: &[String]) -> anyhow::Result<bool>;

    /// Is `user_name` granted any of `scopes` through its roles?
    async fn has_any_scope(&self, user_name: &str, scopes: &[String]) -> anyhow::Result<bool>;
}

/// Authority used inside the authorization server itself; never touches the network
#[derive(Clone)]
pub struct LocalAuthority {
    codec: Arc<TokenCodec>,
    directory: Arc<dyn UserDirectory>,
}

impl LocalAuthority {
    pub fn new(codec: Arc<TokenCodec>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { codec, directory }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Sign a token for `principal` with the configured lifetime
    pub fn issue_token(&self, principal: &Principal) -> Result<String> {
        self.codec.encode(principal, self.codec.default_ttl())
    }
}

#[async_trait]
impl Authority for LocalAuthority {
    async fn resolve_principal(&self, token: &str) -> Result<Principal> {
        let claims = self.codec.decode(token)?;

        let user = self
            .directory
            .find_user(&claims.sub)
            .await?
            .ok_or_else(|| ClaimError::invalid_token_for(TokenErrorKind::UserNotFound, &claims.sub))?;

        if user.policy_epoch != claims.policy_epoch {
            tracing::warn!(
                "Revoked token for {}: policy epoch {} is now {}",
                claims.sub,
                claims.policy_epoch,
                user.policy_epoch
            );
            return Err(ClaimError::invalid_token_for(TokenErrorKind::Invalid, &claims.sub));
        }

        Ok(user)
    }

    async fn has_role(&self, principal: &Principal, roles: &[String]) -> Result<bool> {
        if roles.is_empty() {
            return Ok(false);
        }
        Ok(self.directory.has_any_role(&principal.user_name, roles).await?)
    }

    async fn has_scope(&self, principal: &Principal, scopes: &[String]) -> Result<bool> {
        if scopes.is_empty() {
            return Ok(false);
        }
        Ok(self.directory.has_any_scope(&principal.user_name, scopes).await?)
    }
}
