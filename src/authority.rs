//! The capability both evaluators implement: resolve a token, answer role and scope questions

use async_trait::async_trait;

use crate::error::Result;
use crate::principal::Principal;

/// How a role-or-scope question is answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOrScopeStrategy {
    /// One call to a combined endpoint at this URL
    Combined(String),
    /// Role check first; scope check only when the role check denies
    Fallback,
}

/// An authority that can authenticate tokens and evaluate RBAC questions.
///
/// `has_role` and `has_scope` return `Ok(false)` for a denial and reserve
/// `Err` for failures to obtain an answer at all. An empty requirement list
/// is always a denial.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Resolve a raw token into the principal it was issued for
    async fn resolve_principal(&self, token: &str) -> Result<Principal>;

    /// Does `principal` hold any of `roles`?
    async fn has_role(&self, principal: &Principal, roles: &[String]) -> Result<bool>;

    /// Is `principal` granted any of `scopes`?
    async fn has_scope(&self, principal: &Principal, scopes: &[String]) -> Result<bool>;

    /// Pick how role-or-scope checks are evaluated for this authority
    async fn role_or_scope_strategy(&self) -> Result<RoleOrScopeStrategy> {
        Ok(RoleOrScopeStrategy::Fallback)
    }

    /// Answer a role-or-scope question in one call.
    ///
    /// Only invoked when [`Authority::role_or_scope_strategy`] returned
    /// [`RoleOrScopeStrategy::Combined`].
    async fn has_role_or_scope(
        &self,
        principal: &Principal,
        roles: &[String],
        scopes: &[String],
        _url: &str,
    ) -> Result<bool> {
        if self.has_role(principal, roles).await? {
            return Ok(true);
        }
        self.has_scope(principal, scopes).await
    }
}
