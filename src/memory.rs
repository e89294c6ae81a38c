//! In-memory user directory.
//!
//! Intended for tests and embedded use. Mutations that change what a user
//! may do (roles, division, password) bump the user's policy epoch, which
//! revokes every token issued before the change.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;

use crate::local::UserDirectory;
use crate::principal::{dedup_roles, Principal};

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, Principal>,
    role_scopes: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<State>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> anyhow::Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| anyhow!("user directory lock poisoned"))
    }

    fn write(&self) -> anyhow::Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| anyhow!("user directory lock poisoned"))
    }

    pub fn insert_user(&self, mut principal: Principal) -> anyhow::Result<()> {
        if principal.user_name.trim().is_empty() {
            bail!("user_name must not be empty");
        }
        let mut state = self.write()?;
        if state.users.contains_key(&principal.user_name) {
            bail!("user already exists: {}", principal.user_name);
        }
        let now = Utc::now();
        principal.created_at.get_or_insert(now);
        principal.updated_at.get_or_insert(now);
        state.users.insert(principal.user_name.clone(), principal);
        Ok(())
    }

    pub fn delete_user(&self, user_name: &str) -> anyhow::Result<()> {
        let mut state = self.write()?;
        state
            .users
            .remove(user_name)
            .map(|_| ())
            .ok_or_else(|| anyhow!("user not found: {}", user_name))
    }

    fn mutate<F>(&self, user_name: &str, f: F) -> anyhow::Result<i64>
    where
        F: FnOnce(&mut Principal),
    {
        let mut state = self.write()?;
        let user = state
            .users
            .get_mut(user_name)
            .ok_or_else(|| anyhow!("user not found: {}", user_name))?;
        f(user);
        user.policy_epoch += 1;
        user.updated_at = Some(Utc::now());
        Ok(user.policy_epoch)
    }

    /// Replace the user's roles; returns the new policy epoch
    pub fn set_roles<I, S>(&self, user_name: &str, roles: I) -> anyhow::Result<i64>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles = dedup_roles(roles.into_iter().map(Into::into));
        self.mutate(user_name, |user| user.roles = roles)
    }

    pub fn set_division(&self, user_name: &str, division: impl Into<String>) -> anyhow::Result<i64> {
        let division = division.into();
        self.mutate(user_name, |user| user.division = division)
    }

    /// Record a credential change (e.g. new password); returns the new policy epoch
    pub fn bump_policy_epoch(&self, user_name: &str) -> anyhow::Result<i64> {
        self.mutate(user_name, |_| {})
    }

    /// Bind `role` to exactly `scopes`
    pub fn set_role_scopes<I, S>(&self, role: &str, scopes: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scopes = dedup_roles(scopes.into_iter().map(Into::into));
        self.write()?.role_scopes.insert(role.to_string(), scopes);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_user(&self, user_name: &str) -> anyhow::Result<Option<Principal>> {
        Ok(self.read()?.users.get(user_name).cloned())
    }

    async fn has_any_role(&self, user_name: &str, roles: &[String]) -> anyhow::Result<bool> {
        let state = self.read()?;
        Ok(state
            .users
            .get(user_name)
            .map(|user| user.has_any_role(roles))
            .unwrap_or(false))
    }

    async fn has_any_scope(&self, user_name: &str, scopes: &[String]) -> anyhow::Result<bool> {
        let state = self.read()?;
        let Some(user) = state.users.get(user_name) else {
            return Ok(false);
        };
        Ok(user.roles.iter().any(|role| {
            state
                .role_scopes
                .get(role)
                .map(|granted| granted.iter().any(|s| scopes.contains(s)))
                .unwrap_or(false)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let dir = MemoryDirectory::new();
        dir.insert_user(Principal::new("alice", 1).with_roles(["viewer"])).unwrap();

        let alice = dir.find_user("alice").await.unwrap().unwrap();
        assert_eq!(alice.policy_epoch, 1);
        assert!(alice.created_at.is_some());
        assert!(dir.find_user("bob").await.unwrap().is_none());
    }

    #[test]
    fn test_rejects_duplicate_and_empty_names() {
        let dir = MemoryDirectory::new();
        dir.insert_user(Principal::new("alice", 1)).unwrap();
        assert!(dir.insert_user(Principal::new("alice", 1)).is_err());
        assert!(dir.insert_user(Principal::new(" ", 1)).is_err());
    }

    #[test]
    fn test_security_changes_bump_epoch() {
        let dir = MemoryDirectory::new();
        dir.insert_user(Principal::new("alice", 1)).unwrap();

        assert_eq!(dir.set_roles("alice", ["admin"]).unwrap(), 2);
        assert_eq!(dir.set_division("alice", "QA").unwrap(), 3);
        assert_eq!(dir.bump_policy_epoch("alice").unwrap(), 4);
        assert!(dir.bump_policy_epoch("bob").is_err());
    }

    #[tokio::test]
    async fn test_scope_granted_through_role() {
        let dir = MemoryDirectory::new();
        dir.insert_user(Principal::new("alice", 1).with_roles(["viewer"])).unwrap();
        dir.set_role_scopes("viewer", ["read:users"]).unwrap();
        dir.set_role_scopes("admin", ["write:users"]).unwrap();

        assert!(dir.has_any_scope("alice", &names(&["read:users"])).await.unwrap());
        assert!(!dir.has_any_scope("alice", &names(&["write:users"])).await.unwrap());
        assert!(!dir.has_any_scope("missing", &names(&["read:users"])).await.unwrap());

        dir.set_roles("alice", ["admin"]).unwrap();
        assert!(dir.has_any_scope("alice", &names(&["write:users"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleted_user_holds_no_roles() {
        let dir = MemoryDirectory::new();
        dir.insert_user(Principal::new("alice", 1).with_roles(["viewer"])).unwrap();
        dir.delete_user("alice").unwrap();

        assert!(!dir.has_any_role("alice", &names(&["viewer"])).await.unwrap());
        assert!(dir.delete_user("alice").is_err());
    }
}
