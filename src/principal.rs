//! The authenticated identity a guard resolves a token to

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// An authenticated user as stored by the authorization server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub user_name: String,
    /// Ordered, without duplicates
    #[serde(default, deserialize_with = "deserialize_roles")]
    pub roles: Vec<String>,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub division: String,
    #[serde(default)]
    pub description: String,
    /// Bumped on every security-relevant change; tokens carrying an older value are revoked
    pub policy_epoch: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn new(user_name: impl Into<String>, policy_epoch: i64) -> Self {
        Self {
            user_name: user_name.into(),
            roles: Vec::new(),
            real_name: String::new(),
            division: String::new(),
            description: String::new(),
            policy_epoch,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = dedup_roles(roles.into_iter().map(Into::into));
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// True when the principal holds at least one of `roles`
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|role| self.has_role(role.as_ref()))
    }
}

/// Keep first occurrences, preserving order
pub fn dedup_roles<I: IntoIterator<Item = String>>(roles: I) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for role in roles {
        if !out.contains(&role) {
            out.push(role);
        }
    }
    out
}

fn deserialize_roles<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let roles = Option::<Vec<String>>::deserialize(deserializer)?;
    Ok(dedup_roles(roles.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_roles_dedups_in_order() {
        let p = Principal::new("alice", 1).with_roles(["viewer", "admin", "viewer"]);
        assert_eq!(p.roles, vec!["viewer", "admin"]);
    }

    #[test]
    fn test_has_any_role() {
        let p = Principal::new("alice", 1).with_roles(["viewer"]);
        assert!(p.has_any_role(&["admin", "viewer"]));
        assert!(!p.has_any_role(&["admin"]));
        assert!(!p.has_any_role::<&str>(&[]));
    }

    #[test]
    fn test_deserialize_minimal_user() {
        let p: Principal = serde_json::from_value(serde_json::json!({
            "user_name": "u",
            "roles": ["a", "b", "a"],
            "policy_epoch": 3
        }))
        .unwrap();
        assert_eq!(p.roles, vec!["a", "b"]);
        assert_eq!(p.policy_epoch, 3);
        assert_eq!(p.real_name, "");
        assert!(p.created_at.is_none());
    }

    #[test]
    fn test_deserialize_null_roles() {
        let p: Principal = serde_json::from_value(serde_json::json!({
            "user_name": "u",
            "roles": null,
            "policy_epoch": 1
        }))
        .unwrap();
        assert!(p.roles.is_empty());
    }
}
