//! Configuration parsing module
//!
//! Settings are loaded from a TOML file and may be overridden by
//! `CLAIMGUARD_*` environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use claimguard::config::load_config;
//!
//! let config = load_config("claimguard.toml")?.with_env_overrides()?;
//! let codec = claimguard::TokenCodec::from_config(&config.token_config()?)?;
//! ```

use crate::error::{ClaimError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "CLAIMGUARD_";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimsConfig {
    /// Token signing section
    #[serde(default)]
    pub token: Option<TokenConfig>,

    /// Session cookie section
    #[serde(default)]
    pub cookie: CookieConfig,

    /// Authorization server section (only needed by remote authorities)
    #[serde(default)]
    pub auth_server: Option<AuthServerConfig>,
}

impl ClaimsConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_config(path)
    }

    /// Validated token configuration
    pub fn token_config(&self) -> Result<TokenConfig> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| ClaimError::Config("token configuration not found".to_string()))?;
        token.validate()?;
        Ok(token)
    }

    /// Validated authorization server configuration
    pub fn auth_server_config(&self) -> Result<AuthServerConfig> {
        let server = self.auth_server.clone().ok_or_else(|| {
            ClaimError::Config("authorization server origin is not configured".to_string())
        })?;
        server.validate()?;
        Ok(server)
    }

    /// Apply `CLAIMGUARD_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(std::env::vars())
    }

    /// Apply overrides from arbitrary `(name, value)` pairs
    pub fn with_overrides<I>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key {
                "SECRET_KEY" => self.token.get_or_insert_with(TokenConfig::default).secret_key = value,
                "ALGORITHM" => self.token.get_or_insert_with(TokenConfig::default).algorithm = value,
                "EXPIRE_MIN" => {
                    let minutes = value.parse().map_err(|e| {
                        ClaimError::Config(format!("invalid {}EXPIRE_MIN: {}", ENV_PREFIX, e))
                    })?;
                    self.token.get_or_insert_with(TokenConfig::default).expire_min = minutes;
                }
                "COOKIE_NAME" => self.cookie.name = value,
                "AUTH_SERVER_ORIGIN" => {
                    self.auth_server.get_or_insert_with(AuthServerConfig::default).origin = value
                }
                _ => {}
            }
        }
        Ok(self)
    }
}

/// Token signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Shared HMAC secret
    #[serde(default)]
    pub secret_key: String,

    /// Signing algorithm (HS256, HS384 or HS512)
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Token lifetime in minutes
    #[serde(default = "default_expire_min")]
    pub expire_min: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            algorithm: default_algorithm(),
            expire_min: default_expire_min(),
        }
    }
}

impl TokenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.secret_key.trim().is_empty() {
            return Err(ClaimError::Config("token secret_key is required".to_string()));
        }
        if !matches!(self.algorithm.as_str(), "HS256" | "HS384" | "HS512") {
            return Err(ClaimError::Config(format!(
                "unsupported signing algorithm: {}",
                self.algorithm
            )));
        }
        let fits = self
            .expire_min
            .checked_mul(60)
            .is_some_and(|secs| i64::try_from(secs).is_ok());
        if !fits {
            return Err(ClaimError::Config(format!(
                "expire_min out of range: {}",
                self.expire_min
            )));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.expire_min.saturating_mul(60))
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,

    /// SameSite attribute (lax, strict or none)
    #[serde(default = "default_samesite")]
    pub samesite: String,

    #[serde(default)]
    pub secure: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            samesite: default_samesite(),
            secure: false,
        }
    }
}

/// Authorization server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthServerConfig {
    /// Origin of the authorization server, e.g. `https://auth.example.com`
    #[serde(default)]
    pub origin: String,

    /// Path prefix under which the server mounts its API
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// How long discovered endpoints stay fresh
    #[serde(default = "default_discovery_ttl_secs")]
    pub discovery_ttl_secs: u64,

    /// Timeout applied to every call to the server
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

impl Default for AuthServerConfig {
    fn default() -> Self {
        Self {
            origin: String::new(),
            api_prefix: default_api_prefix(),
            discovery_ttl_secs: default_discovery_ttl_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AuthServerConfig {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.origin.trim().is_empty() {
            return Err(ClaimError::Config(
                "authorization server origin is not configured".to_string(),
            ));
        }
        if !self.timeout_secs.is_finite() || self.timeout_secs <= 0.0 {
            return Err(ClaimError::Config("timeout_secs must be positive".to_string()));
        }
        if Duration::try_from_secs_f64(self.timeout_secs).is_err() {
            return Err(ClaimError::Config(format!(
                "timeout_secs out of range: {}",
                self.timeout_secs
            )));
        }
        Ok(())
    }

    pub fn discovery_ttl(&self) -> Duration {
        Duration::from_secs(self.discovery_ttl_secs)
    }

    /// Falls back to the default when `timeout_secs` is out of range
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_timeout_secs()))
    }
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_expire_min() -> u64 {
    15
}

fn default_cookie_name() -> String {
    "access_token".to_string()
}

fn default_samesite() -> String {
    "lax".to_string()
}

fn default_api_prefix() -> String {
    "/claims/v1".to_string()
}

fn default_discovery_ttl_secs() -> u64 {
    300
}

fn default_timeout_secs() -> f64 {
    3.0
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClaimsConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| ClaimError::Config(format!("Failed to read config file: {}", e)))?;

    toml::from_str(&content)
        .map_err(|e| ClaimError::Config(format!("Failed to parse TOML config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let toml_str = r#"
[token]
secret_key = "**TEST**"
"#;
        let config: ClaimsConfig = toml::from_str(toml_str).unwrap();
        let token = config.token_config().unwrap();
        assert_eq!(token.algorithm, "HS256");
        assert_eq!(token.expire_min, 15);
        assert_eq!(token.ttl(), Duration::from_secs(900));
        assert_eq!(config.cookie.name, "access_token");
        assert_eq!(config.cookie.samesite, "lax");
        assert!(!config.cookie.secure);
        assert!(config.auth_server.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[token]
secret_key = "s3cret"
algorithm = "HS512"
expire_min = 60

[cookie]
name = "sid"
samesite = "strict"
secure = true

[auth_server]
origin = "https://auth.example.com"
api_prefix = "/api"
discovery_ttl_secs = 30
timeout_secs = 1.5
"#;
        let config: ClaimsConfig = toml::from_str(toml_str).unwrap();
        let server = config.auth_server_config().unwrap();
        assert_eq!(server.origin, "https://auth.example.com");
        assert_eq!(server.discovery_ttl(), Duration::from_secs(30));
        assert_eq!(server.timeout(), Duration::from_millis(1500));
        assert_eq!(config.token_config().unwrap().expire_min, 60);
        assert_eq!(config.cookie.name, "sid");
    }

    #[test]
    fn test_secret_key_required() {
        let config: ClaimsConfig = toml::from_str("[token]\nalgorithm = \"HS256\"\n").unwrap();
        assert!(matches!(config.token_config(), Err(ClaimError::Config(_))));

        let config = ClaimsConfig::default();
        assert!(matches!(config.token_config(), Err(ClaimError::Config(_))));
    }

    #[test]
    fn test_rejects_asymmetric_algorithm() {
        let token = TokenConfig {
            secret_key: "k".into(),
            algorithm: "RS256".into(),
            expire_min: 15,
        };
        assert!(matches!(token.validate(), Err(ClaimError::Config(_))));
    }

    #[test]
    fn test_oversized_expire_min_is_config_error() {
        let minutes = (u64::MAX / 2).to_string();
        let config = ClaimsConfig::default()
            .with_overrides(vars(&[
                ("CLAIMGUARD_SECRET_KEY", "k"),
                ("CLAIMGUARD_EXPIRE_MIN", minutes.as_str()),
            ]))
            .unwrap();
        assert!(matches!(config.token_config(), Err(ClaimError::Config(_))));

        let token = TokenConfig {
            secret_key: "k".into(),
            algorithm: "HS256".into(),
            expire_min: u64::MAX / 2,
        };
        assert!(matches!(
            crate::claims::TokenCodec::from_config(&token),
            Err(ClaimError::Config(_))
        ));
    }

    #[test]
    fn test_oversized_timeout_is_config_error() {
        let server = AuthServerConfig {
            timeout_secs: 1e30,
            ..AuthServerConfig::new("http://auth.local")
        };
        assert!(matches!(server.validate(), Err(ClaimError::Config(_))));
        assert_eq!(server.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_missing_origin_is_config_error() {
        let config = ClaimsConfig::default();
        assert!(matches!(config.auth_server_config(), Err(ClaimError::Config(_))));

        let config = ClaimsConfig {
            auth_server: Some(AuthServerConfig::new("  ")),
            ..ClaimsConfig::default()
        };
        assert!(matches!(config.auth_server_config(), Err(ClaimError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let config = ClaimsConfig::default()
            .with_overrides(vars(&[
                ("CLAIMGUARD_SECRET_KEY", "from-env"),
                ("CLAIMGUARD_EXPIRE_MIN", "5"),
                ("CLAIMGUARD_COOKIE_NAME", "tok"),
                ("CLAIMGUARD_AUTH_SERVER_ORIGIN", "http://auth.local"),
                ("UNRELATED", "x"),
            ]))
            .unwrap();

        let token = config.token_config().unwrap();
        assert_eq!(token.secret_key, "from-env");
        assert_eq!(token.expire_min, 5);
        assert_eq!(config.cookie.name, "tok");
        assert_eq!(config.auth_server_config().unwrap().origin, "http://auth.local");
    }

    #[test]
    fn test_env_override_bad_number() {
        let result = ClaimsConfig::default().with_overrides(vars(&[("CLAIMGUARD_EXPIRE_MIN", "soon")]));
        assert!(matches!(result, Err(ClaimError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/claimguard.toml");
        assert!(matches!(result, Err(ClaimError::Config(_))));
    }
}
