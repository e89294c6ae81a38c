//! Token codec: signed claims carrying a subject and its policy epoch

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::TokenConfig;
use crate::error::{ClaimError, Result, TokenErrorKind};
use crate::principal::Principal;

/// Token type embedded in every access token
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Decoded token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub typ: String,
    /// Subject (user name)
    pub sub: String,
    pub policy_epoch: i64,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Expiry (seconds since epoch)
    pub exp: i64,
}

impl Claims {
    pub fn user_name(&self) -> &str {
        &self.sub
    }
}

/// Encodes and validates tokens with a shared secret and a fixed algorithm
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    default_ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8], algorithm: Algorithm, default_ttl: Duration) -> Result<Self> {
        if secret.is_empty() {
            return Err(ClaimError::Config("token secret must not be empty".to_string()));
        }
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(ClaimError::Config(format!(
                "unsupported signing algorithm: {:?}",
                algorithm
            )));
        }
        Ok(Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            default_ttl,
        })
    }

    pub fn from_config(config: &TokenConfig) -> Result<Self> {
        config.validate()?;
        let algorithm = Algorithm::from_str(&config.algorithm)
            .map_err(|e| ClaimError::Config(format!("invalid algorithm {}: {}", config.algorithm, e)))?;
        Self::new(config.secret_key.as_bytes(), algorithm, config.ttl())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Sign a token for `principal` expiring `ttl` from now
    pub fn encode(&self, principal: &Principal, ttl: Duration) -> Result<String> {
        let iat = now_secs();
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| iat.checked_add(secs))
            .ok_or_else(|| ClaimError::Config(format!("token lifetime too large: {:?}", ttl)))?;
        let claims = Claims {
            typ: ACCESS_TOKEN_TYPE.to_string(),
            sub: principal.user_name.clone(),
            policy_epoch: principal.policy_epoch,
            iat,
            exp,
        };
        self.encode_claims(&claims)
    }

    pub fn encode_claims(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| ClaimError::Internal(anyhow::anyhow!("failed to sign token: {}", e)))
    }

    /// Verify signature, algorithm and expiry
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_aud = false;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::ExpiredSignature => TokenErrorKind::Expired,
                _ => TokenErrorKind::Invalid,
            };
            tracing::debug!("Token rejected: {}", e);
            ClaimError::invalid_token(kind)
        })?;

        let claims = data.claims;
        if claims.typ != ACCESS_TOKEN_TYPE {
            return Err(ClaimError::invalid_token_for(TokenErrorKind::Invalid, claims.sub));
        }
        Ok(claims)
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
