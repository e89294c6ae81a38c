//! Remote authority: answers guard and RBAC questions by calling the authorization server

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::authority::{Authority, RoleOrScopeStrategy};
use crate::claims::TokenCodec;
use crate::config::AuthServerConfig;
use crate::discovery::{discovery_url, DiscoveryCache, Endpoints};
use crate::error::{ClaimError, Result, SourceErrorCode, TokenErrorKind};
use crate::principal::Principal;

/// Path of the login page when the server does not advertise one
pub const DEFAULT_LOGIN_PAGE_PATH: &str = "/auth/login_page";

/// Every response from the authorization server wraps its payload in `data`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// verify-token answers either `{user, token}` or the user fields directly
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VerifiedUser {
    Wrapped { user: Principal },
    Bare(Principal),
}

impl VerifiedUser {
    fn into_principal(self) -> Principal {
        match self {
            VerifiedUser::Wrapped { user } => user,
            VerifiedUser::Bare(user) => user,
        }
    }
}

/// Map a transport failure into the source error taxonomy
fn transport_error(err: reqwest::Error) -> ClaimError {
    let code = if err.is_timeout() {
        SourceErrorCode::Timeout
    } else if err.is_connect() {
        SourceErrorCode::Connection
    } else {
        SourceErrorCode::Other("request".to_string())
    };
    ClaimError::source_failure(code, err.to_string())
}

/// Read a boolean flag from `{data: {<field>: bool}}`; anything else is false
fn read_flag(body: &str, field: &str) -> bool {
    serde_json::from_str::<Envelope<Value>>(body)
        .ok()
        .and_then(|envelope| envelope.data.get(field).and_then(Value::as_bool))
        .unwrap_or(false)
}

/// Authority backed by an authorization server reached over HTTP
#[derive(Clone)]
pub struct RemoteAuthority {
    http_client: Client,
    origin: String,
    api_prefix: String,
    discovery_url: String,
    timeout: Duration,
    discovery: Arc<DiscoveryCache>,
    verify_url: Option<String>,
    codec: Option<Arc<TokenCodec>>,
}

impl std::fmt::Debug for RemoteAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAuthority")
            .field("discovery_url", &self.discovery_url)
            .field("timeout", &self.timeout)
            .field("verify_url", &self.verify_url)
            .finish_non_exhaustive()
    }
}

impl RemoteAuthority {
    /// Build an authority with its own discovery cache
    pub fn new(config: &AuthServerConfig) -> Result<Self> {
        let cache = Arc::new(DiscoveryCache::new(config.discovery_ttl()));
        Self::with_cache(config, cache)
    }

    /// Build an authority sharing `cache` with other authorities
    pub fn with_cache(config: &AuthServerConfig, cache: Arc<DiscoveryCache>) -> Result<Self> {
        config.validate()?;
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ClaimError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            origin: config.origin.trim_end_matches('/').to_string(),
            api_prefix: config.api_prefix.clone(),
            discovery_url: discovery_url(&config.origin, &config.api_prefix),
            timeout: config.timeout(),
            discovery: cache,
            verify_url: None,
            codec: None,
        })
    }

    /// Post tokens to `url` instead of the discovered verify-token endpoint
    pub fn with_verify_url(mut self, url: impl Into<String>) -> Self {
        self.verify_url = Some(url.into());
        self
    }

    /// Validate tokens locally before asking the server
    pub fn with_codec(mut self, codec: Arc<TokenCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn discovery_url(&self) -> &str {
        &self.discovery_url
    }

    pub fn discovery_cache(&self) -> &Arc<DiscoveryCache> {
        &self.discovery
    }

    /// Endpoints advertised by the server, from cache when fresh
    pub async fn endpoints(&self) -> Result<Endpoints> {
        self.discovery
            .get_or_fetch(&self.discovery_url, || self.fetch_endpoints())
            .await
    }

    async fn fetch_endpoints(&self) -> Result<Endpoints> {
        tracing::debug!("Fetching endpoint discovery from: {}", self.discovery_url);

        let response = self
            .http_client
            .get(&self.discovery_url)
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClaimError::source_failure(
                SourceErrorCode::Other(format!("status_{}", status.as_u16())),
                format!("discovery fetch failed with status: {}", status),
            ));
        }

        let body = response.text().await.map_err(transport_error)?;
        let envelope: Envelope<Endpoints> = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("Unusable discovery document from {}: {}", self.discovery_url, e);
            ClaimError::invalid_token(TokenErrorKind::Invalid)
        })?;
        Ok(envelope.data)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<(StatusCode, String)> {
        let response = self
            .http_client
            .post(url)
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        Ok((status, text))
    }

    /// POST the raw token to the verify-token endpoint and parse the principal
    pub async fn verify_token(&self, token: &str) -> Result<Principal> {
        let url = match &self.verify_url {
            Some(url) => url.clone(),
            None => self.endpoints().await?.verify_token,
        };
        tracing::debug!("Verifying token at: {}", url);

        let (status, body) = self.post_json(&url, &json!({ "token": token })).await?;
        if !status.is_success() {
            tracing::warn!("Token rejected by authorization server with status: {}", status);
            return Err(ClaimError::invalid_token(TokenErrorKind::Invalid));
        }

        let envelope: Envelope<VerifiedUser> = serde_json::from_str(&body)
            .map_err(|_| ClaimError::invalid_token(TokenErrorKind::Invalid))?;
        Ok(envelope.data.into_principal())
    }

    /// Check a user name and password against the server
    pub async fn verify_user(&self, user_name: &str, password: &str) -> Result<Principal> {
        let url = self.endpoints().await?.verify_user;
        let (status, body) = self
            .post_json(&url, &json!({ "user_name": user_name, "password": password }))
            .await
            .map_err(|e| e.with_user_name(user_name))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClaimError::InvalidCredentials {
                user_name: Some(user_name.to_string()),
            });
        }
        if !status.is_success() {
            return Err(ClaimError::source_failure(
                SourceErrorCode::Other(format!("status_{}", status.as_u16())),
                format!("verify_user failed with status: {}", status),
            )
            .with_user_name(user_name));
        }

        let envelope: Envelope<VerifiedUser> = serde_json::from_str(&body).map_err(|e| {
            ClaimError::source_failure(
                SourceErrorCode::Other("bad_response".to_string()),
                format!("unreadable verify_user response: {}", e),
            )
            .with_user_name(user_name)
        })?;
        Ok(envelope.data.into_principal())
    }

    /// URL of the server's login page for `app_id`
    pub async fn login_page_url(&self, app_id: &str, title: Option<&str>) -> Result<String> {
        let base = match self.endpoints().await?.login_page {
            Some(url) => url,
            None => format!(
                "{}{}{}",
                self.origin,
                self.api_prefix.trim_end_matches('/'),
                DEFAULT_LOGIN_PAGE_PATH
            ),
        };

        let mut query = format!("app_id={}", urlencoding::encode(app_id));
        if let Some(title) = title {
            query.push_str("&title=");
            query.push_str(&urlencoding::encode(title));
        }
        let separator = if base.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}{}", base, separator, query))
    }

    async fn ask(&self, principal: &Principal, url: &str, payload: Value, flag: &str) -> Result<bool> {
        tracing::debug!("Asking {} for user {}", url, principal.user_name);
        let (status, body) = self
            .post_json(url, &payload)
            .await
            .map_err(|e| e.with_user_name(&principal.user_name))?;

        if !status.is_success() {
            tracing::warn!(
                "Authorization server denied {} for {} with status: {}",
                flag,
                principal.user_name,
                status
            );
            return Ok(false);
        }
        Ok(read_flag(&body, flag))
    }
}

#[async_trait]
impl Authority for RemoteAuthority {
    async fn resolve_principal(&self, token: &str) -> Result<Principal> {
        if let Some(codec) = &self.codec {
            codec.decode(token)?;
        }
        self.verify_token(token).await
    }

    async fn has_role(&self, principal: &Principal, roles: &[String]) -> Result<bool> {
        if roles.is_empty() {
            return Ok(false);
        }
        let url = self.endpoints().await?.verify_user_role;
        let payload = json!({ "user_name": principal.user_name, "required_roles": roles });
        self.ask(principal, &url, payload, "has_role").await
    }

    async fn has_scope(&self, principal: &Principal, scopes: &[String]) -> Result<bool> {
        if scopes.is_empty() {
            return Ok(false);
        }
        let url = self.endpoints().await?.verify_user_scope;
        let payload = json!({ "user_name": principal.user_name, "required_scopes": scopes });
        self.ask(principal, &url, payload, "allowed").await
    }

    async fn role_or_scope_strategy(&self) -> Result<RoleOrScopeStrategy> {
        Ok(match self.endpoints().await?.verify_user_role_or_scope {
            Some(url) => RoleOrScopeStrategy::Combined(url),
            None => RoleOrScopeStrategy::Fallback,
        })
    }

    async fn has_role_or_scope(
        &self,
        principal: &Principal,
        roles: &[String],
        scopes: &[String],
        url: &str,
    ) -> Result<bool> {
        if roles.is_empty() && scopes.is_empty() {
            return Ok(false);
        }
        let payload = json!({
            "user_name": principal.user_name,
            "required_roles": roles,
            "required_scopes": scopes,
        });
        self.ask(principal, url, payload, "has_access").await
    }
}
