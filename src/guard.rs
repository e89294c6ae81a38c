//! Guards and the role/scope checks built on top of them
//!
//! A [`Guard`] authenticates a request against an [`Authority`]. The checks it
//! builds ([`RoleCheck`], [`ScopeCheck`], [`RoleOrScopeCheck`]) authenticate and
//! then authorize. Building a check performs no I/O; every check is cheap to
//! clone and can be installed in front of a service with [`AuthorizeLayer`].
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{routing::get, Router};
//! use claimguard::{AuthorizeLayer, Guard, RemoteAuthority};
//!
//! let guard = Guard::new(Arc::new(RemoteAuthority::new(&server_config)?));
//! let app = Router::new()
//!     .route("/admin", get(admin_handler))
//!     .layer(AuthorizeLayer::new(guard.role(["admin"])));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};

use crate::authority::{Authority, RoleOrScopeStrategy};
use crate::config::CookieConfig;
use crate::error::{ClaimError, Result, TokenErrorKind};
use crate::extract::extract_token;
use crate::principal::Principal;

/// Anything that turns request headers into an authorized principal
#[async_trait]
pub trait Check: Send + Sync {
    async fn authorize(&self, headers: &HeaderMap) -> Result<Principal>;
}

fn to_names<I, S>(names: I) -> Arc<[String]>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect::<Vec<_>>().into()
}

/// Authenticates requests: token extraction plus principal resolution
#[derive(Clone)]
pub struct Guard {
    authority: Arc<dyn Authority>,
    cookie_name: Arc<str>,
}

impl Guard {
    pub fn new(authority: Arc<dyn Authority>) -> Self {
        Self::with_cookie(authority, &CookieConfig::default())
    }

    pub fn with_cookie(authority: Arc<dyn Authority>, cookie: &CookieConfig) -> Self {
        Self {
            authority,
            cookie_name: cookie.name.as_str().into(),
        }
    }

    pub fn authority(&self) -> &Arc<dyn Authority> {
        &self.authority
    }

    /// Resolve the principal behind the request's token
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal> {
        let token = extract_token(headers, &self.cookie_name)
            .ok_or(ClaimError::invalid_token(TokenErrorKind::NoToken))?;
        self.authority.resolve_principal(&token).await
    }

    /// Require any one of `roles`
    pub fn role<I, S>(&self, roles: I) -> RoleCheck
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RoleCheck {
            guard: self.clone(),
            required: to_names(roles),
        }
    }

    /// Require any one of `scopes`
    pub fn scope<I, S>(&self, scopes: I) -> ScopeCheck
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScopeCheck {
            guard: self.clone(),
            required: to_names(scopes),
        }
    }

    /// Require any one of `roles` or any one of `scopes`
    pub fn role_or_scope<R, RS, S, SS>(&self, roles: R, scopes: S) -> RoleOrScopeCheck
    where
        R: IntoIterator<Item = RS>,
        RS: Into<String>,
        S: IntoIterator<Item = SS>,
        SS: Into<String>,
    {
        RoleOrScopeCheck {
            guard: self.clone(),
            roles: to_names(roles),
            scopes: to_names(scopes),
        }
    }
}

#[async_trait]
impl Check for Guard {
    async fn authorize(&self, headers: &HeaderMap) -> Result<Principal> {
        self.authenticate(headers).await
    }
}

#[derive(Clone)]
pub struct RoleCheck {
    guard: Guard,
    required: Arc<[String]>,
}

impl RoleCheck {
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Authorize an already authenticated principal
    pub async fn authorize_principal(&self, principal: Principal) -> Result<Principal> {
        let allowed = !self.required.is_empty()
            && self.guard.authority.has_role(&principal, &self.required).await?;
        if allowed {
            return Ok(principal);
        }
        Err(ClaimError::MissingRequiredRoles {
            user_name: Some(principal.user_name),
            roles: principal.roles,
            required: self.required.to_vec(),
        })
    }
}

#[async_trait]
impl Check for RoleCheck {
    async fn authorize(&self, headers: &HeaderMap) -> Result<Principal> {
        let principal = self.guard.authenticate(headers).await?;
        self.authorize_principal(principal).await
    }
}

#[derive(Clone)]
pub struct ScopeCheck {
    guard: Guard,
    required: Arc<[String]>,
}

impl ScopeCheck {
    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub async fn authorize_principal(&self, principal: Principal) -> Result<Principal> {
        let allowed = !self.required.is_empty()
            && self.guard.authority.has_scope(&principal, &self.required).await?;
        if allowed {
            return Ok(principal);
        }
        Err(ClaimError::MissingRequiredScopes {
            user_name: Some(principal.user_name),
            required: self.required.to_vec(),
        })
    }
}

#[async_trait]
impl Check for ScopeCheck {
    async fn authorize(&self, headers: &HeaderMap) -> Result<Principal> {
        let principal = self.guard.authenticate(headers).await?;
        self.authorize_principal(principal).await
    }
}

#[derive(Clone)]
pub struct RoleOrScopeCheck {
    guard: Guard,
    roles: Arc<[String]>,
    scopes: Arc<[String]>,
}

impl RoleOrScopeCheck {
    /// Allowed when either sub-check allows; a denial is always reported as
    /// [`ClaimError::MissingRequiredRolesOrScopes`].
    pub async fn authorize_principal(&self, principal: Principal) -> Result<Principal> {
        let authority = &self.guard.authority;
        let allowed = if self.roles.is_empty() && self.scopes.is_empty() {
            false
        } else {
            match authority.role_or_scope_strategy().await? {
                RoleOrScopeStrategy::Combined(url) => {
                    authority
                        .has_role_or_scope(&principal, &self.roles, &self.scopes, &url)
                        .await?
                }
                RoleOrScopeStrategy::Fallback => {
                    authority.has_role(&principal, &self.roles).await?
                        || authority.has_scope(&principal, &self.scopes).await?
                }
            }
        };

        if allowed {
            return Ok(principal);
        }
        Err(ClaimError::MissingRequiredRolesOrScopes {
            user_name: Some(principal.user_name),
            roles: principal.roles,
            required_roles: self.roles.to_vec(),
            required_scopes: self.scopes.to_vec(),
        })
    }
}

#[async_trait]
impl Check for RoleOrScopeCheck {
    async fn authorize(&self, headers: &HeaderMap) -> Result<Principal> {
        let principal = self.guard.authenticate(headers).await?;
        self.authorize_principal(principal).await
    }
}

/// Middleware layer that runs a check before the inner service.
///
/// On success the principal is stored in the request extensions (see
/// [`crate::extract::AuthenticatedUser`]); on failure the error is rendered
/// as the response and the inner service is never called.
#[derive(Clone)]
pub struct AuthorizeLayer<C> {
    check: Arc<C>,
}

impl<C> AuthorizeLayer<C> {
    pub fn new(check: C) -> Self {
        Self {
            check: Arc::new(check),
        }
    }
}

impl<S, C> Layer<S> for AuthorizeLayer<C> {
    type Service = AuthorizeMiddleware<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizeMiddleware {
            inner,
            check: self.check.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthorizeMiddleware<S, C> {
    inner: S,
    check: Arc<C>,
}

impl<S, C> Service<Request> for AuthorizeMiddleware<S, C>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    C: Check + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let check = self.check.clone();

        Box::pin(async move {
            match check.authorize(request.headers()).await {
                Ok(principal) => {
                    request.extensions_mut().insert(principal);
                    inner.call(request).await
                }
                Err(err) => Ok(err.into_response()),
            }
        })
    }
}
