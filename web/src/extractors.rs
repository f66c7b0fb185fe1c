//! Custom Axum extractors.
//!
//! - `CorrelationId`: extract or generate request correlation IDs
//! - `BearerToken`: the raw `Authorization: Bearer <token>` credential
//! - `AuthenticatedUser`: the verified caller, resolved through an
//!   [`IdentityVerifier`] found in the router state
//!
//! # Examples
//!
//! ```ignore
//! async fn join(
//!     State(state): State<AppState>,
//!     Path(event_id): Path<EventId>,
//!     user: AuthenticatedUser,
//! ) -> Result<Json<WaitingListEntry>, AppError> {
//!     Ok(Json(state.service.join_queue(event_id, user.user_id).await?))
//! }
//! ```

use crate::error::AppError;
use admission_core::types::UserId;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Extracts the correlation ID from the `X-Correlation-ID` header,
/// or generates a new UUID v4 if not present.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // The middleware may already have picked one
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        Ok(Self(crate::middleware::from_headers(&parts.headers)))
    }
}

/// Bearer token extracted from `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing authorization header"))?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::unauthorized("Invalid authorization format. Expected 'Bearer <token>'")
        })?;

        if token.is_empty() {
            return Err(AppError::unauthorized("Empty bearer token"));
        }

        Ok(Self(token.to_string()))
    }
}

/// Boxed future returned by identity verification
pub type IdentityFuture<'a> = Pin<Box<dyn Future<Output = Option<UserId>> + Send + 'a>>;

/// Resolves a bearer credential to a verified user.
///
/// Identity provisioning lives outside the engine; deployments plug their
/// session service or token introspection in behind this trait.
pub trait IdentityVerifier: Send + Sync {
    /// Returns the user the token belongs to, or `None` if it is not valid.
    fn verify<'a>(&'a self, token: &'a str) -> IdentityFuture<'a>;
}

/// Fixed token table, for development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    /// Empty table; every token is rejected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token for `user_id`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user_id: UserId) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }

    /// Number of known tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no token is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl FromIterator<(String, UserId)> for StaticTokenVerifier {
    fn from_iter<I: IntoIterator<Item = (String, UserId)>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

impl IdentityVerifier for StaticTokenVerifier {
    fn verify<'a>(&'a self, token: &'a str) -> IdentityFuture<'a> {
        Box::pin(async move { self.tokens.get(token).copied() })
    }
}

/// Authenticated caller.
///
/// Rejects with 401 before the handler runs, so no state is touched for an
/// unidentified caller. The router state must expose an
/// `Arc<dyn IdentityVerifier>` through [`FromRef`].
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    /// The verified user ID
    pub user_id: UserId,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    Arc<dyn IdentityVerifier>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let bearer = BearerToken::from_request_parts(parts, state).await?;
        let verifier = <Arc<dyn IdentityVerifier>>::from_ref(state);

        match verifier.verify(&bearer.0).await {
            Some(user_id) => Ok(Self { user_id }),
            None => {
                tracing::debug!("rejected unknown bearer token");
                Err(AppError::unauthorized("Invalid or expired credentials"))
            }
        }
    }
}
