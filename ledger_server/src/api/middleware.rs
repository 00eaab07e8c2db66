//! Authentication middleware for protected endpoints.
//!
//! Tokens are issued elsewhere; this server only verifies HS256 access
//! tokens signed with `JWT_SECRET` and injects an [`AuthContext`] into request
//! extensions for downstream handlers.
//!
//! # Extracting the caller
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use ledger_server::api::middleware::AuthContext;
//!
//! async fn protected_handler(Extension(auth): Extension<AuthContext>) -> String {
//!     format!("Authenticated as user {}", auth.user_id)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use credits_ledger::{
    ledger::UserId,
    payments::{Buyer, Requester},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;

/// Access token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: UserId,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// Issued at (unix seconds)
    pub iat: i64,
}

/// Authenticated caller, available to handlers as `Extension<AuthContext>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: UserId,
    pub is_admin: bool,
    pub email: Option<String>,
}

impl AuthContext {
    pub fn requester(&self) -> Requester {
        Requester {
            user_id: self.user_id,
            is_admin: self.is_admin,
        }
    }

    pub fn buyer(&self) -> Buyer {
        Buyer {
            user_id: self.user_id,
            email: self.email.clone(),
        }
    }
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            is_admin: claims.is_admin,
            email: claims.email,
        }
    }
}

/// HS256 access token verifier
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Decode and validate an access token
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        Ok(decode::<Claims>(token, &self.key, &self.validation)?.claims)
    }
}

/// Pull the token out of `Authorization: Bearer <token>`
fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Authentication middleware that validates JWT tokens and injects the caller.
///
/// # Behavior
///
/// - **Success**: Token valid → Injects [`AuthContext`] into request extensions → Calls next handler
/// - **Missing header / invalid format / invalid or expired token**: Returns `401 Unauthorized`
pub async fn auth_middleware(
    State(verifier): State<Arc<TokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request).ok_or(ApiError::Unauthenticated)?;

    let claims = verifier.verify(token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected access token");
        ApiError::Unauthenticated
    })?;

    request.extensions_mut().insert(AuthContext::from(claims));
    Ok(next.run(request).await)
}
