//! Bearer token authentication
//!
//! Tokens are issued by the identity service and signed with a shared HS256
//! secret. `sub` carries the numeric user id, `role` one of `User`, `Staff`,
//! `Admin`.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::ApiError;
use super::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[default]
    User,
    Staff,
    Admin,
}

impl Role {
    pub fn is_staff(self) -> bool { matches!(self, Self::Staff | Self::Admin) }
    pub fn is_admin(self) -> bool { self == Self::Admin }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: Role,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token subject is not a user id")]
    BadSubject,
    #[error("Failed to sign token: {0}")]
    Signing(String),
}

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    audience: Option<String>,
}

impl JwtKeys {
    pub fn new(secret: &str, issuer: Option<String>, audience: Option<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(iss) = &issuer {
            validation.set_issuer(&[iss]);
        }
        match &audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            audience,
        }
    }

    pub fn verify(&self, token: &str) -> Result<CurrentUser, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid,
        })?;
        let id = data.claims.sub.parse().map_err(|_| AuthError::BadSubject)?;
        Ok(CurrentUser { id, role: data.claims.role })
    }

    /// Signs a token; used by tooling and tests, production tokens come from
    /// the identity service.
    pub fn issue(&self, user_id: i64, role: Role, ttl: chrono::Duration) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            exp: (Utc::now() + ttl).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| AuthError::Signing(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
    pub role: Role,
}

impl CurrentUser {
    pub fn require_staff(&self) -> Result<(), ApiError> {
        if !self.role.is_staff() {
            return Err(ApiError::forbidden("Staff access required"));
        }
        Ok(())
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if !self.role.is_admin() {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(*user);
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header"))?;

        let user = state.jwt.verify(token.trim()).map_err(|e| {
            tracing::warn!(error = %e, uri = %parts.uri, "Rejected bearer token");
            ApiError::unauthorized(e.to_string())
        })?;
        parts.extensions.insert(user);
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_keeps_id_and_role() {
        let keys = JwtKeys::new("secret", Some("bookhaven".into()), None);
        let token = keys.issue(42, Role::Staff, chrono::Duration::minutes(5)).unwrap();
        assert_eq!(keys.verify(&token), Ok(CurrentUser { id: 42, role: Role::Staff }));
    }

    #[test]
    fn expired_and_foreign_tokens_are_rejected() {
        let keys = JwtKeys::new("secret", None, None);
        let expired = keys.issue(1, Role::User, chrono::Duration::hours(-2)).unwrap();
        assert_eq!(keys.verify(&expired), Err(AuthError::Expired));

        let other = JwtKeys::new("other", None, None).issue(1, Role::User, chrono::Duration::minutes(5)).unwrap();
        assert_eq!(keys.verify(&other), Err(AuthError::Invalid));
    }

    #[test]
    fn admin_is_staff() {
        let admin = CurrentUser { id: 1, role: Role::Admin };
        assert!(admin.require_staff().is_ok());
        assert!(admin.require_admin().is_ok());
        let staff = CurrentUser { id: 2, role: Role::Staff };
        assert!(staff.require_admin().is_err());
        assert!(CurrentUser { id: 3, role: Role::User }.require_staff().is_err());
    }
}
