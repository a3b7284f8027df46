//! JWT authentication for quire.
//!
//! The auth provider issues HS256 tokens whose `sub` is the user id. Every
//! book and chapter route is scoped to that owner. Keys are looked up by
//! `kid` so secrets can be rotated without invalidating live sessions.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use quire_core::UserId;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Owner used for every request when authentication is not required and no
/// token is presented.
pub const ANONYMOUS: &str = "anonymous";

/// Key id of the primary signing secret.
pub const PRIMARY_KID: &str = "primary";

/// Key id of the secret being rotated out.
pub const PREVIOUS_KID: &str = "previous";

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id that owns books
    pub sub: String,
    /// Expiry (Unix timestamp)
    pub exp: u64,
    /// Audience (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Errors during authentication and throttling.
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken(String),
    Expired,
    UnknownKeyId(String),
    RateLimited { retry_after_secs: u64 },
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "missing authorization token"),
            AuthError::InvalidToken(msg) => write!(f, "invalid token: {}", msg),
            AuthError::Expired => write!(f, "token expired"),
            AuthError::UnknownKeyId(kid) => write!(f, "unknown key id: {}", kid),
            AuthError::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {} seconds", retry_after_secs)
            }
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        match &self {
            AuthError::MissingToken
            | AuthError::InvalidToken(_)
            | AuthError::UnknownKeyId(_)
            | AuthError::Expired => (StatusCode::UNAUTHORIZED, body).into_response(),
            AuthError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(
                    axum::http::header::RETRY_AFTER,
                    retry_after_secs.to_string(),
                )],
                body,
            )
                .into_response(),
        }
    }
}

/// Holds secrets for JWT verification, keyed by `kid`.
#[derive(Clone)]
pub struct KeyStore {
    keys: HashMap<String, DecodingKey>,
    /// Used when a token carries no `kid`
    default_kid: Option<String>,
    expected_aud: Option<String>,
    /// Clock skew leeway in seconds
    leeway_secs: u64,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            default_kid: None,
            expected_aud: None,
            leeway_secs: 60,
        }
    }

    /// Add a key with the given id and secret. The first key added becomes
    /// the default.
    pub fn add_key(&mut self, kid: impl Into<String>, secret: impl AsRef<[u8]>) {
        let kid = kid.into();
        if self.default_kid.is_none() {
            self.default_kid = Some(kid.clone());
        }
        self.keys
            .insert(kid, DecodingKey::from_secret(secret.as_ref()));
    }

    pub fn set_expected_aud(&mut self, aud: impl Into<String>) {
        self.expected_aud = Some(aud.into());
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Decode and validate a token.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        // Fail closed if no keys configured
        if self.keys.is_empty() {
            return Err(AuthError::InvalidToken("no keys configured".into()));
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .or_else(|| self.default_kid.clone())
            .ok_or_else(|| AuthError::InvalidToken("no key id and no default key".into()))?;
        let key = self
            .keys
            .get(&kid)
            .ok_or_else(|| AuthError::UnknownKeyId(kid.clone()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = self.leeway_secs;
        match &self.expected_aud {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                AuthError::InvalidToken("audience mismatch".into())
            }
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".into()));
        }
        Ok(data.claims)
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for authentication.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Current signing secret (env: QUIRE_JWT_SECRET)
    pub secret: Option<String>,
    /// Secret still accepted during rotation (env: QUIRE_JWT_PREVIOUS_SECRET)
    pub previous_secret: Option<String>,
    pub expected_aud: Option<String>,
    /// Reject requests without a token
    pub require_auth: bool,
}

impl AuthConfig {
    pub fn build_keystore(&self) -> KeyStore {
        let mut store = KeyStore::new();
        if let Some(secret) = &self.secret {
            store.add_key(PRIMARY_KID, secret.as_bytes());
        }
        if let Some(secret) = &self.previous_secret {
            store.add_key(PREVIOUS_KID, secret.as_bytes());
        }
        if let Some(aud) = &self.expected_aud {
            store.set_expected_aud(aud);
        }
        store
    }
}

/// State extension that holds auth config
#[derive(Clone)]
pub struct AuthState {
    pub keystore: Arc<KeyStore>,
    pub require_auth: bool,
}

/// Claims if a valid token was presented
#[derive(Debug, Clone)]
pub struct MaybeClaims(pub Option<Claims>);

/// The user a request acts for.
///
/// The token's subject when one is presented; [`ANONYMOUS`] when auth is
/// optional and the request carries no token.
#[derive(Debug, Clone)]
pub struct Owner(pub UserId);

fn extract_bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

impl<S> FromRequestParts<S> for MaybeClaims
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(auth_state) = parts.extensions.get::<AuthState>().cloned() else {
            return Ok(MaybeClaims(None));
        };

        let Some(token) = extract_bearer_token(parts) else {
            if auth_state.require_auth {
                return Err(AuthError::MissingToken);
            }
            return Ok(MaybeClaims(None));
        };

        match auth_state.keystore.verify(token) {
            Ok(claims) => Ok(MaybeClaims(Some(claims))),
            Err(e) => {
                warn!("auth failed: {}", e);
                Err(e)
            }
        }
    }
}

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let MaybeClaims(claims) = MaybeClaims::from_request_parts(parts, state).await?;
        let sub = claims.map(|c| c.sub).unwrap_or_else(|| ANONYMOUS.to_string());
        Ok(Owner(UserId::new(sub)))
    }
}

/// Issue a token for `sub`, signed with the primary key.
pub fn create_user_token(secret: &[u8], sub: &str, expires_in_secs: u64) -> Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
    let claims = Claims {
        sub: sub.to_string(),
        exp: now + expires_in_secs,
        aud: None,
    };

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(PRIMARY_KID.to_string());

    encode(&header, &claims, &EncodingKey::from_secret(secret))
        .map_err(|e| anyhow!("failed to encode token: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn config(secret: &str) -> AuthConfig {
        AuthConfig {
            secret: Some(secret.into()),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_token_roundtrip() {
        let token = create_user_token(b"s3cret", "writer-1", 3600).unwrap();
        let claims = config("s3cret").build_keystore().verify(&token).unwrap();
        assert_eq!(claims.sub, "writer-1");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = create_user_token(b"other", "writer-1", 3600).unwrap();
        let err = config("s3cret").build_keystore().verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn test_expired_token() {
        let claims = Claims {
            sub: "writer-1".into(),
            exp: 1_000,
            aud: None,
        };
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(PRIMARY_KID.into());
        let token = encode(&header, &claims, &EncodingKey::from_secret(b"s3cret")).unwrap();

        let err = config("s3cret").build_keystore().verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::Expired));
    }

    #[test]
    fn test_rotated_secret_still_accepted() {
        let store = AuthConfig {
            secret: Some("new".into()),
            previous_secret: Some("old".into()),
            ..AuthConfig::default()
        }
        .build_keystore();

        let claims = Claims {
            sub: "writer-2".into(),
            exp: u64::MAX / 2,
            aud: None,
        };
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(PREVIOUS_KID.into());
        let token = encode(&header, &claims, &EncodingKey::from_secret(b"old")).unwrap();
        assert_eq!(store.verify(&token).unwrap().sub, "writer-2");

        header.kid = Some("retired".into());
        let token = encode(&header, &claims, &EncodingKey::from_secret(b"old")).unwrap();
        assert!(matches!(store.verify(&token), Err(AuthError::UnknownKeyId(_))));
    }

    #[test]
    fn test_no_keys_fails_closed() {
        let token = create_user_token(b"s3cret", "writer-1", 3600).unwrap();
        let err = KeyStore::new().verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }
}
