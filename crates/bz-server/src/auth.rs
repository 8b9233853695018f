use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AppState;

const AUTHORIZATION_BEARER_PREFIX: &str = "Bearer ";
const ENV_AUTH_TOKEN: &str = "BAZAAR_AUTH_TOKEN";
const ENV_AUTH_ROLE: &str = "BAZAAR_AUTH_ROLE";
const ENV_JWT_SECRET: &str = "BAZAAR_JWT_SECRET";

/// Maximum bearer token length (8 KiB).
const MAX_TOKEN_LENGTH: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRole {
    Admin,
    User,
    Anonymous,
}

impl FromStr for AuthRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            _ => Err(format!("invalid auth role: {value}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject: Option<String>,
    pub role: AuthRole,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self {
            subject: None,
            role: AuthRole::Anonymous,
        }
    }

    /// Context used when no credentials are configured at all.
    pub fn local_user() -> Self {
        Self {
            subject: None,
            role: AuthRole::User,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == AuthRole::Admin
    }

    pub fn can_write(&self) -> bool {
        self.role != AuthRole::Anonymous
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    pub shared_token: Option<String>,
    pub shared_role: AuthRole,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            shared_token: None,
            shared_role: AuthRole::Admin,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            jwt_secret: read_non_empty_env(ENV_JWT_SECRET),
            shared_token: read_non_empty_env(ENV_AUTH_TOKEN),
            shared_role: read_non_empty_env(ENV_AUTH_ROLE)
                .and_then(|value| AuthRole::from_str(&value).ok())
                .unwrap_or(AuthRole::Admin),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.jwt_secret.is_some() || self.shared_token.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: String,
    exp: usize,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    InvalidHeaderFormat,
    InvalidSharedToken,
    InvalidJwt,
}

/// Resolve the caller and attach an [`AuthContext`] to the request.
///
/// - With neither `BAZAAR_JWT_SECRET` nor `BAZAAR_AUTH_TOKEN` set, every
///   caller is a plain user and admin routes stay closed.
/// - Otherwise a request without `Authorization` is anonymous (read-only),
///   and a bearer token must match the shared token or be a valid HS256 JWT.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match auth_context_from_headers(request.headers(), &state.auth) {
        Ok(auth) => {
            request.extensions_mut().insert(auth);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(?err, path = %request.uri().path(), "rejected bearer token");
            ApiError::Unauthorized.into_response()
        }
    }
}

pub fn auth_context_from_headers(
    headers: &HeaderMap,
    config: &AuthConfig,
) -> Result<AuthContext, AuthError> {
    let auth_header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok());
    auth_context_from_authorization_header(auth_header, config)
}

fn auth_context_from_authorization_header(
    auth_header: Option<&str>,
    config: &AuthConfig,
) -> Result<AuthContext, AuthError> {
    if !config.is_enabled() {
        return Ok(AuthContext::local_user());
    }
    let Some(header) = auth_header else {
        return Ok(AuthContext::anonymous());
    };

    let token = extract_bearer_token(header)?;

    if let Some(shared_token) = &config.shared_token {
        if bool::from(token.as_bytes().ct_eq(shared_token.as_bytes())) {
            return Ok(AuthContext {
                subject: Some("shared-token".into()),
                role: config.shared_role,
            });
        }
    }

    if let Some(jwt_secret) = &config.jwt_secret {
        return validate_jwt(token, jwt_secret);
    }

    Err(AuthError::InvalidSharedToken)
}

fn extract_bearer_token(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix(AUTHORIZATION_BEARER_PREFIX)
        .ok_or(AuthError::InvalidHeaderFormat)?;
    if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
        return Err(AuthError::InvalidHeaderFormat);
    }
    Ok(token)
}

fn validate_jwt(token: &str, secret: &str) -> Result<AuthContext, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_err| AuthError::InvalidJwt)?;

    if token_data.claims.sub.trim().is_empty() || token_data.claims.exp == 0 {
        return Err(AuthError::InvalidJwt);
    }

    let role = token_data
        .claims
        .role
        .as_deref()
        .map(AuthRole::from_str)
        .transpose()
        .map_err(|_err| AuthError::InvalidJwt)?
        .unwrap_or(AuthRole::User);

    Ok(AuthContext {
        subject: Some(token_data.claims.sub),
        role,
    })
}

fn read_non_empty_env(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Admin routes answer like missing resources for everyone else.
pub fn require_admin(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(ApiError::hidden())
    }
}

pub fn require_writer(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.can_write() {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn config(token: Option<&str>, secret: Option<&str>) -> AuthConfig {
        AuthConfig {
            jwt_secret: secret.map(str::to_string),
            shared_token: token.map(str::to_string),
            shared_role: AuthRole::Admin,
        }
    }

    fn jwt(secret: &str, role: Option<&str>, exp: u64) -> String {
        let mut claims = json!({ "sub": "user-1", "exp": exp });
        if let Some(role) = role {
            claims["role"] = json!(role);
        }
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> u64 {
        (chrono::Utc::now().timestamp() + 3600) as u64
    }

    #[test]
    fn disabled_auth_yields_plain_user() {
        let auth = auth_context_from_authorization_header(None, &config(None, None)).unwrap();
        assert_eq!(auth.role, AuthRole::User);
        assert!(!auth.is_admin());
    }

    #[test]
    fn missing_header_is_anonymous_when_enabled() {
        let auth = auth_context_from_authorization_header(None, &config(Some("t"), None)).unwrap();
        assert_eq!(auth.role, AuthRole::Anonymous);
        assert!(!auth.can_write());
    }

    #[test]
    fn shared_token_maps_to_configured_role() {
        let auth =
            auth_context_from_authorization_header(Some("Bearer t0k"), &config(Some("t0k"), None))
                .unwrap();
        assert!(auth.is_admin());

        let err = auth_context_from_authorization_header(Some("Bearer nope"), &config(Some("t0k"), None))
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidSharedToken);

        for near_miss in ["Bearer t0K", "Bearer t0", "Bearer t0k0"] {
            let err = auth_context_from_authorization_header(Some(near_miss), &config(Some("t0k"), None))
                .unwrap_err();
            assert_eq!(err, AuthError::InvalidSharedToken, "{near_miss}");
        }
    }

    #[test]
    fn jwt_role_claim_is_honored() {
        let cfg = config(None, Some("secret"));
        let admin = jwt("secret", Some("admin"), far_future());
        let auth =
            auth_context_from_authorization_header(Some(&format!("Bearer {admin}")), &cfg).unwrap();
        assert!(auth.is_admin());
        assert_eq!(auth.subject.as_deref(), Some("user-1"));

        let plain = jwt("secret", None, far_future());
        let auth =
            auth_context_from_authorization_header(Some(&format!("Bearer {plain}")), &cfg).unwrap();
        assert_eq!(auth.role, AuthRole::User);
    }

    #[test]
    fn bad_jwts_are_rejected() {
        let cfg = config(None, Some("secret"));
        let wrong_key = jwt("other", Some("admin"), far_future());
        assert_eq!(
            auth_context_from_authorization_header(Some(&format!("Bearer {wrong_key}")), &cfg)
                .unwrap_err(),
            AuthError::InvalidJwt
        );
        let expired = jwt("secret", Some("admin"), 1_000);
        assert!(
            auth_context_from_authorization_header(Some(&format!("Bearer {expired}")), &cfg)
                .is_err()
        );
        let bad_role = jwt("secret", Some("root"), far_future());
        assert!(
            auth_context_from_authorization_header(Some(&format!("Bearer {bad_role}")), &cfg)
                .is_err()
        );
        assert_eq!(
            auth_context_from_authorization_header(Some("Basic abc"), &cfg).unwrap_err(),
            AuthError::InvalidHeaderFormat
        );
    }

    #[test]
    fn admin_guard_hides_routes() {
        assert!(require_admin(&AuthContext::local_user()).is_err());
        assert!(require_writer(&AuthContext::anonymous()).is_err());
        assert!(require_writer(&AuthContext::local_user()).is_ok());
    }
}
