use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

/// Role carried by a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
}

/// JWT claims issued by the identity collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Customer id
    pub sub: Uuid,
    pub role: Role,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub exp: usize,
}

/// The identity attached to the current request.
///
/// Extracting this fails with 401 when the bearer token is missing,
/// malformed, expired, or signed with the wrong key.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub customer_id: Uuid,
    pub role: Role,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Rejects non-admin callers with 403.
    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "Administrator role required".to_string(),
            ))
        }
    }
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            customer_id: claims.sub,
            role: claims.role,
            email: claims.email,
            phone: claims.phone,
        }
    }
}

/// Decodes and validates a bearer token against the configured secret.
pub fn decode_token(
    token: &str,
    secret: &str,
    issuer: Option<&str>,
) -> Result<Claims, ServiceError> {
    let mut validation = Validation::new(Algorithm::HS256);
    if let Some(iss) = issuer {
        validation.set_issuer(&[iss]);
    }

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| ServiceError::Unauthorized(format!("Invalid bearer token: {}", e)))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("Missing Authorization header".to_string())
            })?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ServiceError::Unauthorized("Authorization header must be a bearer token".to_string())
        })?;

        let claims = decode_token(
            token,
            &state.config.jwt_secret,
            state.config.jwt_issuer.as_deref(),
        )?;

        Ok(AuthenticatedUser::from(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";

    fn issue(claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("token encodes")
    }

    fn claims(role: Role) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            role,
            email: Some("asha@example.com".to_string()),
            phone: None,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        }
    }

    #[test]
    fn round_trips_valid_token() {
        let claims = claims(Role::Customer);
        let token = issue(&claims);

        let decoded = decode_token(&token, SECRET, None).expect("valid token");
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.role, Role::Customer);
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = issue(&claims(Role::Customer));
        let err = decode_token(&token, "a-different-secret", None).unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[test]
    fn rejects_expired_token() {
        let mut expired = claims(Role::Customer);
        expired.exp = (chrono::Utc::now().timestamp() - 120) as usize;
        let token = issue(&expired);
        assert!(decode_token(&token, SECRET, None).is_err());
    }

    #[test]
    fn admin_gate() {
        let admin = AuthenticatedUser::from(claims(Role::Admin));
        let customer = AuthenticatedUser::from(claims(Role::Customer));

        assert!(admin.require_admin().is_ok());
        assert!(matches!(
            customer.require_admin(),
            Err(ServiceError::Forbidden(_))
        ));
    }
}
