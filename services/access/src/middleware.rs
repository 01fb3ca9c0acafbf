//! Operator authentication for scan stations
//!
//! Stations present a bearer JWT issued by the admin directory. The `sub`
//! claim identifies the operator; it is used for audit attribution only.

use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{routes::ApiError, state::AppState, validation::validate_operator_id};

/// Claims carried by an operator token
#[derive(Debug, Serialize, Deserialize)]
pub struct OperatorClaims {
    /// Operator id
    pub sub: String,
    /// Expiration time
    pub exp: u64,
}

/// Authenticated station operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub id: String,
}

/// Verifies operator tokens
#[derive(Clone)]
pub struct OperatorAuth {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl OperatorAuth {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate a bearer token and return the operator it names
    pub fn authenticate(&self, token: &str) -> Result<Operator, ApiError> {
        let data = jsonwebtoken::decode::<OperatorClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                warn!("Rejected operator token: {}", e);
                ApiError::Unauthorized
            })?;

        validate_operator_id(&data.claims.sub).map_err(|_| ApiError::Unauthorized)?;

        Ok(Operator {
            id: data.claims.sub,
        })
    }
}

/// Require an operator token and expose the [`Operator`] to handlers
pub async fn operator_auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let operator = state.operator_auth.authenticate(token)?;
    req.extensions_mut().insert(operator);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn token(sub: &str, exp_offset: i64, secret: &str) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset) as u64;
        encode(
            &Header::new(Algorithm::HS256),
            &OperatorClaims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_operator_token() {
        let auth = OperatorAuth::new(SECRET);
        let operator = auth.authenticate(&token("desk-2", 600, SECRET)).unwrap();
        assert_eq!(operator.id, "desk-2");
    }

    #[test]
    fn test_rejected_operator_tokens() {
        let auth = OperatorAuth::new(SECRET);
        assert!(auth.authenticate(&token("desk-2", -600, SECRET)).is_err());
        assert!(
            auth.authenticate(&token("desk-2", 600, "another-secret-another-secret-xx"))
                .is_err()
        );
        assert!(auth.authenticate(&token("", 600, SECRET)).is_err());
        assert!(auth.authenticate("not.a.jwt").is_err());
    }
}
