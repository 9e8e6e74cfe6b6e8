//! Authorization contract consumed from the identity collaborator.
//!
//! The gateway and HTTP layer only depend on the [`TokenVerifier`] seam:
//! given a bearer credential, resolve to the caller's identity or refuse.

use crate::error::AppError;
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

/// Resolved caller identity.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AppError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    name: String,
    #[allow(dead_code)]
    exp: i64,
}

/// Verifies HS256 tokens issued by the identity service.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AppError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AppError::Unauthorized)?;
        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthorized)?;
        Ok(Identity {
            user_id,
            display_name: data.claims.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        name: String,
        exp: i64,
    }

    fn token_for(secret: &str, sub: &str, name: &str) -> String {
        let claims = TestClaims {
            sub: sub.to_string(),
            name: name.to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_token() {
        let user_id = Uuid::new_v4();
        let verifier = JwtVerifier::new("s3cret");
        let token = token_for("s3cret", &user_id.to_string(), "Ada");

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.display_name, "Ada");
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let verifier = JwtVerifier::new("s3cret");
        let token = token_for("other", &Uuid::new_v4().to_string(), "Ada");
        assert!(matches!(
            verifier.verify(&token).await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn rejects_non_uuid_subject() {
        let verifier = JwtVerifier::new("s3cret");
        let token = token_for("s3cret", "not-a-uuid", "Ada");
        assert!(matches!(
            verifier.verify(&token).await,
            Err(AppError::Unauthorized)
        ));
    }
}
