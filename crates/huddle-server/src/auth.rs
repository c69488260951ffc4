//! Bearer token verification.
//!
//! Tokens are HS256 JWTs carrying the user's id and display name.

use crate::config::AuthConfig;
use async_trait::async_trait;
use chrono::Utc;
use huddle_core::{Authenticator, ClientIdentity, CollaboratorError};
use huddle_protocol::UserId;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub username: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Verifies (and, for tooling and tests, mints) HS256 tokens.
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl JwtAuthenticator {
    #[must_use]
    pub fn new(secret: &str, issuer: impl Into<String>, ttl: Duration) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.validate_nbf = true;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            ttl,
        }
    }

    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            config.issuer.clone(),
            Duration::from_secs(config.token_ttl_secs),
        )
    }

    /// Issue a token for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be signed.
    pub fn mint(
        &self,
        user_id: UserId,
        username: impl Into<String>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            user_id,
            username: username.into(),
            iss: self.issuer.clone(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl),
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims with this authenticator's key.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be signed.
    pub fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn verify(&self, token: &str) -> Result<ClientIdentity, CollaboratorError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "Token rejected");
                CollaboratorError::Unauthorized(e.to_string())
            })?;

        if data.claims.username.trim().is_empty() {
            return Err(CollaboratorError::Unauthorized(
                "token has no username".to_string(),
            ));
        }

        Ok(ClientIdentity::new(data.claims.user_id, data.claims.username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> JwtAuthenticator {
        JwtAuthenticator::new("test-secret", "huddle", Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_mint_and_verify() {
        let auth = authenticator();
        let token = auth.mint(42, "alice").unwrap();

        let identity = auth.verify(&token).await.unwrap();
        assert_eq!(identity.user_id, 42);
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let other = JwtAuthenticator::new("other-secret", "huddle", Duration::from_secs(3600));
        let token = other.mint(1, "mallory").unwrap();

        let result = authenticator().verify(&token).await;
        assert!(matches!(result, Err(CollaboratorError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let other = JwtAuthenticator::new("test-secret", "elsewhere", Duration::from_secs(3600));
        let token = other.mint(1, "bob").unwrap();

        let result = authenticator().verify(&token).await;
        assert!(matches!(result, Err(CollaboratorError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let auth = authenticator();
        let now = Utc::now().timestamp();
        let token = auth
            .sign(&Claims {
                user_id: 1,
                username: "bob".to_string(),
                iss: "huddle".to_string(),
                iat: now - 7200,
                nbf: now - 7200,
                exp: now - 3600,
            })
            .unwrap();

        let result = auth.verify(&token).await;
        assert!(matches!(result, Err(CollaboratorError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_garbage_and_blank_username_rejected() {
        let auth = authenticator();
        assert!(auth.verify("not.a.jwt").await.is_err());

        let blank = auth.mint(5, "  ").unwrap();
        assert!(auth.verify(&blank).await.is_err());
    }
}
