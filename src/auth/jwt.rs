//! Access token generation and verification.

use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{Role, Subject};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub workspace_id: String,
    pub role: String,
    pub session_id: String,
}

/// Verified access token contents.
#[derive(Debug, Clone)]
pub struct Claims {
    pub sub: String,
    pub workspace_id: Uuid,
    pub role: Role,
    pub session_id: Uuid,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn subject(&self) -> Option<Subject> {
        Some(Subject {
            user_id: Uuid::parse_str(&self.sub).ok()?,
            workspace_id: self.workspace_id,
            role: self.role,
            session_id: self.session_id,
        })
    }
}

#[derive(Clone)]
pub struct JwtConfig {
    key_pair: Arc<Ed25519KeyPair>,
    public_key: Arc<Ed25519PublicKey>,
    pub access_ttl_seconds: i64,
    pub issuer: Option<String>,
}

impl JwtConfig {
    /// Expects JWT_PRIVATE_KEY env var (base64-encoded Ed25519 key).
    pub fn from_env(access_ttl_seconds: i64, issuer: Option<String>) -> Self {
        use base64::Engine;

        let private_key_b64 =
            std::env::var("JWT_PRIVATE_KEY").expect("JWT_PRIVATE_KEY must be set");

        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(&private_key_b64)
            .expect("JWT_PRIVATE_KEY must be valid base64");

        let key_pair = Ed25519KeyPair::from_bytes(&key_bytes)
            .expect("JWT_PRIVATE_KEY must be a valid Ed25519 key");

        let public_key = key_pair.public_key();

        Self {
            key_pair: Arc::new(key_pair),
            public_key: Arc::new(public_key),
            access_ttl_seconds,
            issuer,
        }
    }

    pub fn from_key_pair(key_pair: Ed25519KeyPair) -> Self {
        let public_key = key_pair.public_key();
        Self {
            key_pair: Arc::new(key_pair),
            public_key: Arc::new(public_key),
            access_ttl_seconds: 900,
            issuer: None,
        }
    }

    pub fn generate_key_pair() -> (String, String) {
        use base64::Engine;

        let key_pair = Ed25519KeyPair::generate();
        let private_b64 = base64::engine::general_purpose::STANDARD.encode(key_pair.to_bytes());
        let public_b64 =
            base64::engine::general_purpose::STANDARD.encode(key_pair.public_key().to_bytes());
        (private_b64, public_b64)
    }

    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        role: Role,
        session_id: Uuid,
    ) -> Result<String, jwt_simple::Error> {
        let custom_claims = AccessClaims {
            workspace_id: workspace_id.to_string(),
            role: role.as_str().to_string(),
            session_id: session_id.to_string(),
        };

        let mut claims = jwt_simple::claims::Claims::with_custom_claims(
            custom_claims,
            Duration::from_secs(self.access_ttl_seconds as u64),
        )
        .with_subject(user_id.to_string());

        if let Some(issuer) = &self.issuer {
            claims = claims.with_issuer(issuer);
        }

        self.key_pair.sign(claims)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Claims, jwt_simple::Error> {
        let mut options = VerificationOptions::default();
        if let Some(issuer) = &self.issuer {
            options.allowed_issuers = Some(std::collections::HashSet::from([issuer.clone()]));
        }

        let token_data = self
            .public_key
            .verify_token::<AccessClaims>(token, Some(options))?;

        let workspace_id = Uuid::parse_str(&token_data.custom.workspace_id)
            .map_err(|e| jwt_simple::Error::msg(format!("invalid workspace id claim: {e}")))?;
        let session_id = Uuid::parse_str(&token_data.custom.session_id)
            .map_err(|e| jwt_simple::Error::msg(format!("invalid session id claim: {e}")))?;
        let role = Role::parse(&token_data.custom.role)
            .ok_or_else(|| jwt_simple::Error::msg("invalid role claim"))?;

        Ok(Claims {
            sub: token_data.subject.unwrap_or_default(),
            workspace_id,
            role,
            session_id,
            exp: token_data
                .expires_at
                .map(|t| t.as_secs() as i64)
                .unwrap_or(0),
            iat: token_data
                .issued_at
                .map(|t| t.as_secs() as i64)
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        let key_pair = Ed25519KeyPair::generate();
        JwtConfig::from_key_pair(key_pair)
    }

    #[test]
    fn test_generate_and_verify_access_token() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let workspace_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let token = config
            .generate_access_token(user_id, workspace_id, Role::Owner, session_id)
            .expect("Token generation should succeed");

        let claims = config
            .verify_access_token(&token)
            .expect("Token verification should succeed");

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.workspace_id, workspace_id);
        assert_eq!(claims.role, Role::Owner);
        assert_eq!(claims.session_id, session_id);
    }

    #[test]
    fn test_claims_convert_to_subject() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let workspace_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let token = config
            .generate_access_token(user_id, workspace_id, Role::Member, session_id)
            .unwrap();
        let subject = config
            .verify_access_token(&token)
            .unwrap()
            .subject()
            .expect("Claims should convert to a subject");

        assert_eq!(subject.user_id, user_id);
        assert_eq!(subject.workspace_id, workspace_id);
        assert_eq!(subject.session_id, session_id);
    }

    #[test]
    fn test_invalid_token_fails_verification() {
        let config = test_config();
        let result = config.verify_access_token("invalid.token.here");
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let config1 = test_config();
        let config2 = test_config();

        let token = config1
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), Role::Member, Uuid::new_v4())
            .expect("Token generation should succeed");

        assert!(config2.verify_access_token(&token).is_err());
    }

    #[test]
    fn test_key_generation() {
        use base64::Engine;

        let (private_b64, _public_b64) = JwtConfig::generate_key_pair();
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(&private_b64)
            .unwrap();
        let key_pair = Ed25519KeyPair::from_bytes(&key_bytes).unwrap();
        let config = JwtConfig::from_key_pair(key_pair);

        let token = config
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), Role::Admin, Uuid::new_v4())
            .unwrap();
        assert!(config.verify_access_token(&token).is_ok());
    }
}
