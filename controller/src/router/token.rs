//! Stream-JWT issuance and verification (§4.7): HS256 with a shared secret kept separate from
//! the controller's own ES256 signing key, so the router can verify tokens locally without
//! needing OIDC discovery.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const STREAM_TOKEN_TTL_MINUTES: i64 = 30;
const STREAM_TOKEN_ISSUER: &str = "stream";
const STREAM_TOKEN_AUDIENCE: &str = "router";

#[derive(Debug, Error)]
pub enum StreamTokenError {
    #[error("invalid stream token: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize)]
struct StreamClaims {
    iss: String,
    sub: String,
    aud: Vec<String>,
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: String,
}

/// Mints and verifies the pair of HS256 tokens Dial hands to the client and the exporter
/// (§4.7): both share `sub` (the stream id) so the router can pair them on `Stream`, but each
/// gets a distinct `jti`.
pub struct StreamTokenIssuer {
    secret: Vec<u8>,
}

impl StreamTokenIssuer {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    pub fn issue(&self, stream_id: &str) -> Result<String, StreamTokenError> {
        let now = Utc::now();
        let claims = StreamClaims {
            iss: STREAM_TOKEN_ISSUER.to_string(),
            sub: stream_id.to_string(),
            aud: vec![STREAM_TOKEN_AUDIENCE.to_string()],
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + Duration::minutes(STREAM_TOKEN_TTL_MINUTES)).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| StreamTokenError::Invalid(e.to_string()))
    }

    /// Returns the stream id (`sub`) the token authenticates, if it's valid.
    pub fn verify(&self, token: &str) -> Result<String, StreamTokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[STREAM_TOKEN_AUDIENCE]);
        let data = decode::<StreamClaims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(|e| StreamTokenError::Invalid(e.to_string()))?;
        if data.claims.iss != STREAM_TOKEN_ISSUER {
            return Err(StreamTokenError::Invalid("unexpected issuer".to_string()));
        }
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_to_the_same_stream_id() {
        let issuer = StreamTokenIssuer::new(b"router-secret".to_vec());
        let token = issuer.issue("stream-1").unwrap();
        assert_eq!(issuer.verify(&token).unwrap(), "stream-1");
    }

    #[test]
    fn two_tokens_for_the_same_stream_share_sub_but_not_jti() {
        let issuer = StreamTokenIssuer::new(b"router-secret".to_vec());
        let a = issuer.issue("stream-1").unwrap();
        let b = issuer.issue("stream-1").unwrap();
        assert_ne!(a, b);
        assert_eq!(issuer.verify(&a).unwrap(), issuer.verify(&b).unwrap());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = StreamTokenIssuer::new(b"router-secret".to_vec());
        let token = issuer.issue("stream-1").unwrap();
        let other = StreamTokenIssuer::new(b"different-secret".to_vec());
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn token_for_a_different_audience_is_rejected() {
        let issuer = StreamTokenIssuer::new(b"router-secret".to_vec());
        let now = Utc::now();
        let claims = StreamClaims {
            iss: STREAM_TOKEN_ISSUER.to_string(),
            sub: "stream-1".to_string(),
            aud: vec!["not-router".to_string()],
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + Duration::minutes(5)).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"router-secret")).unwrap();
        assert!(issuer.verify(&token).is_err());
    }
}
