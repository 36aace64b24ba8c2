//! The controller's own ECDSA P-256 signer (§4.2): deterministic key derivation from a seed,
//! OIDC discovery document + JWKS publishing, and JWT minting for internal subjects.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::authenticator::{UserInfo, VerifierOutcome};

pub const KID: &str = "default";
const INTERNAL_TOKEN_TTL_DAYS: i64 = 365;
const EXTERNAL_PLACEHOLDER: &str = "placeholder for external OIDC provider access token";

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("failed to mint token: {0}")]
    Mint(String),
}

#[derive(Serialize, Deserialize)]
struct InternalClaims {
    iss: String,
    sub: String,
    aud: Vec<String>,
    iat: i64,
    exp: i64,
}

/// Holds the controller's ECDSA P-256 key pair, derived deterministically from a seed (§4.2)
/// so every replica started with the same seed agrees on the same key without a shared secret
/// store. Rotation is not implemented here: re-deriving from a new seed invalidates every
/// bootstrap token minted under the old one (see DESIGN.md).
pub struct Signer {
    issuer: String,
    audience: String,
    prefix: String,
    signing_key: SigningKey,
}

impl Signer {
    pub fn new(
        seed: &[u8],
        issuer: impl Into<String>,
        audience: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        let digest = Sha256::digest(seed);
        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&digest[..8]);
        let mut rng = ChaCha8Rng::seed_from_u64(u64::from_le_bytes(seed_bytes));
        let signing_key = SigningKey::random(&mut rng);
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            prefix: prefix.into(),
            signing_key,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// §4.2 `Token(subject)`: only a subject under our own prefix gets a signed JWT back;
    /// everything else belongs to an external identity provider this controller never mints
    /// tokens for, so the caller gets a literal placeholder instead.
    pub fn token(&self, subject: &str) -> Result<String, SignerError> {
        let Some(stripped) = subject.strip_prefix(&self.prefix) else {
            return Ok(EXTERNAL_PLACEHOLDER.to_string());
        };
        let now = Utc::now();
        let claims = InternalClaims {
            iss: self.issuer.clone(),
            sub: stripped.to_string(),
            aud: vec![self.audience.clone()],
            iat: now.timestamp(),
            exp: (now + Duration::days(INTERNAL_TOKEN_TTL_DAYS)).timestamp(),
        };
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(KID.to_string());
        let pem = self
            .signing_key
            .to_pkcs8_pem(Default::default())
            .map_err(|e| SignerError::Mint(e.to_string()))?;
        let encoding_key =
            EncodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| SignerError::Mint(e.to_string()))?;
        encode(&header, &claims, &encoding_key).map_err(|e| SignerError::Mint(e.to_string()))
    }

    /// Verifies a token minted by this same signer. Used as the last entry in the
    /// authenticator's verifier union (§4.3) so internally-issued bootstrap tokens authenticate
    /// the same way an external OIDC token would.
    pub fn verify(&self, token: &str) -> Result<UserInfo, VerifierOutcome> {
        let pem = self
            .signing_key
            .verifying_key()
            .to_public_key_pem(Default::default())
            .map_err(|e| VerifierOutcome::Error(e.to_string()))?;
        let decoding_key =
            DecodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| VerifierOutcome::Error(e.to_string()))?;
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_audience(&[self.audience.clone()]);
        let data = decode::<InternalClaims>(token, &decoding_key, &validation)
            .map_err(|e| VerifierOutcome::Rejected(e.to_string()))?;
        if data.claims.iss != self.issuer {
            return Err(VerifierOutcome::Rejected("unexpected issuer".to_string()));
        }
        Ok(UserInfo {
            username: format!("{}{}", self.prefix, data.claims.sub),
            groups: Vec::new(),
            uid: String::new(),
            extra: Default::default(),
        })
    }

    pub fn discovery_document(&self) -> serde_json::Value {
        serde_json::json!({
            "issuer": self.issuer,
            "jwks_uri": format!("{}/jwks", self.issuer.trim_end_matches('/')),
        })
    }

    pub fn jwks(&self) -> serde_json::Value {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;

        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let x = URL_SAFE_NO_PAD.encode(point.x().expect("uncompressed point has x"));
        let y = URL_SAFE_NO_PAD.encode(point.y().expect("uncompressed point has y"));
        serde_json::json!({
            "keys": [{
                "kty": "EC",
                "crv": "P-256",
                "alg": "ES256",
                "use": "sig",
                "kid": KID,
                "x": x,
                "y": y,
            }]
        })
    }
}
