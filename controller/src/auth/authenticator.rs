//! JWT authenticator (§4.3): a union of verifiers — one per configured external issuer, plus
//! the internal [`Signer`] — with claim-mapping rules that translate a decoded token into a
//! [`UserInfo`].

use std::collections::BTreeMap;
use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::signer::Signer;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub groups: Vec<String>,
    pub uid: String,
    pub extra: BTreeMap<String, Vec<String>>,
}

/// Why a single verifier didn't produce a [`UserInfo`]. Kept distinct from a plain error so the
/// authenticator can apply the fail-on-error rule below: a definitive rejection from one
/// verifier plus an inability to evaluate at all from another must not add up to acceptance,
/// nor should it read as an ordinary "bad token" to the caller.
#[derive(Debug, Clone)]
pub enum VerifierOutcome {
    /// The token was evaluated and is not valid for this verifier (wrong issuer, bad
    /// signature, expired, audience mismatch).
    Rejected(String),
    /// The verifier could not evaluate the token at all (JWKS unreachable, malformed config).
    Error(String),
}

#[derive(Debug, Error)]
pub enum AuthenticateError {
    #[error("token rejected by all configured verifiers: {0}")]
    Unauthenticated(String),
    #[error("no verifier could evaluate the token: {0}")]
    VerifiersUnavailable(String),
}

fn default_username_claim() -> String {
    "sub".to_string()
}

/// Claim-mapping rule for one configured external issuer (§6.4).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClaimMapping {
    #[serde(default = "default_username_claim")]
    pub username_claim: String,
    pub groups_claim: Option<String>,
    pub uid_claim: Option<String>,
    #[serde(default)]
    pub extra_claims: Vec<String>,
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            username_claim: default_username_claim(),
            groups_claim: None,
            uid_claim: None,
            extra_claims: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VerifierConfig {
    pub issuer_url: String,
    pub audiences: Vec<String>,
    #[serde(default)]
    pub claim_mapping: ClaimMapping,
    #[serde(default)]
    pub username_prefix: String,
}

#[derive(Deserialize)]
struct OidcDiscoveryDoc {
    issuer: String,
    jwks_uri: String,
}

/// A resolved external verifier: the JWKS fetched once at startup from `issuer_url`'s OIDC
/// discovery document. Re-fetching on JWKS rotation isn't implemented; a controller restart
/// picks up a rotated key.
pub struct ExternalVerifier {
    issuer: String,
    audiences: Vec<String>,
    mapping: ClaimMapping,
    prefix: String,
    jwks: JwkSet,
}

impl ExternalVerifier {
    pub async fn discover(config: &VerifierConfig, http: &reqwest::Client) -> Result<Self, VerifierOutcome> {
        let discovery: OidcDiscoveryDoc = http
            .get(format!(
                "{}/.well-known/openid-configuration",
                config.issuer_url.trim_end_matches('/')
            ))
            .send()
            .await
            .map_err(|e| VerifierOutcome::Error(e.to_string()))?
            .json()
            .await
            .map_err(|e| VerifierOutcome::Error(e.to_string()))?;

        let jwks: JwkSet = http
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|e| VerifierOutcome::Error(e.to_string()))?
            .json()
            .await
            .map_err(|e| VerifierOutcome::Error(e.to_string()))?;

        Ok(Self {
            issuer: discovery.issuer,
            audiences: config.audiences.clone(),
            mapping: config.claim_mapping.clone(),
            prefix: config.username_prefix.clone(),
            jwks,
        })
    }

    fn verify(&self, token: &str) -> Result<UserInfo, VerifierOutcome> {
        let header = decode_header(token).map_err(|e| VerifierOutcome::Rejected(e.to_string()))?;
        let jwk = header
            .kid
            .as_deref()
            .and_then(|kid| self.jwks.find(kid))
            .or_else(|| self.jwks.keys.first())
            .ok_or_else(|| VerifierOutcome::Rejected("no matching key in jwks".to_string()))?;

        let decoding_key = DecodingKey::from_jwk(jwk).map_err(|e| VerifierOutcome::Error(e.to_string()))?;
        let mut validation = Validation::new(header.alg);
        validation.set_audience(&self.audiences);
        let data = decode::<serde_json::Value>(token, &decoding_key, &validation)
            .map_err(|e| VerifierOutcome::Rejected(e.to_string()))?;

        let claims = data.claims;
        let iss = claims.get("iss").and_then(|v| v.as_str()).unwrap_or_default();
        if iss != self.issuer {
            return Err(VerifierOutcome::Rejected("unexpected issuer".to_string()));
        }

        let username = claims
            .get(&self.mapping.username_claim)
            .and_then(|v| v.as_str())
            .ok_or_else(|| VerifierOutcome::Rejected(format!("missing claim {:?}", self.mapping.username_claim)))?;

        let groups = self
            .mapping
            .groups_claim
            .as_ref()
            .and_then(|claim| claims.get(claim))
            .and_then(|v| v.as_array())
            .map(|values| values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let uid = self
            .mapping
            .uid_claim
            .as_ref()
            .and_then(|claim| claims.get(claim))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut extra = BTreeMap::new();
        for claim in &self.mapping.extra_claims {
            if let Some(values) = claims.get(claim).and_then(|v| v.as_array()) {
                extra.insert(
                    claim.clone(),
                    values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
                );
            }
        }

        Ok(UserInfo {
            username: format!("{}{username}", self.prefix),
            groups,
            uid,
            extra,
        })
    }
}

/// Union of JWT verifiers: every configured external issuer, plus the internal [`Signer`].
pub struct Authenticator {
    signer: Arc<Signer>,
    externals: Vec<ExternalVerifier>,
}

impl Authenticator {
    pub fn new(signer: Arc<Signer>, externals: Vec<ExternalVerifier>) -> Self {
        Self { signer, externals }
    }

    /// Tries every verifier and returns the first success. If none succeed, distinguishes a
    /// clean rejection — at least one verifier definitively evaluated the token and said no —
    /// from every verifier erroring out before any of them could decide (§4.3 fail-on-error
    /// rule): the latter is a controller-side problem, not evidence the token is bad.
    pub fn authenticate(&self, token: &str) -> Result<UserInfo, AuthenticateError> {
        let mut outcomes = Vec::with_capacity(self.externals.len() + 1);

        for verifier in &self.externals {
            match verifier.verify(token) {
                Ok(user) => return Ok(user),
                Err(outcome) => outcomes.push(outcome),
            }
        }
        match self.signer.verify(token) {
            Ok(user) => return Ok(user),
            Err(outcome) => outcomes.push(outcome),
        }

        let any_rejected = outcomes.iter().any(|o| matches!(o, VerifierOutcome::Rejected(_)));
        let reason = outcomes
            .into_iter()
            .map(|o| match o {
                VerifierOutcome::Rejected(r) | VerifierOutcome::Error(r) => r,
            })
            .collect::<Vec<_>>()
            .join("; ");

        if any_rejected {
            Err(AuthenticateError::Unauthenticated(reason))
        } else {
            Err(AuthenticateError::VerifiersUnavailable(reason))
        }
    }
}
