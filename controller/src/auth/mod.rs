//! Authentication and authorization (§4.2-§4.3): an ECDSA P-256 [`Signer`] that both mints
//! internal bootstrap tokens and verifies them, an [`Authenticator`] union that also verifies
//! external OIDC-issued tokens, and a subject-matching [`is_authorized`] check.

pub mod authenticator;
pub mod authorizer;
pub mod signer;

pub use authenticator::{
    AuthenticateError, Authenticator, ClaimMapping, ExternalVerifier, UserInfo, VerifierConfig, VerifierOutcome,
};
pub use authorizer::is_authorized;
pub use signer::{Signer, SignerError};
