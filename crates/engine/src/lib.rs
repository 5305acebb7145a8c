//! AgentPin credential verification engine
//!
//! Issues and verifies short-lived, ES256-signed agent credentials anchored to
//! an issuer's published discovery document, with trust-on-first-use key
//! pinning, revocation checks and offline trust bundles.

pub mod bundle;
pub mod cache;
pub mod config;
pub mod credential;
pub mod discovery;
pub mod issuer;
pub mod jwk;
pub mod key_store;
pub mod resolver;
pub mod types;
pub mod verifier;

// Re-export main types and operations for convenience
pub use bundle::{TrustBundle, TrustBundleEntry};
pub use config::{DiscoveryMode, VerifierConfig};
pub use credential::{CredentialClaims, CredentialHeader};
pub use discovery::{
    build_discovery_document, validate_discovery_document, DiscoveryDocument, RevocationState,
    RevocationStatus,
};
pub use issuer::{issue_credential, issue_credential_with, CredentialRequest};
pub use jwk::{
    from_jwk, generate_key_id, generate_key_pair, jwk_to_pem, pem_to_jwk, public_key_from_pem,
    public_key_to_pem, to_jwk, Jwk, KeyPair, PrivateJwk, PublicKey,
};
pub use key_store::{KeyPinStore, PinOutcome, TrustPinRecord};
pub use resolver::{EvidenceFetcher, EvidenceResolver, HttpEvidenceFetcher, TrustEvidence};
pub use types::{
    AgentPinError, ErrorKind, EvidenceSource, UnknownRevocationPolicy, VerificationOutcome,
    VerificationResult,
};
pub use verifier::{AgentPinVerifier, CredentialVerifier, MockAgentPinVerifier};
