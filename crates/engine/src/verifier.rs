//! AgentPin Verifier
//!
//! Runs the fixed verification protocol. The three entry points differ only in
//! how trust evidence is acquired; decoding, key selection, pinning, signature,
//! issuer, time, revocation and capability checks are shared.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::bundle::TrustBundle;
use crate::config::VerifierConfig;
use crate::credential::{self, CredentialClaims, DecodedCredential};
use crate::discovery::{DiscoveryDocument, RevocationState, RevocationStatus};
use crate::jwk::{from_jwk, ALG_ES256};
use crate::key_store::{KeyPinStore, PinOutcome};
use crate::resolver::{EvidenceResolver, HttpEvidenceFetcher, TrustEvidence};
use crate::types::{
    AgentPinError, EvidenceSource, UnknownRevocationPolicy, VerificationResult,
};

/// Trait for verifying AgentPin credentials
#[async_trait]
pub trait AgentPinVerifier: Send + Sync {
    /// Verify a compact credential, optionally requiring capabilities
    async fn verify_credential(
        &self,
        jwt: &str,
        required_capabilities: Option<&[String]>,
    ) -> VerificationResult;
}

/// The verification engine. Construct once and share; it owns the pin store
/// and resolver it was built with.
///
/// New pins live in memory until the owner calls `pin_store().flush()`;
/// verification itself never touches the filesystem.
pub struct CredentialVerifier {
    config: VerifierConfig,
    pins: Arc<KeyPinStore>,
    resolver: EvidenceResolver,
}

impl CredentialVerifier {
    pub fn new(config: VerifierConfig, pins: Arc<KeyPinStore>, resolver: EvidenceResolver) -> Self {
        Self {
            config,
            pins,
            resolver,
        }
    }

    /// Verifier with the configured pin store and an HTTPS fetcher
    pub fn from_config(config: VerifierConfig) -> Result<Self, AgentPinError> {
        config.validate()?;
        let pins = Arc::new(open_pin_store(&config)?);
        let fetcher = Arc::new(HttpEvidenceFetcher::new(config.fetch_timeout())?);
        let resolver = EvidenceResolver::new(fetcher, &config);
        Ok(Self::new(config, pins, resolver))
    }

    /// Verifier without network access: offline and bundle modes only
    pub fn offline(config: VerifierConfig) -> Result<Self, AgentPinError> {
        config.validate()?;
        let pins = Arc::new(open_pin_store(&config)?);
        let resolver = EvidenceResolver::offline_only(&config);
        Ok(Self::new(config, pins, resolver))
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn pin_store(&self) -> &Arc<KeyPinStore> {
        &self.pins
    }

    pub fn resolver(&self) -> &EvidenceResolver {
        &self.resolver
    }

    /// Network mode with the configured fetch timeout as deadline
    pub async fn verify_credential(
        &self,
        jwt: &str,
        required_capabilities: Option<&[String]>,
    ) -> VerificationResult {
        self.verify_credential_with_deadline(jwt, required_capabilities, self.resolver.fetch_timeout())
            .await
    }

    /// Network mode bounded by a caller-supplied deadline
    pub async fn verify_credential_with_deadline(
        &self,
        jwt: &str,
        required_capabilities: Option<&[String]>,
        deadline: Duration,
    ) -> VerificationResult {
        let mut warnings = Vec::new();
        let outcome = match decode_checked(jwt) {
            Ok(decoded) => match self
                .resolver
                .resolve_network(&decoded.claims.iss, deadline)
                .await
            {
                Ok(evidence) => {
                    self.evaluate(&decoded, evidence, required_capabilities, &mut warnings)
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.finish(outcome, EvidenceSource::Network, warnings)
    }

    /// Pre-fetched mode: caller supplies the documents, no network I/O
    pub fn verify_credential_offline(
        &self,
        jwt: &str,
        discovery: &DiscoveryDocument,
        revocation: Option<&RevocationState>,
        required_capabilities: Option<&[String]>,
    ) -> VerificationResult {
        let mut warnings = Vec::new();
        let outcome = decode_checked(jwt).and_then(|decoded| {
            let evidence =
                self.resolver
                    .resolve_prefetched(&decoded.claims.iss, discovery, revocation)?;
            self.evaluate(&decoded, evidence, required_capabilities, &mut warnings)
        });
        self.finish(outcome, EvidenceSource::Offline, warnings)
    }

    /// Bundle mode: evidence comes from a loaded trust bundle, no network I/O
    pub fn verify_credential_with_bundle(
        &self,
        jwt: &str,
        bundle: &TrustBundle,
        required_capabilities: Option<&[String]>,
    ) -> VerificationResult {
        let mut warnings = Vec::new();
        let outcome = decode_checked(jwt).and_then(|decoded| {
            let evidence = self.resolver.resolve_bundle(&decoded.claims.iss, bundle)?;
            self.evaluate(&decoded, evidence, required_capabilities, &mut warnings)
        });
        self.finish(outcome, EvidenceSource::Bundle, warnings)
    }

    /// Steps after evidence resolution, in protocol order. Warnings gathered
    /// along the way are kept on rejection too.
    fn evaluate(
        &self,
        decoded: &DecodedCredential,
        evidence: TrustEvidence,
        required_capabilities: Option<&[String]>,
        warnings: &mut Vec<String>,
    ) -> Result<CredentialClaims, AgentPinError> {
        let claims = &decoded.claims;
        let kid = &decoded.header.kid;
        warnings.extend(evidence.warnings);

        let jwk = evidence
            .discovery
            .find_key(kid)
            .ok_or_else(|| AgentPinError::UnknownKeyId {
                issuer: claims.iss.clone(),
                kid: kid.clone(),
            })?;

        // A document can only pin keys for the issuer it declares itself.
        let issuer = &evidence.discovery.issuer;
        if self.pins.record_or_check(issuer, kid, jwk)? == PinOutcome::Pinned {
            tracing::debug!("First use of {} kid {}; pin held until flush", issuer, kid);
        }

        let public_key = from_jwk(jwk)?;
        credential::verify_signature(decoded, &public_key)?;

        if claims.iss != evidence.discovery.issuer {
            return Err(AgentPinError::IssuerMismatch {
                claimed: claims.iss.clone(),
                declared: evidence.discovery.issuer.clone(),
            });
        }

        self.check_time(claims)?;
        self.check_audience(claims)?;
        self.check_revocation(decoded, &evidence.revocation, warnings)?;

        if let Some(required) = required_capabilities {
            let missing = claims.missing_capabilities(required);
            if !missing.is_empty() {
                return Err(AgentPinError::InsufficientCapabilities { missing });
            }
        }

        Ok(claims.clone())
    }

    fn check_time(&self, claims: &CredentialClaims) -> Result<(), AgentPinError> {
        let now = Utc::now().timestamp();
        let skew = self.config.clock_skew_secs;

        if now > claims.exp.saturating_add(skew) {
            return Err(AgentPinError::Expired { exp: claims.exp });
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now.saturating_add(skew) {
                return Err(AgentPinError::NotYetValid { not_before: nbf });
            }
        }
        if claims.iat > now.saturating_add(skew) {
            return Err(AgentPinError::NotYetValid {
                not_before: claims.iat,
            });
        }
        if let Some(max_secs) = self.config.max_credential_lifetime_secs {
            let lifetime_secs = claims.exp.saturating_sub(claims.iat);
            if lifetime_secs > max_secs {
                return Err(AgentPinError::LifetimeTooLong {
                    lifetime_secs,
                    max_secs,
                });
            }
        }
        Ok(())
    }

    fn check_audience(&self, claims: &CredentialClaims) -> Result<(), AgentPinError> {
        match &self.config.audience {
            Some(expected) if claims.aud.as_deref() != Some(expected.as_str()) => {
                Err(AgentPinError::AudienceMismatch {
                    expected: expected.clone(),
                    found: claims.aud.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn check_revocation(
        &self,
        decoded: &DecodedCredential,
        revocation: &RevocationStatus,
        warnings: &mut Vec<String>,
    ) -> Result<(), AgentPinError> {
        let claims = &decoded.claims;
        match revocation {
            RevocationStatus::Known(state) => {
                if state.revoked_kids.contains(&decoded.header.kid) {
                    return Err(AgentPinError::Revoked {
                        reason: format!("signing key {} revoked", decoded.header.kid),
                    });
                }
                let credential_id = claims.credential_id();
                if state.revoked_credential_ids.contains(&credential_id) {
                    return Err(AgentPinError::Revoked {
                        reason: format!("credential {} revoked", credential_id),
                    });
                }
                if state.revoked_agent_ids.contains(&claims.sub) {
                    return Err(AgentPinError::Revoked {
                        reason: format!("agent {} revoked", claims.sub),
                    });
                }
                Ok(())
            }
            RevocationStatus::Unknown { reason } => {
                let capability_bearing = !claims.capabilities.is_empty();
                if capability_bearing
                    && self.config.unknown_revocation == UnknownRevocationPolicy::Reject
                {
                    return Err(AgentPinError::RevocationUnknown {
                        reason: reason.clone(),
                    });
                }
                warnings.push(format!("revocation status unknown: {}", reason));
                Ok(())
            }
        }
    }

    fn finish(
        &self,
        outcome: Result<CredentialClaims, AgentPinError>,
        source: EvidenceSource,
        warnings: Vec<String>,
    ) -> VerificationResult {
        match outcome {
            Ok(claims) => {
                tracing::debug!(
                    "Verified credential for agent {} from {} via {:?}",
                    claims.sub,
                    claims.iss,
                    source
                );
                VerificationResult::verified(claims, source, warnings)
            }
            Err(error) => {
                if error.is_security_critical() {
                    tracing::warn!("Credential rejected ({:?}): {}", error.kind(), error);
                } else {
                    tracing::debug!("Credential rejected ({:?}): {}", error.kind(), error);
                }
                VerificationResult::rejected(error, source, warnings)
            }
        }
    }
}

#[async_trait]
impl AgentPinVerifier for CredentialVerifier {
    async fn verify_credential(
        &self,
        jwt: &str,
        required_capabilities: Option<&[String]>,
    ) -> VerificationResult {
        CredentialVerifier::verify_credential(self, jwt, required_capabilities).await
    }
}

/// Steps 1 and 2: structure, then algorithm, before any key is looked up.
fn decode_checked(jwt: &str) -> Result<DecodedCredential, AgentPinError> {
    let decoded = credential::decode(jwt)?;
    if decoded.header.alg != ALG_ES256 {
        return Err(AgentPinError::UnsupportedAlgorithm {
            alg: decoded.header.alg,
        });
    }
    Ok(decoded)
}

fn open_pin_store(config: &VerifierConfig) -> Result<KeyPinStore, AgentPinError> {
    match &config.key_store_path {
        Some(path) => KeyPinStore::open(path),
        None => Ok(KeyPinStore::in_memory()),
    }
}

/// Mock verifier for testing
pub struct MockAgentPinVerifier {
    should_succeed: bool,
    mock_agent_id: String,
    mock_issuer: String,
    mock_capabilities: Vec<String>,
}

impl MockAgentPinVerifier {
    /// Create a mock verifier that always succeeds
    pub fn new_success() -> Self {
        Self {
            should_succeed: true,
            mock_agent_id: "mock-agent-001".to_string(),
            mock_issuer: "mock.example.com".to_string(),
            mock_capabilities: vec!["execute:*".to_string()],
        }
    }

    /// Create a mock verifier that always fails
    pub fn new_failure() -> Self {
        Self {
            should_succeed: false,
            mock_agent_id: String::new(),
            mock_issuer: String::new(),
            mock_capabilities: vec![],
        }
    }

    /// Create a mock with custom identity
    pub fn with_identity(agent_id: String, issuer: String, capabilities: Vec<String>) -> Self {
        Self {
            should_succeed: true,
            mock_agent_id: agent_id,
            mock_issuer: issuer,
            mock_capabilities: capabilities,
        }
    }
}

#[async_trait]
impl AgentPinVerifier for MockAgentPinVerifier {
    async fn verify_credential(
        &self,
        _jwt: &str,
        required_capabilities: Option<&[String]>,
    ) -> VerificationResult {
        if !self.should_succeed {
            return VerificationResult::rejected(
                AgentPinError::SignatureInvalid,
                EvidenceSource::Offline,
                vec![],
            );
        }

        let now = Utc::now().timestamp();
        let claims = CredentialClaims {
            iss: self.mock_issuer.clone(),
            sub: self.mock_agent_id.clone(),
            aud: None,
            capabilities: self.mock_capabilities.clone(),
            iat: now,
            exp: now + 300,
            nbf: None,
            jti: None,
            extensions: Default::default(),
        };

        if let Some(required) = required_capabilities {
            let missing = claims.missing_capabilities(required);
            if !missing.is_empty() {
                return VerificationResult::rejected(
                    AgentPinError::InsufficientCapabilities { missing },
                    EvidenceSource::Offline,
                    vec![],
                );
            }
        }

        VerificationResult::verified(claims, EvidenceSource::Offline, vec![])
    }
}
