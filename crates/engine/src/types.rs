//! AgentPin Types
//!
//! Error, outcome, and result types shared by every verification mode.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credential::CredentialClaims;

/// Errors from AgentPin operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentPinError {
    #[error("Malformed credential: {reason}")]
    MalformedCredential { reason: String },

    #[error("Unsupported algorithm: {alg}")]
    UnsupportedAlgorithm { alg: String },

    #[error("Unknown issuer: {issuer}")]
    UnknownIssuer { issuer: String },

    #[error("Discovery document unavailable for {issuer}: {reason}")]
    DiscoveryUnavailable { issuer: String, reason: String },

    #[error("Key id {kid} not published by {issuer}")]
    UnknownKeyId { issuer: String, kid: String },

    #[error("Key pin mismatch for {issuer} (kid {kid})")]
    PinMismatch { issuer: String, kid: String },

    #[error("Credential signature invalid")]
    SignatureInvalid,

    #[error("Issuer mismatch: credential names {claimed}, discovery document declares {declared}")]
    IssuerMismatch { claimed: String, declared: String },

    #[error("Credential expired at {exp}")]
    Expired { exp: i64 },

    #[error("Credential not valid before {not_before}")]
    NotYetValid { not_before: i64 },

    #[error("Credential revoked: {reason}")]
    Revoked { reason: String },

    #[error("Revocation status unknown: {reason}")]
    RevocationUnknown { reason: String },

    #[error("Insufficient capabilities, missing: {missing:?}")]
    InsufficientCapabilities { missing: Vec<String> },

    #[error("Audience mismatch: expected {expected}, found {found:?}")]
    AudienceMismatch {
        expected: String,
        found: Option<String>,
    },

    #[error("Credential lifetime of {lifetime_secs}s exceeds the {max_secs}s limit")]
    LifetimeTooLong { lifetime_secs: i64, max_secs: i64 },

    #[error("Invalid key material: {reason}")]
    InvalidKeyMaterial { reason: String },

    #[error("Invalid credential TTL: {ttl_secs}")]
    InvalidTtl { ttl_secs: i64 },

    #[error("Entropy source unavailable: {reason}")]
    EntropyError { reason: String },

    #[error("Key store error: {reason}")]
    KeyStoreError { reason: String },

    #[error("Trust bundle error: {reason}")]
    BundleError { reason: String },

    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("IO error: {reason}")]
    IoError { reason: String },
}

/// Payload-free discriminant of [`AgentPinError`], for callers that branch on
/// the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedCredential,
    UnsupportedAlgorithm,
    UnknownIssuer,
    DiscoveryUnavailable,
    UnknownKeyId,
    PinMismatch,
    SignatureInvalid,
    IssuerMismatch,
    Expired,
    NotYetValid,
    Revoked,
    RevocationUnknown,
    InsufficientCapabilities,
    AudienceMismatch,
    LifetimeTooLong,
    InvalidKeyMaterial,
    InvalidTtl,
    EntropyError,
    KeyStoreError,
    BundleError,
    ConfigError,
    IoError,
}

impl AgentPinError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedCredential { .. } => ErrorKind::MalformedCredential,
            Self::UnsupportedAlgorithm { .. } => ErrorKind::UnsupportedAlgorithm,
            Self::UnknownIssuer { .. } => ErrorKind::UnknownIssuer,
            Self::DiscoveryUnavailable { .. } => ErrorKind::DiscoveryUnavailable,
            Self::UnknownKeyId { .. } => ErrorKind::UnknownKeyId,
            Self::PinMismatch { .. } => ErrorKind::PinMismatch,
            Self::SignatureInvalid => ErrorKind::SignatureInvalid,
            Self::IssuerMismatch { .. } => ErrorKind::IssuerMismatch,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::NotYetValid { .. } => ErrorKind::NotYetValid,
            Self::Revoked { .. } => ErrorKind::Revoked,
            Self::RevocationUnknown { .. } => ErrorKind::RevocationUnknown,
            Self::InsufficientCapabilities { .. } => ErrorKind::InsufficientCapabilities,
            Self::AudienceMismatch { .. } => ErrorKind::AudienceMismatch,
            Self::LifetimeTooLong { .. } => ErrorKind::LifetimeTooLong,
            Self::InvalidKeyMaterial { .. } => ErrorKind::InvalidKeyMaterial,
            Self::InvalidTtl { .. } => ErrorKind::InvalidTtl,
            Self::EntropyError { .. } => ErrorKind::EntropyError,
            Self::KeyStoreError { .. } => ErrorKind::KeyStoreError,
            Self::BundleError { .. } => ErrorKind::BundleError,
            Self::ConfigError { .. } => ErrorKind::ConfigError,
            Self::IoError { .. } => ErrorKind::IoError,
        }
    }

    /// Failures that point at key substitution or forgery. These must reach
    /// logs and callers under their own kind.
    pub fn is_security_critical(&self) -> bool {
        matches!(self, Self::PinMismatch { .. } | Self::SignatureInvalid)
    }
}

/// Where the trust evidence for a verification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSource {
    /// Live `.well-known` fetch
    Network,
    /// Caller-supplied discovery and revocation documents
    Offline,
    /// Pre-shared trust bundle
    Bundle,
}

/// What to do when revocation status cannot be established
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownRevocationPolicy {
    /// Reject capability-bearing credentials (default).
    #[default]
    Reject,
    /// Accept, attaching a warning to the result.
    Allow,
}

/// Verification verdict
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Verified,
    Rejected(AgentPinError),
}

/// Result of verifying an AgentPin credential
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub outcome: VerificationOutcome,
    /// Resolved claims, present only when verified
    pub claims: Option<CredentialClaims>,
    pub evidence_source: EvidenceSource,
    /// Non-fatal observations (stale bundle, unknown revocation allowed, ...)
    pub warnings: Vec<String>,
}

impl VerificationResult {
    /// Create a successful verification result
    pub fn verified(
        claims: CredentialClaims,
        evidence_source: EvidenceSource,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            outcome: VerificationOutcome::Verified,
            claims: Some(claims),
            evidence_source,
            warnings,
        }
    }

    /// Create a failed verification result
    pub fn rejected(
        error: AgentPinError,
        evidence_source: EvidenceSource,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            outcome: VerificationOutcome::Rejected(error),
            claims: None,
            evidence_source,
            warnings,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self.outcome, VerificationOutcome::Verified)
    }

    pub fn error(&self) -> Option<&AgentPinError> {
        match &self.outcome {
            VerificationOutcome::Verified => None,
            VerificationOutcome::Rejected(e) => Some(e),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(AgentPinError::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_critical_kinds() {
        assert!(AgentPinError::SignatureInvalid.is_security_critical());
        assert!(AgentPinError::PinMismatch {
            issuer: "a.example".to_string(),
            kid: "k1".to_string(),
        }
        .is_security_critical());
        assert!(!AgentPinError::Expired { exp: 0 }.is_security_critical());
    }

    #[test]
    fn test_rejected_result_has_no_claims() {
        let result = VerificationResult::rejected(
            AgentPinError::SignatureInvalid,
            EvidenceSource::Bundle,
            vec![],
        );
        assert!(!result.is_verified());
        assert!(result.claims.is_none());
        assert_eq!(result.error_kind(), Some(ErrorKind::SignatureInvalid));
    }

    #[test]
    fn test_evidence_source_serde() {
        assert_eq!(
            serde_json::to_string(&EvidenceSource::Network).unwrap(),
            "\"network\""
        );
        assert_eq!(
            serde_json::to_string(&EvidenceSource::Offline).unwrap(),
            "\"offline\""
        );
        assert_eq!(
            serde_json::to_string(&EvidenceSource::Bundle).unwrap(),
            "\"bundle\""
        );
    }

    #[test]
    fn test_agentpin_error_display() {
        let err = AgentPinError::PinMismatch {
            issuer: "evil.com".to_string(),
            kid: "k1".to_string(),
        };
        assert!(err.to_string().contains("evil.com"));

        let err = AgentPinError::InsufficientCapabilities {
            missing: vec!["write".to_string()],
        };
        assert!(err.to_string().contains("write"));
    }
}
