//! Discovery and revocation documents
//!
//! An issuer publishes its signing keys at
//! `https://{issuer}/.well-known/agent-identity.json` and, optionally, a
//! revocation document at the referenced endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::jwk::{from_jwk, Jwk};
use crate::types::AgentPinError;

pub const WELL_KNOWN_PATH: &str = "/.well-known/agent-identity.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub keys: Vec<Jwk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl DiscoveryDocument {
    pub fn find_key(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationState {
    #[serde(default)]
    pub revoked_kids: BTreeSet<String>,
    #[serde(default)]
    pub revoked_credential_ids: BTreeSet<String>,
    #[serde(default)]
    pub revoked_agent_ids: BTreeSet<String>,
    pub as_of: DateTime<Utc>,
}

impl RevocationState {
    /// Nothing revoked, as of `as_of`
    pub fn empty(as_of: DateTime<Utc>) -> Self {
        Self {
            revoked_kids: BTreeSet::new(),
            revoked_credential_ids: BTreeSet::new(),
            revoked_agent_ids: BTreeSet::new(),
            as_of,
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.as_of).num_seconds()
    }
}

/// Revocation knowledge for one issuer. `Unknown` is never treated as
/// "not revoked".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationStatus {
    Known(RevocationState),
    Unknown { reason: String },
}

pub fn build_discovery_document(
    issuer: &str,
    keys: Vec<Jwk>,
    revocation_endpoint: Option<String>,
    ttl_secs: Option<u64>,
) -> Result<DiscoveryDocument, AgentPinError> {
    let doc = DiscoveryDocument {
        issuer: issuer.to_string(),
        keys,
        revocation_endpoint,
        issued_at: Some(Utc::now()),
        ttl_secs,
    };
    validate_discovery_document(&doc).map_err(|reason| AgentPinError::ConfigError { reason })?;
    Ok(doc)
}

/// Structural checks shared by every resolution mode. Returns the violation
/// as text; callers wrap it in the error kind of their mode.
pub fn validate_discovery_document(doc: &DiscoveryDocument) -> Result<(), String> {
    if doc.issuer.trim().is_empty() {
        return Err("issuer is empty".to_string());
    }

    let mut seen = HashSet::new();
    for key in &doc.keys {
        if key.kid.is_empty() {
            return Err("key with empty kid".to_string());
        }
        if !seen.insert(key.kid.as_str()) {
            return Err(format!("duplicate kid {}", key.kid));
        }
        from_jwk(key).map_err(|e| format!("key {}: {}", key.kid, e))?;
    }

    if let Some(endpoint) = &doc.revocation_endpoint {
        url::Url::parse(endpoint)
            .map_err(|e| format!("revocation_endpoint {} invalid: {}", endpoint, e))?;
    }

    Ok(())
}

/// Parse and validate a discovery document received as JSON.
pub fn parse_discovery_document(
    issuer: &str,
    body: serde_json::Value,
) -> Result<DiscoveryDocument, AgentPinError> {
    let doc: DiscoveryDocument =
        serde_json::from_value(body).map_err(|e| AgentPinError::DiscoveryUnavailable {
            issuer: issuer.to_string(),
            reason: format!("schema violation: {}", e),
        })?;
    validate_discovery_document(&doc).map_err(|reason| AgentPinError::DiscoveryUnavailable {
        issuer: issuer.to_string(),
        reason,
    })?;
    Ok(doc)
}

/// Parse a revocation document. A missing `as_of` takes the fetch time.
pub fn parse_revocation_document(
    mut body: serde_json::Value,
    fetched_at: DateTime<Utc>,
) -> Result<RevocationState, String> {
    if let serde_json::Value::Object(map) = &mut body {
        map.entry("as_of")
            .or_insert_with(|| serde_json::json!(fetched_at));
    }
    serde_json::from_value(body).map_err(|e| format!("invalid revocation document: {}", e))
}

/// Issuers name a host (optionally with port); anything that could steer the
/// discovery URL elsewhere is refused.
pub fn discovery_url(issuer: &str) -> Result<String, AgentPinError> {
    let unavailable = |reason: &str| AgentPinError::DiscoveryUnavailable {
        issuer: issuer.to_string(),
        reason: reason.to_string(),
    };

    if issuer.is_empty()
        || !issuer
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
    {
        return Err(unavailable("issuer is not a valid host name"));
    }

    let url = url::Url::parse(&format!("https://{}{}", issuer, WELL_KNOWN_PATH))
        .map_err(|e| unavailable(&e.to_string()))?;
    if url.host_str().is_none() {
        return Err(unavailable("issuer has no host"));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwk::generate_key_pair;

    #[test]
    fn test_build_and_find_key() {
        let pair = generate_key_pair().unwrap();
        let doc = build_discovery_document(
            "a.example",
            vec![pair.public_jwk("k1")],
            Some("https://a.example/revocations.json".to_string()),
            Some(3600),
        )
        .unwrap();
        assert!(doc.find_key("k1").is_some());
        assert!(doc.find_key("k2").is_none());
        assert!(doc.issued_at.is_some());
    }

    #[test]
    fn test_duplicate_kid_rejected() {
        let a = generate_key_pair().unwrap();
        let b = generate_key_pair().unwrap();
        let result = build_discovery_document(
            "a.example",
            vec![a.public_jwk("k1"), b.public_jwk("k1")],
            None,
            None,
        );
        assert!(matches!(result, Err(AgentPinError::ConfigError { .. })));
    }

    #[test]
    fn test_parse_rejects_schema_violation() {
        let body = serde_json::json!({"issuer": "a.example"});
        assert!(matches!(
            parse_discovery_document("a.example", body),
            Err(AgentPinError::DiscoveryUnavailable { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_invalid_key() {
        let body = serde_json::json!({
            "issuer": "a.example",
            "keys": [{"kty": "EC", "crv": "P-256", "x": "AA", "y": "AA", "kid": "k1"}]
        });
        assert!(matches!(
            parse_discovery_document("a.example", body),
            Err(AgentPinError::DiscoveryUnavailable { .. })
        ));
    }

    #[test]
    fn test_revocation_as_of_defaults_to_fetch_time() {
        let fetched_at = Utc::now();
        let state =
            parse_revocation_document(serde_json::json!({"revoked_kids": ["k1"]}), fetched_at)
                .unwrap();
        assert!(state.revoked_kids.contains("k1"));
        assert!(state.revoked_credential_ids.is_empty());
        assert_eq!(state.as_of.timestamp(), fetched_at.timestamp());
    }

    #[test]
    fn test_revocation_rejects_non_object() {
        assert!(parse_revocation_document(serde_json::json!([1, 2]), Utc::now()).is_err());
    }

    #[test]
    fn test_discovery_url() {
        assert_eq!(
            discovery_url("a.example").unwrap(),
            "https://a.example/.well-known/agent-identity.json"
        );
        assert!(discovery_url("a.example:8443").is_ok());
        for bad in ["", "evil.com/path", "user@evil.com", "a.example?x=1"] {
            assert!(discovery_url(bad).is_err(), "{} should be refused", bad);
        }
    }
}
