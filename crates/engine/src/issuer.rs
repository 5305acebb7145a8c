//! Issuance Service
//!
//! Builds and signs short-lived credentials. There is no default TTL; every
//! caller states one.

use chrono::Utc;
use std::collections::BTreeMap;

use crate::credential::{self, CredentialClaims, CredentialHeader};
use crate::jwk::KeyPair;
use crate::types::AgentPinError;

const RESERVED_CLAIMS: [&str; 8] = ["iss", "sub", "aud", "capabilities", "iat", "exp", "nbf", "jti"];

/// Everything needed to issue a credential beyond the signing key
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    pub kid: String,
    pub issuer: String,
    pub agent_id: String,
    pub capabilities: Vec<String>,
    pub ttl_secs: i64,
    pub audience: Option<String>,
    /// Seconds after issuance before the credential becomes valid
    pub not_before_offset_secs: Option<i64>,
    /// Explicit `jti`; a random UUID is used otherwise
    pub credential_id: Option<String>,
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl CredentialRequest {
    pub fn new(
        kid: &str,
        issuer: &str,
        agent_id: &str,
        capabilities: Vec<String>,
        ttl_secs: i64,
    ) -> Self {
        Self {
            kid: kid.to_string(),
            issuer: issuer.to_string(),
            agent_id: agent_id.to_string(),
            capabilities,
            ttl_secs,
            audience: None,
            not_before_offset_secs: None,
            credential_id: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.audience = Some(audience.to_string());
        self
    }

    pub fn with_credential_id(mut self, credential_id: &str) -> Self {
        self.credential_id = Some(credential_id.to_string());
        self
    }

    pub fn with_not_before_offset(mut self, offset_secs: i64) -> Self {
        self.not_before_offset_secs = Some(offset_secs);
        self
    }

    pub fn with_extension(mut self, name: &str, value: serde_json::Value) -> Self {
        self.extensions.insert(name.to_string(), value);
        self
    }
}

pub fn issue_credential(
    key: &KeyPair,
    kid: &str,
    issuer: &str,
    agent_id: &str,
    capabilities: Vec<String>,
    ttl_secs: i64,
) -> Result<String, AgentPinError> {
    issue_credential_with(
        key,
        CredentialRequest::new(kid, issuer, agent_id, capabilities, ttl_secs),
    )
}

pub fn issue_credential_with(
    key: &KeyPair,
    request: CredentialRequest,
) -> Result<String, AgentPinError> {
    if request.ttl_secs <= 0 {
        return Err(AgentPinError::InvalidTtl {
            ttl_secs: request.ttl_secs,
        });
    }

    if let Some(name) = request
        .extensions
        .keys()
        .find(|name| RESERVED_CLAIMS.contains(&name.as_str()))
    {
        return Err(AgentPinError::MalformedCredential {
            reason: format!("extension claim '{}' shadows a registered claim", name),
        });
    }

    let iat = Utc::now().timestamp();
    let exp = iat
        .checked_add(request.ttl_secs)
        .ok_or(AgentPinError::InvalidTtl {
            ttl_secs: request.ttl_secs,
        })?;

    let nbf = match request.not_before_offset_secs {
        Some(offset) => Some(iat.checked_add(offset).ok_or_else(|| {
            AgentPinError::MalformedCredential {
                reason: format!("not-before offset {}s is out of range", offset),
            }
        })?),
        None => None,
    };

    let mut capabilities = request.capabilities;
    capabilities.sort();
    capabilities.dedup();

    let claims = CredentialClaims {
        iss: request.issuer,
        sub: request.agent_id,
        aud: request.audience,
        capabilities,
        iat,
        exp,
        nbf,
        jti: Some(
            request
                .credential_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        ),
        extensions: request.extensions,
    };

    tracing::debug!(
        "Issuing credential {} for agent {} from {} (ttl {}s)",
        claims.credential_id(),
        claims.sub,
        claims.iss,
        request.ttl_secs
    );

    credential::encode(&CredentialHeader::es256(&request.kid), &claims, key)
}
