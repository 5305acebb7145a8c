//! Credential Codec
//!
//! Compact three-segment form: `b64url(header) . b64url(payload) . b64url(sig)`,
//! where `sig` is the raw 64-byte `r || s` ES256 signature over the first two
//! segments. Decoding never checks the signature, so the header and claims can
//! be inspected to pick a key first.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::Signature;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::jwk::{KeyPair, PublicKey, ALG_ES256};
use crate::types::AgentPinError;

pub const CREDENTIAL_TYP: &str = "agentpin-credential+jwt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    pub kid: String,
}

impl CredentialHeader {
    pub fn es256(kid: &str) -> Self {
        Self {
            alg: ALG_ES256.to_string(),
            typ: Some(CREDENTIAL_TYP.to_string()),
            kid: kid.to_string(),
        }
    }
}

/// Credential payload. Unrecognised members are kept in `extensions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialClaims {
    /// Issuer domain
    pub iss: String,
    /// Agent identifier
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl CredentialClaims {
    /// Identity used for revocation: `jti`, or `iss:sub:iat` without one.
    pub fn credential_id(&self) -> String {
        match &self.jti {
            Some(jti) => jti.clone(),
            None => format!("{}:{}:{}", self.iss, self.sub, self.iat),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Entries of `required` not granted by this credential
    pub fn missing_capabilities(&self, required: &[String]) -> Vec<String> {
        let mut seen = BTreeSet::new();
        required
            .iter()
            .filter(|r| !self.has_capability(r) && seen.insert(r.as_str()))
            .cloned()
            .collect()
    }

    fn validate(&self) -> Result<(), AgentPinError> {
        if self.iss.trim().is_empty() {
            return Err(malformed("iss is empty"));
        }
        if self.sub.trim().is_empty() {
            return Err(malformed("sub is empty"));
        }
        if self.exp < self.iat {
            return Err(malformed("exp precedes iat"));
        }
        Ok(())
    }
}

/// A decoded but unverified credential
#[derive(Debug, Clone)]
pub struct DecodedCredential {
    pub header: CredentialHeader,
    pub claims: CredentialClaims,
    pub signature: Vec<u8>,
    /// The exact bytes the signature covers
    pub signing_input: String,
}

pub fn encode(
    header: &CredentialHeader,
    claims: &CredentialClaims,
    key: &KeyPair,
) -> Result<String, AgentPinError> {
    let header_json = serde_json::to_vec(header).map_err(|e| malformed(&e.to_string()))?;
    let claims_json = serde_json::to_vec(claims).map_err(|e| malformed(&e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        B64URL.encode(header_json),
        B64URL.encode(claims_json)
    );
    let signature: Signature = key.signing_key().sign(signing_input.as_bytes());

    Ok(format!(
        "{}.{}",
        signing_input,
        B64URL.encode(signature.to_bytes())
    ))
}

pub fn decode(credential: &str) -> Result<DecodedCredential, AgentPinError> {
    let segments: Vec<&str> = credential.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(malformed(&format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let header: CredentialHeader = decode_json_segment(segments[0], "header")?;
    let claims: CredentialClaims = decode_json_segment(segments[1], "payload")?;
    let signature = B64URL
        .decode(segments[2])
        .map_err(|e| malformed(&format!("signature is not base64url: {}", e)))?;

    claims.validate()?;

    Ok(DecodedCredential {
        header,
        claims,
        signature,
        signing_input: format!("{}.{}", segments[0], segments[1]),
    })
}

/// Check the ES256 signature of a decoded credential against `public_key`.
pub fn verify_signature(
    decoded: &DecodedCredential,
    public_key: &PublicKey,
) -> Result<(), AgentPinError> {
    let signature =
        Signature::from_slice(&decoded.signature).map_err(|_| AgentPinError::SignatureInvalid)?;
    public_key
        .verify(decoded.signing_input.as_bytes(), &signature)
        .map_err(|_| AgentPinError::SignatureInvalid)
}

fn decode_json_segment<T: DeserializeOwned>(segment: &str, name: &str) -> Result<T, AgentPinError> {
    let bytes = B64URL
        .decode(segment)
        .map_err(|e| malformed(&format!("{} is not base64url: {}", name, e)))?;
    serde_json::from_slice(&bytes).map_err(|e| malformed(&format!("{} JSON invalid: {}", name, e)))
}

fn malformed(reason: &str) -> AgentPinError {
    AgentPinError::MalformedCredential {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwk::generate_key_pair;

    fn sample_claims() -> CredentialClaims {
        CredentialClaims {
            iss: "a.example".to_string(),
            sub: "agent-1".to_string(),
            aud: None,
            capabilities: vec!["read".to_string()],
            iat: 1_700_000_000,
            exp: 1_700_003_600,
            nbf: None,
            jti: Some("cred-1".to_string()),
            extensions: BTreeMap::new(),
        }
    }

    #[test]
    fn test_encode_decode_verify() {
        let pair = generate_key_pair().unwrap();
        let token = encode(&CredentialHeader::es256("k1"), &sample_claims(), &pair).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let decoded = decode(&token).unwrap();
        assert_eq!(decoded.header.kid, "k1");
        assert_eq!(decoded.claims, sample_claims());
        assert_eq!(decoded.signature.len(), 64);
        verify_signature(&decoded, pair.public_key()).unwrap();
    }

    #[test]
    fn test_wrong_key_fails_signature() {
        let pair = generate_key_pair().unwrap();
        let other = generate_key_pair().unwrap();
        let token = encode(&CredentialHeader::es256("k1"), &sample_claims(), &pair).unwrap();
        let decoded = decode(&token).unwrap();
        assert_eq!(
            verify_signature(&decoded, other.public_key()),
            Err(AgentPinError::SignatureInvalid)
        );
    }

    #[test]
    fn test_truncated_signature_is_invalid_not_malformed() {
        let pair = generate_key_pair().unwrap();
        let token = encode(&CredentialHeader::es256("k1"), &sample_claims(), &pair).unwrap();
        let (head, _) = token.rsplit_once('.').unwrap();
        let decoded = decode(&format!("{}.{}", head, B64URL.encode([7u8; 10]))).unwrap();
        assert_eq!(
            verify_signature(&decoded, pair.public_key()),
            Err(AgentPinError::SignatureInvalid)
        );
    }

    #[test]
    fn test_decode_segment_count() {
        for bad in ["", "a.b", "a.b.c.d"] {
            assert!(matches!(
                decode(bad),
                Err(AgentPinError::MalformedCredential { .. })
            ));
        }
    }

    #[test]
    fn test_decode_rejects_bad_json() {
        let header = B64URL.encode(br#"{"alg":"ES256","kid":"k1"}"#);
        let payload = B64URL.encode(b"not json");
        let token = format!("{}.{}.{}", header, payload, B64URL.encode([0u8; 64]));
        assert!(matches!(
            decode(&token),
            Err(AgentPinError::MalformedCredential { .. })
        ));
    }

    #[test]
    fn test_decode_requires_exp() {
        let header = B64URL.encode(br#"{"alg":"ES256","kid":"k1"}"#);
        let payload = B64URL.encode(br#"{"iss":"a.example","sub":"agent","iat":1}"#);
        let token = format!("{}.{}.{}", header, payload, B64URL.encode([0u8; 64]));
        assert!(matches!(
            decode(&token),
            Err(AgentPinError::MalformedCredential { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_exp_before_iat() {
        let pair = generate_key_pair().unwrap();
        let mut claims = sample_claims();
        claims.exp = claims.iat - 1;
        let token = encode(&CredentialHeader::es256("k1"), &claims, &pair).unwrap();
        assert!(matches!(
            decode(&token),
            Err(AgentPinError::MalformedCredential { .. })
        ));
    }

    #[test]
    fn test_extensions_survive_roundtrip() {
        let pair = generate_key_pair().unwrap();
        let mut claims = sample_claims();
        claims
            .extensions
            .insert("constraints".to_string(), serde_json::json!({"max_calls": 5}));
        let token = encode(&CredentialHeader::es256("k1"), &claims, &pair).unwrap();
        let decoded = decode(&token).unwrap();
        assert_eq!(decoded.claims.extensions["constraints"]["max_calls"], 5);
    }

    #[test]
    fn test_credential_id_fallback() {
        let mut claims = sample_claims();
        assert_eq!(claims.credential_id(), "cred-1");
        claims.jti = None;
        assert_eq!(claims.credential_id(), "a.example:agent-1:1700000000");
    }

    #[test]
    fn test_missing_capabilities() {
        let claims = sample_claims();
        let required = vec!["read".to_string(), "write".to_string()];
        assert_eq!(claims.missing_capabilities(&required), vec!["write"]);
    }

    #[test]
    fn test_missing_capabilities_reported_once() {
        let claims = sample_claims();
        let required: Vec<String> = ["write", "read", "admin", "write"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(
            claims.missing_capabilities(&required),
            vec!["write", "admin"]
        );
    }
}
