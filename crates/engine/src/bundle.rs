//! Trust bundles: offline snapshots of discovery and revocation documents
//!
//! A bundle is exported once (see
//! [`EvidenceResolver::export_bundle`](crate::resolver::EvidenceResolver::export_bundle)),
//! saved by the caller, and loaded back for zero-network verification. Its
//! revocation snapshots age with the bundle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::discovery::{validate_discovery_document, DiscoveryDocument, RevocationState};
use crate::types::AgentPinError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustBundleEntry {
    pub discovery: DiscoveryDocument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_snapshot: Option<RevocationState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustBundle {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: BTreeMap<String, TrustBundleEntry>,
}

impl Default for TrustBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustBundle {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    /// Add or replace the entry for `discovery.issuer`.
    pub fn insert(
        &mut self,
        discovery: DiscoveryDocument,
        revocation_snapshot: Option<RevocationState>,
    ) -> Result<(), AgentPinError> {
        validate_discovery_document(&discovery).map_err(|reason| AgentPinError::BundleError {
            reason: format!("{}: {}", discovery.issuer, reason),
        })?;
        self.entries.insert(
            discovery.issuer.clone(),
            TrustBundleEntry {
                discovery,
                revocation_snapshot,
            },
        );
        Ok(())
    }

    pub fn get(&self, issuer: &str) -> Option<&TrustBundleEntry> {
        self.entries.get(issuer)
    }

    pub fn issuers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    pub fn from_json(json: &str) -> Result<Self, AgentPinError> {
        let bundle: Self = serde_json::from_str(json).map_err(|e| AgentPinError::BundleError {
            reason: format!("Failed to parse trust bundle: {}", e),
        })?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn to_json(&self) -> Result<String, AgentPinError> {
        serde_json::to_string_pretty(self).map_err(|e| AgentPinError::BundleError {
            reason: format!("Failed to serialize trust bundle: {}", e),
        })
    }

    pub fn load(path: &Path) -> Result<Self, AgentPinError> {
        let file = File::open(path).map_err(|e| AgentPinError::IoError {
            reason: format!("Failed to open trust bundle {}: {}", path.display(), e),
        })?;
        let bundle: Self = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            AgentPinError::BundleError {
                reason: format!("Failed to parse trust bundle: {}", e),
            }
        })?;
        bundle.validate()?;

        tracing::debug!(
            "Loaded trust bundle {} with {} issuers",
            path.display(),
            bundle.len()
        );
        Ok(bundle)
    }

    pub fn save(&self, path: &Path) -> Result<(), AgentPinError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| AgentPinError::IoError {
                reason: format!("Failed to create bundle directory: {}", e),
            })?;
        }

        let file = File::create(path).map_err(|e| AgentPinError::IoError {
            reason: format!("Failed to create trust bundle {}: {}", path.display(), e),
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| AgentPinError::BundleError {
            reason: format!("Failed to serialize trust bundle: {}", e),
        })?;
        writer.flush().map_err(|e| AgentPinError::IoError {
            reason: format!("Failed to flush trust bundle: {}", e),
        })?;
        Ok(())
    }

    /// Every entry must be keyed by the issuer its document declares.
    fn validate(&self) -> Result<(), AgentPinError> {
        for (issuer, entry) in &self.entries {
            if issuer != &entry.discovery.issuer {
                return Err(AgentPinError::BundleError {
                    reason: format!(
                        "entry {} holds discovery document for {}",
                        issuer, entry.discovery.issuer
                    ),
                });
            }
            validate_discovery_document(&entry.discovery).map_err(|reason| {
                AgentPinError::BundleError {
                    reason: format!("{}: {}", issuer, reason),
                }
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::build_discovery_document;
    use crate::jwk::generate_key_pair;
    use tempfile::TempDir;

    fn sample_bundle() -> TrustBundle {
        let pair = generate_key_pair().unwrap();
        let doc =
            build_discovery_document("b.example", vec![pair.public_jwk("k1")], None, None).unwrap();
        let mut bundle = TrustBundle::new();
        bundle
            .insert(doc, Some(RevocationState::empty(Utc::now())))
            .unwrap();
        bundle
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bundle.json");
        let bundle = sample_bundle();

        bundle.save(&path).unwrap();
        let loaded = TrustBundle::load(&path).unwrap();
        assert_eq!(loaded, bundle);
        assert_eq!(loaded.issuers().collect::<Vec<_>>(), vec!["b.example"]);
    }

    #[test]
    fn test_persisted_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&sample_bundle().to_json().unwrap()).unwrap();
        assert!(json["created_at"].is_string());
        assert!(json["entries"]["b.example"]["discovery"]["keys"].is_array());
        assert!(json["entries"]["b.example"]["revocation_snapshot"]["as_of"].is_string());
    }

    #[test]
    fn test_rejects_mismatched_entry_key() {
        let bundle = sample_bundle();
        let json = bundle.to_json().unwrap().replace(
            "\"b.example\": {",
            "\"other.example\": {",
        );
        assert!(matches!(
            TrustBundle::from_json(&json),
            Err(AgentPinError::BundleError { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            TrustBundle::load(&temp_dir.path().join("missing.json")),
            Err(AgentPinError::IoError { .. })
        ));
    }
}
