//! TOFU Key Pin Store for AgentPin
//!
//! Maps `(issuer, kid)` to the key material first observed for it. A later
//! observation with different material is a hard `PinMismatch`; only an
//! explicit [`KeyPinStore::repin`] replaces a record.
//!
//! Records live in a sharded concurrent map, so first-use pinning of distinct
//! keys never contends on a global lock and racing pins of the same key resolve
//! through the entry API (first committed insert wins). File-backed stores
//! persist to JSON with 0o600 permissions on [`KeyPinStore::flush`].

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::jwk::Jwk;
use crate::types::AgentPinError;

/// Key material as pinned: the curve point only, never the kid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedKey {
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl From<&Jwk> for PinnedKey {
    fn from(jwk: &Jwk) -> Self {
        Self {
            crv: jwk.crv.clone(),
            x: jwk.x.clone(),
            y: jwk.y.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPinRecord {
    pub issuer: String,
    pub kid: String,
    pub pinned_key: PinnedKey,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// What [`KeyPinStore::record_or_check`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    /// First sighting; a new record was created.
    Pinned,
    /// Matched the existing record.
    Matched,
}

type PinKey = (String, String);

#[derive(Debug, Default)]
pub struct KeyPinStore {
    pins: DashMap<PinKey, TrustPinRecord>,
    store_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl KeyPinStore {
    /// Store with no backing file; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading existing records. A missing file
    /// starts empty; parent directories are created.
    pub fn open(store_path: &Path) -> Result<Self, AgentPinError> {
        if let Some(parent) = store_path.parent() {
            fs::create_dir_all(parent).map_err(|e| AgentPinError::IoError {
                reason: format!("Failed to create key store directory: {}", e),
            })?;
        }

        let pins = DashMap::new();
        if store_path.exists() {
            let file = File::open(store_path).map_err(|e| AgentPinError::IoError {
                reason: format!("Failed to open key store: {}", e),
            })?;
            let records: Vec<TrustPinRecord> = serde_json::from_reader(BufReader::new(file))
                .map_err(|e| AgentPinError::KeyStoreError {
                    reason: format!("Failed to deserialize key store: {}", e),
                })?;
            for record in records {
                pins.insert((record.issuer.clone(), record.kid.clone()), record);
            }
        }

        tracing::debug!(
            "Opened AgentPin key store at {} ({} pins)",
            store_path.display(),
            pins.len()
        );

        Ok(Self {
            pins,
            store_path: Some(store_path.to_path_buf()),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn lookup(&self, issuer: &str, kid: &str) -> Option<TrustPinRecord> {
        self.pins
            .get(&(issuer.to_string(), kid.to_string()))
            .map(|r| r.value().clone())
    }

    /// TOFU check: pin on first sight, otherwise require identical key material.
    pub fn record_or_check(
        &self,
        issuer: &str,
        kid: &str,
        observed: &Jwk,
    ) -> Result<PinOutcome, AgentPinError> {
        let observed = PinnedKey::from(observed);
        let now = Utc::now();

        match self.pins.entry((issuer.to_string(), kid.to_string())) {
            Entry::Occupied(mut entry) => {
                if entry.get().pinned_key != observed {
                    tracing::warn!(
                        "Key pin mismatch for issuer {} kid {}: observed key differs from pinned key",
                        issuer,
                        kid
                    );
                    return Err(AgentPinError::PinMismatch {
                        issuer: issuer.to_string(),
                        kid: kid.to_string(),
                    });
                }
                entry.get_mut().last_seen = now;
                self.dirty.store(true, Ordering::Release);
                Ok(PinOutcome::Matched)
            }
            Entry::Vacant(entry) => {
                entry.insert(TrustPinRecord {
                    issuer: issuer.to_string(),
                    kid: kid.to_string(),
                    pinned_key: observed,
                    first_seen: now,
                    last_seen: now,
                });
                self.dirty.store(true, Ordering::Release);
                tracing::info!("Pinned new key for issuer {} kid {}", issuer, kid);
                Ok(PinOutcome::Pinned)
            }
        }
    }

    /// Operator override: replace whatever is pinned for `(issuer, kid)`.
    /// Returns the previous record, if any.
    pub fn repin(&self, issuer: &str, kid: &str, new_key: &Jwk) -> Option<TrustPinRecord> {
        let now = Utc::now();
        let key = (issuer.to_string(), kid.to_string());
        let first_seen = self.pins.get(&key).map(|r| r.first_seen).unwrap_or(now);

        let previous = self.pins.insert(
            key,
            TrustPinRecord {
                issuer: issuer.to_string(),
                kid: kid.to_string(),
                pinned_key: PinnedKey::from(new_key),
                first_seen,
                last_seen: now,
            },
        );
        self.dirty.store(true, Ordering::Release);

        match &previous {
            Some(old) => tracing::warn!(
                "Repinned issuer {} kid {}: x {} -> {}",
                issuer,
                kid,
                old.pinned_key.x,
                new_key.x
            ),
            None => tracing::warn!("Repinned issuer {} kid {} (no prior pin)", issuer, kid),
        }

        previous
    }

    pub fn remove(&self, issuer: &str, kid: &str) -> Option<TrustPinRecord> {
        let removed = self
            .pins
            .remove(&(issuer.to_string(), kid.to_string()))
            .map(|(_, record)| record);
        if removed.is_some() {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    /// All records, sorted by issuer then kid
    pub fn records(&self) -> Vec<TrustPinRecord> {
        let mut records: Vec<TrustPinRecord> =
            self.pins.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| (&a.issuer, &a.kid).cmp(&(&b.issuer, &b.kid)));
        records
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    /// Write records to the backing file if anything changed since the last
    /// flush.
    pub fn flush(&self) -> Result<(), AgentPinError> {
        let Some(store_path) = &self.store_path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.write_to(store_path);
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    fn write_to(&self, store_path: &Path) -> Result<(), AgentPinError> {
        if let Some(parent) = store_path.parent() {
            fs::create_dir_all(parent).map_err(|e| AgentPinError::IoError {
                reason: format!("Failed to create key store directory: {}", e),
            })?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(store_path)
            .map_err(|e| AgentPinError::IoError {
                reason: format!("Failed to open key store for writing: {}", e),
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(store_path, perms).map_err(|e| AgentPinError::IoError {
                reason: format!("Failed to set key store permissions: {}", e),
            })?;
        }

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.records()).map_err(|e| {
            AgentPinError::KeyStoreError {
                reason: format!("Failed to serialize key store: {}", e),
            }
        })?;

        writer.flush().map_err(|e| AgentPinError::IoError {
            reason: format!("Failed to flush key store: {}", e),
        })?;

        Ok(())
    }
}
