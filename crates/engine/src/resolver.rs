//! Discovery & Revocation Resolver
//!
//! Produces [`TrustEvidence`] for an issuer in one of three modes: network
//! fetch through an [`EvidenceFetcher`], caller-supplied documents, or a
//! [`TrustBundle`]. All three return the same shape so the verifier applies
//! identical checks regardless of where evidence came from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::bundle::TrustBundle;
use crate::cache::RevocationCache;
use crate::config::VerifierConfig;
use crate::discovery::{
    discovery_url, parse_discovery_document, parse_revocation_document,
    validate_discovery_document, DiscoveryDocument, RevocationState, RevocationStatus,
};
use crate::types::{AgentPinError, EvidenceSource};

/// A JSON document as handed back by the network collaborator
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub body: serde_json::Value,
    /// Effective timestamp of the response
    pub fetched_at: DateTime<Utc>,
}

#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("response is not JSON: {0}")]
    Decode(String),
}

/// Network collaborator. Implementations perform exactly one request per call
/// and never retry; retry policy belongs to the caller.
#[async_trait]
pub trait EvidenceFetcher: Send + Sync {
    /// `GET https://{issuer}/.well-known/agent-identity.json`
    async fn fetch_discovery(&self, issuer: &str) -> Result<FetchedDocument, FetchError>;

    /// `GET {endpoint}` for a revocation document
    async fn fetch_revocation(&self, endpoint: &str) -> Result<FetchedDocument, FetchError>;
}

/// Default collaborator over `reqwest`. Redirects are not followed, so a
/// discovery document is always served by the issuer host itself.
pub struct HttpEvidenceFetcher {
    client: reqwest::Client,
}

impl HttpEvidenceFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AgentPinError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("agentpin-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentPinError::ConfigError {
                reason: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    async fn get_json(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        Ok(FetchedDocument {
            body,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl EvidenceFetcher for HttpEvidenceFetcher {
    async fn fetch_discovery(&self, issuer: &str) -> Result<FetchedDocument, FetchError> {
        let url = discovery_url(issuer).map_err(|e| FetchError::InvalidTarget(e.to_string()))?;
        self.get_json(&url).await
    }

    async fn fetch_revocation(&self, endpoint: &str) -> Result<FetchedDocument, FetchError> {
        let url = url::Url::parse(endpoint).map_err(|e| FetchError::InvalidTarget(e.to_string()))?;
        if url.scheme() != "https" {
            return Err(FetchError::InvalidTarget(format!(
                "revocation endpoint must use https, got {}",
                url.scheme()
            )));
        }
        self.get_json(url.as_str()).await
    }
}

/// Discovery document plus revocation knowledge for one issuer
#[derive(Debug, Clone)]
pub struct TrustEvidence {
    pub discovery: DiscoveryDocument,
    pub revocation: RevocationStatus,
    pub source: EvidenceSource,
    pub warnings: Vec<String>,
}

pub struct EvidenceResolver {
    fetcher: Option<Arc<dyn EvidenceFetcher>>,
    cache: RevocationCache,
    fetch_timeout: Duration,
    max_revocation_age_secs: Option<u64>,
}

impl EvidenceResolver {
    pub fn new(fetcher: Arc<dyn EvidenceFetcher>, config: &VerifierConfig) -> Self {
        Self {
            fetcher: Some(fetcher),
            cache: RevocationCache::new(config.revocation_cache_ttl()),
            fetch_timeout: config.fetch_timeout(),
            max_revocation_age_secs: config.max_revocation_age_secs,
        }
    }

    /// Resolver with no network collaborator; network mode reports
    /// `DiscoveryUnavailable`.
    pub fn offline_only(config: &VerifierConfig) -> Self {
        Self {
            fetcher: None,
            cache: RevocationCache::disabled(),
            fetch_timeout: config.fetch_timeout(),
            max_revocation_age_secs: config.max_revocation_age_secs,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn revocation_cache(&self) -> &RevocationCache {
        &self.cache
    }

    /// Network mode. Discovery and revocation fetches share one deadline.
    pub async fn resolve_network(
        &self,
        issuer: &str,
        deadline: Duration,
    ) -> Result<TrustEvidence, AgentPinError> {
        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| AgentPinError::DiscoveryUnavailable {
                issuer: issuer.to_string(),
                reason: "no network fetcher configured".to_string(),
            })?;
        let deadline_at = tokio::time::Instant::now() + deadline;

        let fetched = tokio::time::timeout_at(deadline_at, fetcher.fetch_discovery(issuer))
            .await
            .map_err(|_| AgentPinError::DiscoveryUnavailable {
                issuer: issuer.to_string(),
                reason: format!("timed out after {:?}", deadline),
            })?
            .map_err(|e| AgentPinError::DiscoveryUnavailable {
                issuer: issuer.to_string(),
                reason: e.to_string(),
            })?;
        let discovery = parse_discovery_document(issuer, fetched.body)?;

        let revocation = match &discovery.revocation_endpoint {
            None => RevocationStatus::Unknown {
                reason: format!("{} publishes no revocation endpoint", issuer),
            },
            Some(endpoint) => match self.cache.get(endpoint) {
                Some(state) => {
                    tracing::debug!("Revocation cache hit for {}", endpoint);
                    RevocationStatus::Known(state)
                }
                None => {
                    self.fetch_revocation(&**fetcher, endpoint, deadline_at)
                        .await
                }
            },
        };

        let mut warnings = Vec::new();
        let revocation = self.apply_freshness(revocation, Utc::now(), &mut warnings);

        Ok(TrustEvidence {
            discovery,
            revocation,
            source: EvidenceSource::Network,
            warnings,
        })
    }

    async fn fetch_revocation(
        &self,
        fetcher: &dyn EvidenceFetcher,
        endpoint: &str,
        deadline_at: tokio::time::Instant,
    ) -> RevocationStatus {
        let fetched = match tokio::time::timeout_at(deadline_at, fetcher.fetch_revocation(endpoint))
            .await
        {
            Err(_) => {
                tracing::warn!("Revocation fetch from {} timed out", endpoint);
                return RevocationStatus::Unknown {
                    reason: format!("revocation fetch from {} timed out", endpoint),
                };
            }
            Ok(Err(e)) => {
                tracing::warn!("Revocation fetch from {} failed: {}", endpoint, e);
                return RevocationStatus::Unknown {
                    reason: format!("revocation fetch from {} failed: {}", endpoint, e),
                };
            }
            Ok(Ok(fetched)) => fetched,
        };

        match parse_revocation_document(fetched.body, fetched.fetched_at) {
            Ok(state) => {
                self.cache.put(endpoint, &state);
                RevocationStatus::Known(state)
            }
            Err(reason) => {
                tracing::warn!("Revocation document from {} rejected: {}", endpoint, reason);
                RevocationStatus::Unknown { reason }
            }
        }
    }

    /// Pre-fetched mode: same validation as network mode, no I/O.
    pub fn resolve_prefetched(
        &self,
        issuer: &str,
        discovery: &DiscoveryDocument,
        revocation: Option<&RevocationState>,
    ) -> Result<TrustEvidence, AgentPinError> {
        validate_discovery_document(discovery).map_err(|reason| {
            AgentPinError::DiscoveryUnavailable {
                issuer: issuer.to_string(),
                reason,
            }
        })?;

        let status = match revocation {
            Some(state) => RevocationStatus::Known(state.clone()),
            None => RevocationStatus::Unknown {
                reason: "no revocation document supplied".to_string(),
            },
        };
        let mut warnings = Vec::new();
        let revocation = self.apply_freshness(status, Utc::now(), &mut warnings);

        Ok(TrustEvidence {
            discovery: discovery.clone(),
            revocation,
            source: EvidenceSource::Offline,
            warnings,
        })
    }

    /// Bundle mode. The snapshot is only as current as the bundle.
    pub fn resolve_bundle(
        &self,
        issuer: &str,
        bundle: &TrustBundle,
    ) -> Result<TrustEvidence, AgentPinError> {
        let entry = bundle
            .get(issuer)
            .ok_or_else(|| AgentPinError::UnknownIssuer {
                issuer: issuer.to_string(),
            })?;
        validate_discovery_document(&entry.discovery).map_err(|reason| {
            AgentPinError::DiscoveryUnavailable {
                issuer: issuer.to_string(),
                reason,
            }
        })?;

        let now = Utc::now();
        let mut warnings = Vec::new();
        let status = match &entry.revocation_snapshot {
            Some(state) => {
                warnings.push(format!(
                    "revocation snapshot for {} is {}s old (bundle mode)",
                    issuer,
                    state.age_secs(now).max(0)
                ));
                RevocationStatus::Known(state.clone())
            }
            None => RevocationStatus::Unknown {
                reason: format!("bundle carries no revocation snapshot for {}", issuer),
            },
        };
        let revocation = self.apply_freshness(status, now, &mut warnings);

        Ok(TrustEvidence {
            discovery: entry.discovery.clone(),
            revocation,
            source: EvidenceSource::Bundle,
            warnings,
        })
    }

    /// Export operation: fetch each issuer over the network into a new bundle.
    /// Issuers whose revocation status is unknown are bundled without a
    /// snapshot.
    pub async fn export_bundle(&self, issuers: &[String]) -> Result<TrustBundle, AgentPinError> {
        let mut bundle = TrustBundle::new();
        for issuer in issuers {
            let evidence = self.resolve_network(issuer, self.fetch_timeout).await?;
            let snapshot = match evidence.revocation {
                RevocationStatus::Known(state) => Some(state),
                RevocationStatus::Unknown { reason } => {
                    tracing::warn!("Bundling {} without revocation snapshot: {}", issuer, reason);
                    None
                }
            };
            bundle.insert(evidence.discovery, snapshot)?;
        }
        Ok(bundle)
    }

    fn apply_freshness(
        &self,
        status: RevocationStatus,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> RevocationStatus {
        let Some(max_age) = self.max_revocation_age_secs else {
            return status;
        };

        if let RevocationStatus::Known(state) = &status {
            let age = state.age_secs(now);
            if age > max_age as i64 {
                let reason = format!("revocation state is {}s old, limit is {}s", age, max_age);
                warnings.push(reason.clone());
                return RevocationStatus::Unknown { reason };
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::build_discovery_document;
    use crate::jwk::generate_key_pair;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFetcher {
        discovery: serde_json::Value,
        revocation: Option<serde_json::Value>,
        delay: Duration,
        revocation_calls: AtomicUsize,
    }

    #[async_trait]
    impl EvidenceFetcher for StubFetcher {
        async fn fetch_discovery(&self, _issuer: &str) -> Result<FetchedDocument, FetchError> {
            Ok(FetchedDocument {
                body: self.discovery.clone(),
                fetched_at: Utc::now(),
            })
        }

        async fn fetch_revocation(&self, _endpoint: &str) -> Result<FetchedDocument, FetchError> {
            self.revocation_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.revocation
                .clone()
                .map(|body| FetchedDocument {
                    body,
                    fetched_at: Utc::now(),
                })
                .ok_or(FetchError::Status(404))
        }
    }

    fn stub(revocation: Option<serde_json::Value>, delay: Duration) -> Arc<StubFetcher> {
        let pair = generate_key_pair().unwrap();
        let doc = build_discovery_document(
            "a.example",
            vec![pair.public_jwk("k1")],
            Some("https://a.example/revocations.json".to_string()),
            None,
        )
        .unwrap();
        Arc::new(StubFetcher {
            discovery: serde_json::to_value(doc).unwrap(),
            revocation,
            delay,
            revocation_calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_network_resolution() {
        let fetcher = stub(
            Some(serde_json::json!({"revoked_kids": ["old"]})),
            Duration::ZERO,
        );
        let resolver = EvidenceResolver::new(fetcher, &VerifierConfig::ephemeral());
        let evidence = resolver
            .resolve_network("a.example", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(evidence.source, EvidenceSource::Network);
        assert!(matches!(
            evidence.revocation,
            RevocationStatus::Known(ref s) if s.revoked_kids.contains("old")
        ));
    }

    #[tokio::test]
    async fn test_unreachable_revocation_degrades_to_unknown() {
        let fetcher = stub(None, Duration::ZERO);
        let resolver = EvidenceResolver::new(fetcher, &VerifierConfig::ephemeral());
        let evidence = resolver
            .resolve_network("a.example", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(evidence.revocation, RevocationStatus::Unknown { .. }));
    }

    #[tokio::test]
    async fn test_revocation_timeout_degrades_to_unknown() {
        let fetcher = stub(
            Some(serde_json::json!({})),
            Duration::from_secs(30),
        );
        let resolver = EvidenceResolver::new(fetcher, &VerifierConfig::ephemeral());
        let evidence = resolver
            .resolve_network("a.example", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(matches!(evidence.revocation, RevocationStatus::Unknown { .. }));
    }

    #[tokio::test]
    async fn test_revocation_cache_avoids_refetch() {
        let fetcher = stub(Some(serde_json::json!({})), Duration::ZERO);
        let config = VerifierConfig {
            revocation_cache_ttl_secs: Some(300),
            ..VerifierConfig::ephemeral()
        };
        let resolver = EvidenceResolver::new(fetcher.clone(), &config);

        for _ in 0..3 {
            resolver
                .resolve_network("a.example", Duration::from_secs(5))
                .await
                .unwrap();
        }
        assert_eq!(fetcher.revocation_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_fetcher_is_unavailable() {
        let resolver = EvidenceResolver::offline_only(&VerifierConfig::ephemeral());
        let result = resolver
            .resolve_network("a.example", Duration::from_secs(1))
            .await;
        assert!(matches!(
            result,
            Err(AgentPinError::DiscoveryUnavailable { .. })
        ));
    }

    #[test]
    fn test_bundle_unknown_issuer() {
        let resolver = EvidenceResolver::offline_only(&VerifierConfig::ephemeral());
        let result = resolver.resolve_bundle("nobody.example", &TrustBundle::new());
        assert!(matches!(result, Err(AgentPinError::UnknownIssuer { .. })));
    }

    #[test]
    fn test_stale_revocation_becomes_unknown() {
        let config = VerifierConfig {
            max_revocation_age_secs: Some(60),
            ..VerifierConfig::ephemeral()
        };
        let resolver = EvidenceResolver::offline_only(&config);
        let pair = generate_key_pair().unwrap();
        let doc =
            build_discovery_document("a.example", vec![pair.public_jwk("k1")], None, None).unwrap();
        let stale = RevocationState::empty(Utc::now() - chrono::Duration::seconds(600));

        let evidence = resolver
            .resolve_prefetched("a.example", &doc, Some(&stale))
            .unwrap();
        assert!(matches!(evidence.revocation, RevocationStatus::Unknown { .. }));
        assert_eq!(evidence.warnings.len(), 1);
    }
}
