//! Threat intelligence store: cached snapshot plus remote feed sync.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::detectors::{ThreatIntelEntry, ThreatIntelKind, ThreatSeverity};
use crate::error::{Error, Result};
use crate::policy::{MatchList, Policy};

/// Persisted snapshot of intel entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelSnapshot {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub entries: Vec<ThreatIntelEntry>,
}

impl Default for IntelSnapshot {
    fn default() -> Self {
        Self {
            version: 1,
            updated_at: Utc::now(),
            entries: Vec::new(),
        }
    }
}

/// Result of a feed sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncResult {
    pub accepted_entries: usize,
}

/// Transport seam for feed fetching; tests inject a stub.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<Value>;
}

/// Production fetcher backed by reqwest.
pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch_json(&self, url: &str) -> Result<Value> {
        let response = self.client.get(url).send().await.map_err(|err| Error::FeedSync {
            source_url: url.to_string(),
            message: err.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(Error::FeedSync {
                source_url: url.to_string(),
                message: format!("status {}", response.status()),
            });
        }
        response.json().await.map_err(|err| Error::FeedSync {
            source_url: url.to_string(),
            message: err.to_string(),
        })
    }
}

/// Feed entries may be partial; missing fields get defaults.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeedEntry {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: ThreatIntelKind,
    value: String,
    reason: Option<String>,
    severity: Option<ThreatSeverity>,
    source: Option<String>,
    added_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct FeedBody {
    entries: Vec<RawFeedEntry>,
}

/// On-disk intel cache with feed sync.
pub struct ThreatIntelStore {
    cache_path: PathBuf,
}

impl ThreatIntelStore {
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
        }
    }

    pub fn with_default_path() -> Self {
        let path = dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".sapperai")
            .join("intel.json");
        Self::new(path)
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Read the cached snapshot. Missing or corrupt cache reads as empty.
    pub fn load_snapshot(&self) -> IntelSnapshot {
        match std::fs::read_to_string(&self.cache_path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "intel cache corrupt, starting fresh");
                IntelSnapshot::default()
            }),
            Err(_) => IntelSnapshot::default(),
        }
    }

    pub fn save_snapshot(&self, snapshot: &IntelSnapshot) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.cache_path, serde_json::to_string_pretty(snapshot)?)?;
        Ok(())
    }

    /// Fetch every source, merge accepted entries into the cached snapshot
    /// (feed wins on id collision), and persist.
    pub async fn sync_from_sources(
        &self,
        fetcher: &dyn FeedFetcher,
        sources: &[String],
    ) -> Result<SyncResult> {
        let mut accepted: Vec<ThreatIntelEntry> = Vec::new();
        for url in sources {
            let body = fetcher.fetch_json(url).await?;
            let feed: FeedBody =
                serde_json::from_value(body).map_err(|err| Error::FeedSync {
                    source_url: url.clone(),
                    message: format!("malformed feed body: {err}"),
                })?;
            for raw in feed.entries {
                accepted.push(materialize_entry(raw, url));
            }
        }

        let mut snapshot = self.load_snapshot();
        for entry in &accepted {
            snapshot.entries.retain(|existing| existing.id != entry.id);
            snapshot.entries.push(entry.clone());
        }
        snapshot.updated_at = Utc::now();
        self.save_snapshot(&snapshot)?;

        tracing::info!(accepted = accepted.len(), "threat feed sync complete");
        Ok(SyncResult {
            accepted_entries: accepted.len(),
        })
    }
}

fn materialize_entry(raw: RawFeedEntry, source_url: &str) -> ThreatIntelEntry {
    ThreatIntelEntry {
        id: raw
            .id
            .unwrap_or_else(|| format!("feed-{}", uuid::Uuid::new_v4().simple())),
        kind: raw.kind,
        value: raw.value,
        reason: raw.reason.unwrap_or_default(),
        severity: raw.severity.unwrap_or(ThreatSeverity::Medium),
        source: raw.source.unwrap_or_else(|| source_url.to_string()),
        added_at: raw.added_at.unwrap_or_else(Utc::now),
        expires_at: raw.expires_at,
    }
}

/// Project intel entries onto match-list fields.
pub fn build_match_list_from_intel(entries: &[ThreatIntelEntry]) -> MatchList {
    let mut list = MatchList::default();
    for entry in entries {
        let target = match entry.kind {
            ThreatIntelKind::ToolName => &mut list.tool_names,
            ThreatIntelKind::PackageName => &mut list.package_names,
            ThreatIntelKind::UrlPattern => &mut list.url_patterns,
            ThreatIntelKind::ContentPattern => &mut list.content_patterns,
            ThreatIntelKind::Sha256 => &mut list.sha256,
        };
        if !target.contains(&entry.value) {
            target.push(entry.value.clone());
        }
    }
    list
}

/// Merge intel indicators into the policy blocklist, deduplicating values.
pub fn apply_threat_intel_blocklist(policy: &Policy, entries: &[ThreatIntelEntry]) -> Policy {
    let intel = build_match_list_from_intel(entries);
    if intel.is_empty() {
        return policy.clone();
    }

    let mut merged = policy.blocklist.clone().unwrap_or_default();
    merge_unique(&mut merged.tool_names, intel.tool_names);
    merge_unique(&mut merged.package_names, intel.package_names);
    merge_unique(&mut merged.url_patterns, intel.url_patterns);
    merge_unique(&mut merged.content_patterns, intel.content_patterns);
    merge_unique(&mut merged.sha256, intel.sha256);

    Policy {
        blocklist: Some(merged),
        ..policy.clone()
    }
}

fn merge_unique(target: &mut Vec<String>, additions: Vec<String>) {
    for value in additions {
        if !target.contains(&value) {
            target.push(value);
        }
    }
}

/// Load intel entries per the policy's `threatFeed` section.
///
/// Syncs first when `autoSync` is set (unless the caller skips it); a sync
/// failure propagates only when the feed is configured fail-closed.
pub async fn load_threat_intel_entries(
    policy: &Policy,
    store: &ThreatIntelStore,
    fetcher: &dyn FeedFetcher,
    skip_sync: bool,
) -> Result<Vec<ThreatIntelEntry>> {
    let Some(feed) = &policy.threat_feed else {
        return Ok(Vec::new());
    };
    if !feed.enabled {
        return Ok(Vec::new());
    }

    if feed.auto_sync && !skip_sync && !feed.sources.is_empty() {
        if let Err(err) = store.sync_from_sources(fetcher, &feed.sources).await {
            if feed.fail_open {
                tracing::warn!(error = %err, "threat feed sync failed, using cached snapshot");
            } else {
                return Err(err);
            }
        }
    }

    Ok(store.load_snapshot().entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ThreatFeedConfig;
    use serde_json::json;
    use std::collections::HashMap;

    struct StubFetcher {
        responses: HashMap<String, Value>,
    }

    #[async_trait]
    impl FeedFetcher for StubFetcher {
        async fn fetch_json(&self, url: &str) -> Result<Value> {
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| Error::FeedSync {
                    source_url: url.to_string(),
                    message: "not found".to_string(),
                })
        }
    }

    fn store_in(dir: &Path) -> ThreatIntelStore {
        ThreatIntelStore::new(dir.join("intel.json"))
    }

    #[tokio::test]
    async fn syncs_entries_and_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let feed_url = "https://threat-feed.test/feed".to_string();
        let fetcher = StubFetcher {
            responses: HashMap::from([(
                feed_url.clone(),
                json!({
                    "entries": [
                        {
                            "id": "malicious-tool-1",
                            "type": "toolName",
                            "value": "evil_tool",
                            "reason": "Known malware",
                            "severity": "critical"
                        },
                        { "type": "urlPattern", "value": "evil\\.example" }
                    ]
                }),
            )]),
        };

        let result = store
            .sync_from_sources(&fetcher, &[feed_url])
            .await
            .unwrap();
        assert_eq!(result.accepted_entries, 2);

        let snapshot = store.load_snapshot();
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries[0].id, "malicious-tool-1");
        // Partial entry got defaults.
        assert_eq!(snapshot.entries[1].severity, ThreatSeverity::Medium);
        assert_eq!(snapshot.entries[1].source, "https://threat-feed.test/feed");

        let list = build_match_list_from_intel(&snapshot.entries);
        assert!(list.tool_names.contains(&"evil_tool".to_string()));
        assert!(list.url_patterns.contains(&r"evil\.example".to_string()));
    }

    #[tokio::test]
    async fn sync_preserves_cached_entries_and_overwrites_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let cached = ThreatIntelEntry {
            id: "cached-entry".to_string(),
            kind: ThreatIntelKind::ToolName,
            value: "persist_me".to_string(),
            reason: "cached".to_string(),
            severity: ThreatSeverity::High,
            source: "seed".to_string(),
            added_at: Utc::now(),
            expires_at: None,
        };
        store
            .save_snapshot(&IntelSnapshot {
                version: 1,
                updated_at: Utc::now(),
                entries: vec![cached],
            })
            .unwrap();

        let feed_url = "https://threat-feed.test/merge".to_string();
        let fetcher = StubFetcher {
            responses: HashMap::from([(
                feed_url.clone(),
                json!({
                    "entries": [
                        { "id": "new-entry", "type": "packageName", "value": "new_package" }
                    ]
                }),
            )]),
        };
        store
            .sync_from_sources(&fetcher, &[feed_url])
            .await
            .unwrap();

        let snapshot = store.load_snapshot();
        assert!(snapshot.entries.iter().any(|e| e.id == "cached-entry"));
        assert!(snapshot.entries.iter().any(|e| e.id == "new-entry"));
    }

    #[tokio::test]
    async fn fail_open_feed_degrades_to_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let fetcher = StubFetcher {
            responses: HashMap::new(),
        };

        let mut policy = Policy {
            threat_feed: Some(ThreatFeedConfig {
                enabled: true,
                sources: vec!["https://down.test/feed".to_string()],
                auto_sync: true,
                fail_open: true,
                cache_path: None,
            }),
            ..Policy::default()
        };

        let entries = load_threat_intel_entries(&policy, &store, &fetcher, false)
            .await
            .unwrap();
        assert!(entries.is_empty());

        if let Some(feed) = policy.threat_feed.as_mut() {
            feed.fail_open = false;
        }
        let err = load_threat_intel_entries(&policy, &store, &fetcher, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FeedSync { .. }));
    }

    #[test]
    fn blocklist_merge_deduplicates() {
        let entries = vec![ThreatIntelEntry {
            id: "e1".to_string(),
            kind: ThreatIntelKind::ToolName,
            value: "evil_tool".to_string(),
            reason: String::new(),
            severity: ThreatSeverity::High,
            source: "unit".to_string(),
            added_at: Utc::now(),
            expires_at: None,
        }];
        let policy = Policy {
            blocklist: Some(MatchList {
                tool_names: vec!["evil_tool".to_string(), "other".to_string()],
                ..MatchList::default()
            }),
            ..Policy::default()
        };
        let merged = apply_threat_intel_blocklist(&policy, &entries);
        let names = merged.blocklist.unwrap().tool_names;
        assert_eq!(names.len(), 2);
    }
}
