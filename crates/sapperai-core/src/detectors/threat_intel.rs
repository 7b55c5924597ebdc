//! Threat intelligence indicator detector.
//!
//! Matches known-bad indicators (tool names, package names, URL and content
//! patterns, content digests) sourced from the intel store. Matches are
//! deterministic: risk derives from the indicator severity and confidence is
//! always 1.0.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::context::{AssessmentContext, DetectorOutput};
use crate::detectors::{collect_context_text, Detector};

/// Indicator kind, mirroring the match-list fields it feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThreatIntelKind {
    ToolName,
    PackageName,
    UrlPattern,
    ContentPattern,
    Sha256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatSeverity {
    pub fn risk(self) -> f64 {
        match self {
            ThreatSeverity::Low => 0.6,
            ThreatSeverity::Medium => 0.75,
            ThreatSeverity::High => 0.9,
            ThreatSeverity::Critical => 1.0,
        }
    }
}

/// A single intel indicator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatIntelEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ThreatIntelKind,
    pub value: String,
    pub reason: String,
    pub severity: ThreatSeverity,
    pub source: String,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ThreatIntelEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Detector id `threat_intel`. Prepended by the factory when intel entries
/// are loaded.
pub struct ThreatIntelDetector {
    entries: Vec<ThreatIntelEntry>,
}

impl ThreatIntelDetector {
    pub fn new(entries: Vec<ThreatIntelEntry>) -> Self {
        Self { entries }
    }

    fn entry_matches(entry: &ThreatIntelEntry, tool_name: Option<&str>, chunks: &[String]) -> bool {
        match entry.kind {
            ThreatIntelKind::ToolName | ThreatIntelKind::PackageName => {
                tool_name.map(|name| name == entry.value).unwrap_or(false)
            }
            ThreatIntelKind::UrlPattern | ThreatIntelKind::ContentPattern => {
                match Regex::new(&format!("(?i){}", entry.value)) {
                    Ok(regex) => chunks.iter().any(|text| regex.is_match(text)),
                    Err(_) => chunks
                        .iter()
                        .any(|text| text.to_lowercase().contains(&entry.value.to_lowercase())),
                }
            }
            ThreatIntelKind::Sha256 => {
                let expected = entry.value.to_lowercase();
                chunks.iter().any(|text| sha256_hex(text) == expected)
            }
        }
    }
}

pub(crate) fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl Detector for ThreatIntelDetector {
    fn id(&self) -> &str {
        "threat_intel"
    }

    fn applies_to(&self, _ctx: &AssessmentContext) -> bool {
        !self.entries.is_empty()
    }

    async fn run(&self, ctx: &AssessmentContext) -> Option<DetectorOutput> {
        let chunks = collect_context_text(ctx);
        let tool_name = ctx.tool_call.as_ref().map(|call| call.tool_name.as_str());
        let now = Utc::now();

        let hits: Vec<&ThreatIntelEntry> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .filter(|entry| Self::entry_matches(entry, tool_name, &chunks))
            .collect();

        if hits.is_empty() {
            return None;
        }

        let worst = hits
            .iter()
            .map(|entry| entry.severity)
            .max()
            .unwrap_or(ThreatSeverity::Medium);
        let reasons = hits
            .iter()
            .map(|entry| format!("Threat intel match: {} ({})", entry.id, entry.reason))
            .collect();

        Some(
            DetectorOutput::new(self.id(), worst.risk(), 1.0)
                .with_reasons(reasons)
                .with_evidence(json!({
                    "entries": hits.iter().map(|e| &e.id).collect::<Vec<_>>(),
                })),
        )
    }
}
