//! Policy model: the declarative contract for detection and enforcement.
//!
//! Policies are loaded from YAML (`sapperai.config.yaml`), validated with
//! stable field paths, and consumed by the decision engine, the fast-path
//! matcher, and the file watcher.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PolicyFieldError, PolicyValidationError, Result};

/// Enforcement mode. Monitor records verdicts but never blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    #[default]
    Enforce,
    Monitor,
}

/// Verdict for an assessment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Allow,
    Block,
}

/// Decision thresholds. Both values live in [0, 1].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Thresholds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_min_confidence: Option<f64>,
}

/// Effective thresholds after defaults are applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectiveThresholds {
    pub risk_threshold: f64,
    pub block_min_confidence: f64,
}

pub const DEFAULT_RISK_THRESHOLD: f64 = 0.7;
pub const DEFAULT_BLOCK_MIN_CONFIDENCE: f64 = 0.5;

/// Identity and content indicators matched by the fast-path evaluator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MatchList {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub url_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sha256: Vec<String>,
}

impl MatchList {
    pub fn is_empty(&self) -> bool {
        self.tool_names.is_empty()
            && self.package_names.is_empty()
            && self.url_patterns.is_empty()
            && self.content_patterns.is_empty()
            && self.sha256.is_empty()
    }
}

/// Configuration for the secondary LLM classifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_llm_timeout_ms() -> u64 {
    5_000
}

/// Remote threat-feed configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ThreatFeedConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default)]
    pub auto_sync: bool,
    /// When true (the default), feed sync failures degrade to the cached
    /// snapshot instead of failing the caller.
    #[serde(default = "default_true")]
    pub fail_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

/// The declarative security policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Policy {
    #[serde(default)]
    pub mode: PolicyMode,
    #[serde(default)]
    pub default_action: Action,
    #[serde(default = "default_true")]
    pub fail_open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detectors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Thresholds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocklist: Option<MatchList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowlist: Option<MatchList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_feed: Option<ThreatFeedConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            mode: PolicyMode::Enforce,
            default_action: Action::Allow,
            fail_open: true,
            detectors: None,
            thresholds: None,
            blocklist: None,
            allowlist: None,
            llm: None,
            threat_feed: None,
            audit_log_path: None,
        }
    }
}

impl Policy {
    /// Parse a policy from YAML and validate it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let policy: Policy = serde_yaml::from_str(yaml)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load a policy from a YAML file and validate it.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Render the policy back to YAML.
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the policy, collecting every field error.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(thresholds) = &self.thresholds {
            if let Some(risk) = thresholds.risk_threshold {
                if !(0.0..=1.0).contains(&risk) {
                    errors.push(PolicyFieldError::new(
                        "thresholds.riskThreshold",
                        format!("must be within [0, 1], got {risk}"),
                    ));
                }
            }
            if let Some(conf) = thresholds.block_min_confidence {
                if !(0.0..=1.0).contains(&conf) {
                    errors.push(PolicyFieldError::new(
                        "thresholds.blockMinConfidence",
                        format!("must be within [0, 1], got {conf}"),
                    ));
                }
            }
        }

        if let Some(feed) = &self.threat_feed {
            if feed.enabled && feed.auto_sync && feed.sources.is_empty() {
                errors.push(PolicyFieldError::new(
                    "threatFeed.sources",
                    "autoSync requires at least one source URL",
                ));
            }
        }

        if let Some(detectors) = &self.detectors {
            if detectors.iter().any(|d| d == "llm") && self.llm.is_none() {
                tracing::warn!(
                    "policy enables the llm detector without an llm section; it will be inactive"
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PolicyValidationError::new(errors).into())
        }
    }

    /// Thresholds with defaults applied.
    pub fn effective_thresholds(&self) -> EffectiveThresholds {
        let thresholds = self.thresholds.clone().unwrap_or_default();
        EffectiveThresholds {
            risk_threshold: thresholds.risk_threshold.unwrap_or(DEFAULT_RISK_THRESHOLD),
            block_min_confidence: thresholds
                .block_min_confidence
                .unwrap_or(DEFAULT_BLOCK_MIN_CONFIDENCE),
        }
    }

    /// Detector ids with the default applied.
    pub fn effective_detectors(&self) -> Vec<String> {
        match &self.detectors {
            Some(ids) if !ids.is_empty() => ids.clone(),
            _ => vec!["rules".to_string()],
        }
    }

    pub fn is_enforcing(&self) -> bool {
        self.mode == PolicyMode::Enforce
    }
}
