//! SapperAI core - policy-driven detection and enforcement for AI agent
//! tool use.
//!
//! The pipeline: a [`Policy`] names detectors and thresholds, the
//! [`DecisionEngine`] fuses detector evidence worst-case into a [`Decision`],
//! and the [`Guard`] wraps the engine for the pre/post tool hooks with an
//! append-only audit trail. Install-time scanning, quarantine, threat intel,
//! and finding scoring support the watcher and campaign layers built on top.

pub mod audit;
pub mod context;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod intel;
pub mod policy;
pub mod policy_match;
pub mod policy_path;
pub mod presets;
pub mod quarantine;
pub mod scanner;
pub mod scoring;

pub use audit::{AuditLogEntry, AuditSink, FileAuditLogger, MemoryAuditSink, NoopAuditSink};
pub use context::{
    AssessmentContext, ContextKind, Decision, DetectorOutput, ToolCall, ToolResult,
};
pub use detectors::{
    create_detectors, Detector, LlmClassifier, LlmDetector, LlmVerdict, RulesDetector,
    ThreatIntelDetector, ThreatIntelEntry, ThreatIntelKind, ThreatSeverity,
};
pub use engine::{DecisionEngine, Guard};
pub use error::{Error, PolicyFieldError, PolicyValidationError, Result};
pub use intel::{
    apply_threat_intel_blocklist, build_match_list_from_intel, load_threat_intel_entries,
    FeedFetcher, HttpFeedFetcher, IntelSnapshot, SyncResult, ThreatIntelStore,
};
pub use policy::{
    Action, EffectiveThresholds, LlmConfig, MatchList, Policy, PolicyMode, ThreatFeedConfig,
    Thresholds,
};
pub use policy_match::{evaluate_policy_match, MatchProbe, PolicyMatch};
pub use policy_path::{resolve_policy_path, PolicyScope, ResolvedPolicyPath};
pub use presets::{preset, Preset, PRESET_NAMES};
pub use quarantine::{QuarantineManager, QuarantineRecord};
pub use scanner::{
    build_entry_name, build_targets, classify_target_type, collect_mcp_targets_from_json,
    is_config_like_file, normalize_surface_text, ScanTarget, Scanner, TargetType,
};
pub use scoring::{score_finding, FindingInput, FindingScore, Impact, Outcome};
