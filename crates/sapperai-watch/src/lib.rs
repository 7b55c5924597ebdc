//! SapperAI watch services: the filesystem watcher that scans and
//! quarantines agent artifacts as they land, and the adversary campaign
//! runner that probes the decision path with mutated attack corpora.

pub mod adversary;
pub mod error;
pub mod watcher;

pub use adversary::{
    AdversaryCampaignRunner, AttackCase, CampaignRunOptions, CampaignRunResult, DynamicProber,
    Finding, InMemoryAssessmentOptions, InMemoryAssessmentResult, InMemoryAssessmentTarget,
    ReplayOutcome,
};
pub use error::{Error, Result};
pub use watcher::{DynamicOptions, FileWatcher, WatchPhase};
