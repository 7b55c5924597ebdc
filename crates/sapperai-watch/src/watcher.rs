//! Filesystem watcher over agent artifact directories.
//!
//! Watches for created or modified config-like files, runs the fast-path
//! policy match and the full detector scan against every extracted target,
//! optionally probes skills and agents dynamically, and quarantines on
//! enforce. Every step leaves a phase-tagged audit entry.

use dashmap::DashSet;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Map, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use sapperai_core::{
    apply_threat_intel_blocklist, create_detectors, evaluate_policy_match,
    load_threat_intel_entries, Action, AssessmentContext, AuditLogEntry, AuditSink, Decision,
    DecisionEngine, Detector, FeedFetcher, FileAuditLogger, HttpFeedFetcher, MatchProbe, Policy,
    QuarantineManager, ScanTarget, Scanner, TargetType, ThreatIntelEntry, ThreatIntelStore,
};

use crate::adversary::{
    AdversaryCampaignRunner, DynamicProber, InMemoryAssessmentOptions, InMemoryAssessmentTarget,
};
use crate::error::{Error, Result};

/// Audit phases emitted by the watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchPhase {
    Scan,
    PolicyMatch,
    DynamicScan,
    DynamicVulnerable,
    DynamicError,
    QuarantineError,
    ScanError,
}

impl WatchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchPhase::Scan => "watch_scan",
            WatchPhase::PolicyMatch => "watch_policy_match",
            WatchPhase::DynamicScan => "watch_dynamic_scan",
            WatchPhase::DynamicVulnerable => "watch_dynamic_vulnerable",
            WatchPhase::DynamicError => "watch_dynamic_error",
            WatchPhase::QuarantineError => "watch_quarantine_error",
            WatchPhase::ScanError => "watch_scan_error",
        }
    }
}

/// Dynamic (adversarial probe) settings.
#[derive(Clone, Debug)]
pub struct DynamicOptions {
    pub enabled: bool,
    pub max_cases: usize,
    pub max_duration_ms: u64,
    pub seed: String,
}

impl Default for DynamicOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            max_cases: 8,
            max_duration_ms: 1500,
            seed: "watch-default".to_string(),
        }
    }
}

fn default_watch_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".claude").join("plugins"));
        paths.push(home.join(".config").join("claude-code"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }
    paths
}

const IGNORED_COMPONENTS: [&str; 3] = ["node_modules", ".git", "dist"];

/// Watches artifact directories and enforces the policy on changed files.
pub struct FileWatcher {
    policy: Policy,
    quarantine: QuarantineManager,
    audit: Arc<dyn AuditSink>,
    detectors: Option<Vec<Arc<dyn Detector>>>,
    watch_paths: Vec<PathBuf>,
    intel_store: ThreatIntelStore,
    fetcher: Arc<dyn FeedFetcher>,
    dynamic: DynamicOptions,
    prober: Arc<dyn DynamicProber>,
    in_flight: DashSet<PathBuf>,
    intel_entries: RwLock<Vec<ThreatIntelEntry>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl FileWatcher {
    pub fn new(policy: Policy) -> Result<Self> {
        let audit: Arc<dyn AuditSink> = Arc::new(FileAuditLogger::with_default_path()?);
        Ok(Self {
            policy,
            quarantine: QuarantineManager::with_default_dir(),
            audit,
            detectors: None,
            watch_paths: default_watch_paths(),
            intel_store: ThreatIntelStore::with_default_path(),
            fetcher: Arc::new(HttpFeedFetcher::new()),
            dynamic: DynamicOptions::default(),
            prober: Arc::new(AdversaryCampaignRunner::new()),
            in_flight: DashSet::new(),
            intel_entries: RwLock::new(Vec::new()),
            watcher: Mutex::new(None),
            pump: Mutex::new(None),
        })
    }

    pub fn with_quarantine_manager(mut self, quarantine: QuarantineManager) -> Self {
        self.quarantine = quarantine;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_detectors(mut self, detectors: Vec<Arc<dyn Detector>>) -> Self {
        self.detectors = Some(detectors);
        self
    }

    pub fn with_watch_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.watch_paths = paths;
        self
    }

    pub fn with_intel_store(mut self, store: ThreatIntelStore) -> Self {
        self.intel_store = store;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn FeedFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_dynamic(mut self, dynamic: DynamicOptions) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn DynamicProber>) -> Self {
        self.prober = prober;
        self
    }

    /// Load threat intel and start watching. Create and modify events
    /// dispatch [`FileWatcher::process_path`] on a task per path.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let guard = self.watcher.lock().map_err(|_| Error::AlreadyStarted)?;
            if guard.is_some() {
                return Err(Error::AlreadyStarted);
            }
        }

        self.load_threat_intel().await?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(err) => tracing::warn!(error = %err, "watch backend error"),
            })?;

        for path in &self.watch_paths {
            if !path.exists() {
                continue;
            }
            if let Err(err) = watcher.watch(path, RecursiveMode::Recursive) {
                tracing::warn!(path = %path.display(), error = %err, "failed to watch path");
            }
        }

        let this = Arc::clone(self);
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                for path in event.paths {
                    let this = Arc::clone(&this);
                    tokio::spawn(async move {
                        this.process_path(&path).await;
                    });
                }
            }
        });

        if let Ok(mut guard) = self.watcher.lock() {
            *guard = Some(watcher);
        }
        if let Ok(mut guard) = self.pump.lock() {
            *guard = Some(pump);
        }
        tracing::info!(paths = self.watch_paths.len(), "file watcher started");
        Ok(())
    }

    pub fn close(&self) {
        if let Ok(mut guard) = self.watcher.lock() {
            guard.take();
        }
        if let Ok(mut guard) = self.pump.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    /// Assess one path end to end. Also the entry point for on-demand scans.
    /// Never fails: handler errors become `watch_scan_error` audit entries.
    pub async fn process_path(&self, path: &Path) {
        if !sapperai_core::is_config_like_file(path) || self.is_ignored(path) {
            return;
        }
        // A path already being processed is dropped, not queued.
        if !self.in_flight.insert(path.to_path_buf()) {
            return;
        }

        let outcome = self.handle_file(path).await;
        self.in_flight.remove(path);

        if let Err(err) = outcome {
            let target = ScanTarget {
                name: format!("watch:{}", sapperai_core::build_entry_name(path)),
                target_type: sapperai_core::classify_target_type(path),
                surface: String::new(),
            };
            self.log_audit(
                path,
                &target,
                &degraded_decision(vec![format!("Watch handler error: {err}")]),
                WatchPhase::ScanError,
                Map::new(),
                0,
            );
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        if path.starts_with(self.quarantine.dir()) {
            return true;
        }
        path.components().any(|component| match component {
            Component::Normal(name) => IGNORED_COMPONENTS
                .iter()
                .any(|ignored| name.to_str() == Some(ignored)),
            _ => false,
        })
    }

    async fn handle_file(&self, path: &Path) -> Result<()> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Ok(());
        };
        if content.trim().is_empty() {
            return Ok(());
        }

        let targets = sapperai_core::build_targets(path, &content);
        let effective = apply_threat_intel_blocklist(&self.policy, &self.intel_entries());

        for target in &targets {
            let dynamic_eligible = self.dynamic.enabled
                && matches!(target.target_type, TargetType::Skill | TargetType::Agent);
            let mut dynamic_evaluated = false;

            let fast_path = evaluate_policy_match(
                &effective,
                &MatchProbe {
                    tool_name: &target.name,
                    content: &target.surface,
                },
            );

            match fast_path.action {
                Some(Action::Allow) => {
                    self.log_audit(
                        path,
                        target,
                        &Decision {
                            action: Action::Allow,
                            risk: 0.0,
                            confidence: 1.0,
                            reasons: fast_path.reasons,
                            evidence: Vec::new(),
                        },
                        WatchPhase::PolicyMatch,
                        Map::new(),
                        0,
                    );
                    if dynamic_eligible {
                        dynamic_evaluated = true;
                        if self.evaluate_dynamic(path, target, &effective).await {
                            return Ok(());
                        }
                    } else {
                        continue;
                    }
                }
                Some(Action::Block) => {
                    let decision = Decision {
                        action: if self.policy.is_enforcing() {
                            Action::Block
                        } else {
                            Action::Allow
                        },
                        risk: 1.0,
                        confidence: 1.0,
                        reasons: fast_path.reasons,
                        evidence: Vec::new(),
                    };
                    self.log_audit(path, target, &decision, WatchPhase::PolicyMatch, Map::new(), 0);

                    if self.policy.is_enforcing() {
                        self.quarantine.quarantine(path, decision)?;
                        return Ok(());
                    }
                    if dynamic_eligible {
                        dynamic_evaluated = true;
                        if self.evaluate_dynamic(path, target, &effective).await {
                            return Ok(());
                        }
                    }
                    continue;
                }
                None => {}
            }

            let scanner = Scanner::new(DecisionEngine::new(self.resolve_detectors()?));
            let decision = scanner
                .scan_tool(
                    &target.name,
                    &target.surface,
                    &effective,
                    Some(json!({
                        "scanSource": "watch_surface",
                        "sourcePath": path,
                        "sourceType": target.target_type.as_str(),
                    })),
                )
                .await;
            self.log_audit(path, target, &decision, WatchPhase::Scan, Map::new(), 0);

            if decision.is_blocked() && self.policy.is_enforcing() {
                if let Err(err) = self.quarantine.quarantine(path, decision) {
                    self.log_audit(
                        path,
                        target,
                        &degraded_decision(vec![format!("Quarantine failed: {err}")]),
                        WatchPhase::QuarantineError,
                        Map::new(),
                        0,
                    );
                }
                return Ok(());
            }

            if dynamic_eligible
                && !dynamic_evaluated
                && self.evaluate_dynamic(path, target, &effective).await
            {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Probe a skill or agent target in memory. Returns true when the file
    /// was handled terminally (quarantined or fail-closed).
    async fn evaluate_dynamic(&self, path: &Path, target: &ScanTarget, policy: &Policy) -> bool {
        let started = Instant::now();
        let probe = self
            .prober
            .assess_in_memory(InMemoryAssessmentOptions {
                policy: policy.clone(),
                target: InMemoryAssessmentTarget {
                    id: target.name.clone(),
                    source_path: path.to_path_buf(),
                    source_type: target.target_type.as_str().to_string(),
                    surface: target.surface.clone(),
                },
                max_cases: Some(self.dynamic.max_cases),
                max_duration_ms: Some(self.dynamic.max_duration_ms),
                seed: Some(self.dynamic.seed.clone()),
            })
            .await;
        let elapsed_ms = started.elapsed().as_millis().max(1) as u64;

        match probe {
            Ok(result) => {
                let mut meta = Map::new();
                meta.insert("dynamic".to_string(), json!(true));
                meta.insert("totalCases".to_string(), json!(result.total_cases));
                meta.insert(
                    "vulnerableCases".to_string(),
                    json!(result.vulnerable_cases),
                );

                if !result.vulnerable {
                    self.log_audit(
                        path,
                        target,
                        &Decision {
                            action: Action::Allow,
                            risk: 0.0,
                            confidence: 1.0,
                            reasons: vec![
                                "Dynamic evaluation found no exploitable behavior".to_string()
                            ],
                            evidence: Vec::new(),
                        },
                        WatchPhase::DynamicScan,
                        meta,
                        elapsed_ms,
                    );
                    return false;
                }

                let mut reasons: Vec<String> = result
                    .findings
                    .iter()
                    .filter_map(|finding| finding.decision.reasons.first().cloned())
                    .filter(|reason| !reason.is_empty())
                    .take(3)
                    .collect();
                if reasons.is_empty() {
                    reasons.push("Dynamic evaluation identified exploitable behavior".to_string());
                }
                let max_risk = result
                    .findings
                    .iter()
                    .map(|finding| finding.decision.risk)
                    .fold(0.0f64, f64::max);
                let max_confidence = result
                    .findings
                    .iter()
                    .map(|finding| finding.decision.confidence)
                    .fold(0.0f64, f64::max);

                let decision = Decision {
                    action: if self.policy.is_enforcing() {
                        Action::Block
                    } else {
                        Action::Allow
                    },
                    risk: max_risk.clamp(0.0, 1.0),
                    confidence: max_confidence.clamp(0.0, 1.0),
                    reasons,
                    evidence: Vec::new(),
                };
                self.log_audit(
                    path,
                    target,
                    &decision,
                    WatchPhase::DynamicVulnerable,
                    meta,
                    elapsed_ms,
                );

                if !self.policy.is_enforcing() {
                    return false;
                }
                self.quarantine_with_audit(path, target, decision);
                true
            }
            Err(err) => {
                // Monitor mode and failOpen policies degrade to allow; only
                // an explicit failOpen: false under enforce fails closed.
                let fail_open = !self.policy.is_enforcing() || self.policy.fail_open;
                let decision = Decision {
                    action: if fail_open { Action::Allow } else { Action::Block },
                    risk: if fail_open { 0.0 } else { 1.0 },
                    confidence: if fail_open { 0.0 } else { 1.0 },
                    reasons: vec![format!("Dynamic evaluation failed: {err}")],
                    evidence: Vec::new(),
                };
                let mut meta = Map::new();
                meta.insert("dynamic".to_string(), json!(true));
                meta.insert("failOpen".to_string(), json!(fail_open));
                self.log_audit(
                    path,
                    target,
                    &decision,
                    WatchPhase::DynamicError,
                    meta,
                    elapsed_ms,
                );

                if fail_open {
                    return false;
                }
                self.quarantine_with_audit(path, target, decision);
                true
            }
        }
    }

    fn quarantine_with_audit(&self, path: &Path, target: &ScanTarget, decision: Decision) {
        if let Err(err) = self.quarantine.quarantine(path, decision) {
            self.log_audit(
                path,
                target,
                &degraded_decision(vec![format!("Quarantine failed: {err}")]),
                WatchPhase::QuarantineError,
                Map::new(),
                0,
            );
        }
    }

    fn resolve_detectors(&self) -> Result<Vec<Arc<dyn Detector>>> {
        if let Some(detectors) = &self.detectors {
            return Ok(detectors.clone());
        }
        Ok(create_detectors(
            &self.policy,
            self.intel_entries(),
            None,
            None,
        )?)
    }

    fn intel_entries(&self) -> Vec<ThreatIntelEntry> {
        self.intel_entries
            .read()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    async fn load_threat_intel(&self) -> Result<()> {
        let Some(feed) = &self.policy.threat_feed else {
            return Ok(());
        };
        if !feed.enabled {
            return Ok(());
        }

        // A fail-open feed degrades to the cached snapshot inside the loader;
        // an error here means the feed is fail-closed.
        let entries =
            load_threat_intel_entries(&self.policy, &self.intel_store, self.fetcher.as_ref(), false)
                .await?;
        if let Ok(mut guard) = self.intel_entries.write() {
            *guard = entries;
        }
        Ok(())
    }

    fn log_audit(
        &self,
        path: &Path,
        target: &ScanTarget,
        decision: &Decision,
        phase: WatchPhase,
        extra_meta: Map<String, Value>,
        duration_ms: u64,
    ) {
        let mut meta = Map::new();
        meta.insert("phase".to_string(), json!(phase.as_str()));
        meta.insert("scanSource".to_string(), json!("watch_surface"));
        meta.insert("sourcePath".to_string(), json!(path));
        meta.insert(
            "sourceType".to_string(),
            json!(target.target_type.as_str()),
        );
        meta.insert("targetId".to_string(), json!(target.name));
        for (key, value) in extra_meta {
            meta.insert(key, value);
        }

        let context = AssessmentContext::install_scan(self.policy.clone(), Value::Object(meta));
        self.audit
            .log(AuditLogEntry::new(context, decision.clone(), duration_ms));
    }
}

fn degraded_decision(reasons: Vec<String>) -> Decision {
    Decision {
        action: Action::Allow,
        risk: 0.0,
        confidence: 0.0,
        reasons,
        evidence: Vec::new(),
    }
}
