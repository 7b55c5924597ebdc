//! Decision engine: worst-case fusion of detector evidence.

use std::sync::Arc;
use std::time::Instant;

use crate::audit::{AuditLogEntry, AuditSink};
use crate::context::{AssessmentContext, Decision, DetectorOutput, ToolCall, ToolResult};
use crate::detectors::Detector;
use crate::policy::{Action, Policy, PolicyMode};

/// Runs detectors sequentially and fuses their evidence.
pub struct DecisionEngine {
    detectors: Vec<Arc<dyn Detector>>,
}

impl DecisionEngine {
    pub fn new(detectors: Vec<Arc<dyn Detector>>) -> Self {
        Self { detectors }
    }

    /// Assess a context. Highest-risk evidence wins; ties break in detector
    /// registration order. Evidence is never averaged: one confident critical
    /// signal must not be washed out by benign ones.
    pub async fn assess(&self, ctx: &AssessmentContext) -> Decision {
        let mut evidence: Vec<DetectorOutput> = Vec::new();
        for detector in &self.detectors {
            if !detector.applies_to(ctx) {
                continue;
            }
            if let Some(output) = detector.run(ctx).await {
                tracing::debug!(
                    detector = output.detector_id,
                    risk = output.risk,
                    "detector fired"
                );
                evidence.push(output);
            }
        }

        let Some(worst) = evidence
            .iter()
            .enumerate()
            .max_by(|(ai, a), (bi, b)| {
                a.risk
                    .partial_cmp(&b.risk)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // On equal risk the earlier registration wins.
                    .then(bi.cmp(ai))
            })
            .map(|(_, output)| output.clone())
        else {
            // Monitor mode only ever reports; a block default applies
            // under enforce alone.
            let action = match ctx.policy.mode {
                PolicyMode::Monitor => Action::Allow,
                PolicyMode::Enforce => ctx.policy.default_action,
            };
            return Decision::default_verdict(action);
        };

        let thresholds = ctx.policy.effective_thresholds();
        let over_thresholds = worst.risk >= thresholds.risk_threshold
            && worst.confidence >= thresholds.block_min_confidence;

        let mut reasons = worst.reasons.clone();
        let action = match ctx.policy.mode {
            PolicyMode::Enforce if over_thresholds => Action::Block,
            PolicyMode::Enforce => ctx.policy.default_action,
            PolicyMode::Monitor => {
                if over_thresholds {
                    reasons.push(format!(
                        "monitor mode: would block (risk {:.2} >= {:.2}, confidence {:.2} >= {:.2})",
                        worst.risk,
                        thresholds.risk_threshold,
                        worst.confidence,
                        thresholds.block_min_confidence
                    ));
                }
                Action::Allow
            }
        };

        Decision {
            action,
            risk: worst.risk,
            confidence: worst.confidence,
            reasons,
            evidence,
        }
    }
}

/// Enforcement seam around the engine: builds contexts for the pre/post tool
/// hooks, audits every assessment, and surfaces blocks in the log.
pub struct Guard {
    engine: DecisionEngine,
    audit: Arc<dyn AuditSink>,
    policy: Policy,
}

impl Guard {
    pub fn new(engine: DecisionEngine, audit: Arc<dyn AuditSink>, policy: Policy) -> Self {
        Self {
            engine,
            audit,
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Assess a tool call before dispatch.
    pub async fn pre_tool(&self, tool_call: &ToolCall) -> Decision {
        let ctx = AssessmentContext::pre_tool_call(tool_call.clone(), self.policy.clone());
        self.assess_and_audit(ctx).await
    }

    /// Assess a tool result before the agent sees it.
    pub async fn post_tool(&self, tool_call: &ToolCall, tool_result: &ToolResult) -> Decision {
        let ctx = AssessmentContext::post_tool_result(
            tool_call.clone(),
            tool_result.clone(),
            self.policy.clone(),
        );
        self.assess_and_audit(ctx).await
    }

    pub async fn assess_and_audit(&self, ctx: AssessmentContext) -> Decision {
        let started = Instant::now();
        let decision = self.engine.assess(&ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if decision.is_blocked() {
            tracing::warn!(
                tool = ctx.tool_call.as_ref().map(|c| c.tool_name.as_str()),
                risk = decision.risk,
                "blocked tool activity"
            );
        }
        self.audit
            .log(AuditLogEntry::new(ctx, decision.clone(), duration_ms));
        decision
    }
}
