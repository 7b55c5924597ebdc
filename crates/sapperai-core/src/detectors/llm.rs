//! Secondary LLM classifier detector.
//!
//! The transport is a collaborator behind [`LlmClassifier`]; the detector
//! itself only shapes the text corpus and degrades classifier failures to no
//! signal. Without an `llm` policy section the detector is inactive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::context::{AssessmentContext, DetectorOutput};
use crate::detectors::{collect_context_text, Detector};
use crate::error::Result;

/// Verdict returned by the classifier backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmVerdict {
    pub risk: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Classification backend. Implementations wrap a provider API.
#[async_trait]
pub trait LlmClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<LlmVerdict>;
}

/// Detector id `llm`.
pub struct LlmDetector {
    classifier: Option<Arc<dyn LlmClassifier>>,
}

impl LlmDetector {
    /// An inactive detector; `applies_to` is always false.
    pub fn inactive() -> Self {
        Self { classifier: None }
    }

    pub fn new(classifier: Arc<dyn LlmClassifier>) -> Self {
        Self {
            classifier: Some(classifier),
        }
    }
}

#[async_trait]
impl Detector for LlmDetector {
    fn id(&self) -> &str {
        "llm"
    }

    fn applies_to(&self, ctx: &AssessmentContext) -> bool {
        self.classifier.is_some() && ctx.policy.llm.is_some()
    }

    async fn run(&self, ctx: &AssessmentContext) -> Option<DetectorOutput> {
        let classifier = self.classifier.as_ref()?;
        let corpus = collect_context_text(ctx).join("\n");
        if corpus.trim().is_empty() {
            return None;
        }

        match classifier.classify(&corpus).await {
            Ok(verdict) => Some(
                DetectorOutput::new(self.id(), verdict.risk, verdict.confidence)
                    .with_reasons(vec![verdict.reason.clone()])
                    .with_evidence(json!({ "verdict": verdict })),
            ),
            Err(err) => {
                tracing::debug!(error = %err, "llm classifier failed, treating as no signal");
                None
            }
        }
    }
}
