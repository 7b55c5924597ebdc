//! Detection layer
//!
//! Detectors inspect an [`AssessmentContext`] and emit risk evidence. They
//! never fail: malformed or irrelevant input degrades to no signal.

mod factory;
mod llm;
mod rules;
mod threat_intel;

pub use factory::create_detectors;
pub use llm::{LlmClassifier, LlmDetector, LlmVerdict};
pub use rules::RulesDetector;
pub use threat_intel::{ThreatIntelDetector, ThreatIntelEntry, ThreatIntelKind, ThreatSeverity};

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{AssessmentContext, DetectorOutput};

/// Trait for detection backends.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Stable identifier, referenced from `policy.detectors`.
    fn id(&self) -> &str;

    /// Whether this detector has anything to say about the context.
    fn applies_to(&self, ctx: &AssessmentContext) -> bool;

    /// Evaluate the context. `None` means no signal.
    async fn run(&self, ctx: &AssessmentContext) -> Option<DetectorOutput>;
}

/// Flatten every string-like leaf of the context into text chunks.
///
/// Object keys are scanned as text too; an attacker controls key names as
/// much as values. Numbers and booleans are stringified.
pub(crate) fn collect_context_text(ctx: &AssessmentContext) -> Vec<String> {
    let mut chunks = Vec::new();
    if let Some(call) = &ctx.tool_call {
        collect_text(&call.arguments, &mut chunks);
        if let Some(meta) = &call.meta {
            collect_text(meta, &mut chunks);
        }
    }
    if let Some(result) = &ctx.tool_result {
        collect_text(&result.content, &mut chunks);
        if let Some(meta) = &result.meta {
            collect_text(meta, &mut chunks);
        }
    }
    if let Some(meta) = &ctx.meta {
        collect_text(meta, &mut chunks);
    }
    chunks
}

fn collect_text(value: &Value, target: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::String(s) => target.push(s.clone()),
        Value::Number(n) => target.push(n.to_string()),
        Value::Bool(b) => target.push(b.to_string()),
        Value::Array(items) => {
            for item in items {
                collect_text(item, target);
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                target.push(key.clone());
                collect_text(nested, target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ToolCall;
    use crate::policy::Policy;
    use serde_json::json;

    #[test]
    fn collects_leaves_and_object_keys() {
        let ctx = AssessmentContext::pre_tool_call(
            ToolCall::new(
                "search",
                json!({ "query": "hello", "opts": { "limit": 3, "deep": true } }),
            ),
            Policy::default(),
        );
        let chunks = collect_context_text(&ctx);
        assert!(chunks.contains(&"query".to_string()));
        assert!(chunks.contains(&"hello".to_string()));
        assert!(chunks.contains(&"limit".to_string()));
        assert!(chunks.contains(&"3".to_string()));
        assert!(chunks.contains(&"true".to_string()));
    }
}
