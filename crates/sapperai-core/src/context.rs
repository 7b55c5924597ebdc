//! Assessment data model shared by detectors, the engine, and the audit log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::{Action, Policy};

/// Stage of agent execution an assessment applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Before a tool call is dispatched.
    PreToolCall,
    /// After a tool result comes back, before the agent sees it.
    PostToolResult,
    /// Static scan of an installable artifact (skill, agent, MCP server).
    InstallScan,
}

/// A tool invocation under assessment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// The result a tool returned.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ToolResult {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            meta: None,
        }
    }
}

/// Everything a detector may inspect for one assessment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssessmentContext {
    pub kind: ContextKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    pub policy: Policy,
    /// Free-form provenance (scan text, scan source, source path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl AssessmentContext {
    pub fn pre_tool_call(tool_call: ToolCall, policy: Policy) -> Self {
        Self {
            kind: ContextKind::PreToolCall,
            tool_call: Some(tool_call),
            tool_result: None,
            policy,
            meta: None,
        }
    }

    pub fn post_tool_result(tool_call: ToolCall, tool_result: ToolResult, policy: Policy) -> Self {
        Self {
            kind: ContextKind::PostToolResult,
            tool_call: Some(tool_call),
            tool_result: Some(tool_result),
            policy,
            meta: None,
        }
    }

    pub fn install_scan(policy: Policy, meta: Value) -> Self {
        Self {
            kind: ContextKind::InstallScan,
            tool_call: None,
            tool_result: None,
            policy,
            meta: Some(meta),
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// String value of a meta field, when present.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.as_ref()?.get(key)?.as_str()
    }
}

/// Evidence produced by a single detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorOutput {
    pub detector_id: String,
    pub risk: f64,
    pub confidence: f64,
    pub reasons: Vec<String>,
    #[serde(default)]
    pub evidence: Value,
}

impl DetectorOutput {
    pub fn new(detector_id: impl Into<String>, risk: f64, confidence: f64) -> Self {
        Self {
            detector_id: detector_id.into(),
            risk,
            confidence,
            reasons: Vec::new(),
            evidence: Value::Null,
        }
    }

    pub fn with_reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }

    pub fn with_evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }
}

/// Fused verdict for one assessment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub risk: f64,
    pub confidence: f64,
    pub reasons: Vec<String>,
    /// Every detector output that fired, in registration order.
    pub evidence: Vec<DetectorOutput>,
}

impl Decision {
    /// The no-signal verdict for a policy's default action.
    pub fn default_verdict(action: Action) -> Self {
        Self {
            action,
            risk: 0.0,
            confidence: 0.0,
            reasons: Vec::new(),
            evidence: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.action == Action::Block
    }
}
