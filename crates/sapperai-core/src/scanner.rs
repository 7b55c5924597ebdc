//! Install-time scanning of tool and artifact surfaces.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;

use crate::context::{AssessmentContext, Decision};
use crate::engine::DecisionEngine;
use crate::policy::Policy;

/// Byte window scanned per surface. Larger content is truncated.
pub const SCAN_WINDOW_BYTES: usize = 200_000;

/// Kind of installable artifact a path represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Skill,
    Agent,
    McpServer,
    Plugin,
    Config,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::Skill => "skill",
            TargetType::Agent => "agent",
            TargetType::McpServer => "mcp_server",
            TargetType::Plugin => "plugin",
            TargetType::Config => "config",
        }
    }
}

/// One scannable surface extracted from a file.
#[derive(Clone, Debug)]
pub struct ScanTarget {
    pub name: String,
    pub target_type: TargetType,
    pub surface: String,
}

/// Wraps a detector chain for install-time assessments.
pub struct Scanner {
    engine: DecisionEngine,
}

impl Scanner {
    pub fn new(engine: DecisionEngine) -> Self {
        Self { engine }
    }

    /// Assess a surface as an `install_scan`. `extra_meta` fields override
    /// the defaults (`scanSource` defaults to `tool_description`).
    pub async fn scan_tool(
        &self,
        tool_id: &str,
        surface: &str,
        policy: &Policy,
        extra_meta: Option<Value>,
    ) -> Decision {
        let mut meta = Map::new();
        meta.insert("toolId".to_string(), json!(tool_id));
        meta.insert("scanText".to_string(), json!(surface));
        meta.insert("scanSource".to_string(), json!("tool_description"));
        if let Some(Value::Object(extra)) = extra_meta {
            for (key, value) in extra {
                meta.insert(key, value);
            }
        }

        let ctx = AssessmentContext::install_scan(policy.clone(), Value::Object(meta));
        self.engine.assess(&ctx).await
    }
}

/// Whether a path is worth scanning at all (markdown and structured config).
pub fn is_config_like_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("md") | Some("json") | Some("yaml") | Some("yml")
    )
}

/// Classify an artifact by its path conventions.
pub fn classify_target_type(path: &Path) -> TargetType {
    let lowered = path.to_string_lossy().to_lowercase();
    if lowered.contains("skill") {
        TargetType::Skill
    } else if lowered.contains("agent") {
        TargetType::Agent
    } else if lowered.contains("mcp") {
        TargetType::McpServer
    } else if lowered.contains("plugin") {
        TargetType::Plugin
    } else {
        TargetType::Config
    }
}

/// Strip the BOM, normalize line endings, and cap the scan window.
pub fn normalize_surface_text(content: &str) -> String {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut normalized = content.replace("\r\n", "\n");
    if normalized.len() > SCAN_WINDOW_BYTES {
        let mut cut = SCAN_WINDOW_BYTES;
        while !normalized.is_char_boundary(cut) {
            cut -= 1;
        }
        normalized.truncate(cut);
    }
    normalized
}

/// File name used in target identifiers (`skill:SKILL.md`).
pub fn build_entry_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Extract each configured MCP server as an independent target.
pub fn collect_mcp_targets_from_json(value: &Value) -> Vec<ScanTarget> {
    let Some(servers) = value.get("mcpServers").and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    servers
        .iter()
        .map(|(name, config)| ScanTarget {
            name: format!("mcp:{name}"),
            target_type: TargetType::McpServer,
            surface: config.to_string(),
        })
        .collect()
}

/// Build all scan targets for a file: the raw surface plus, for JSON files,
/// every nested MCP server definition.
pub fn build_targets(path: &Path, content: &str) -> Vec<ScanTarget> {
    let surface = normalize_surface_text(content);
    let target_type = classify_target_type(path);
    let entry_name = build_entry_name(path);

    let mut targets = vec![ScanTarget {
        name: format!("{}:{}", target_type.as_str(), entry_name),
        target_type,
        surface: surface.clone(),
    }];

    if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
        if let Ok(value) = serde_json::from_str::<Value>(&surface) {
            targets.extend(collect_mcp_targets_from_json(&value));
        }
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::RulesDetector;
    use crate::policy::Action;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn config_like_filter_accepts_docs_and_config() {
        assert!(is_config_like_file(Path::new("SKILL.md")));
        assert!(is_config_like_file(Path::new("servers.json")));
        assert!(is_config_like_file(Path::new("policy.yaml")));
        assert!(is_config_like_file(Path::new("a/b/c.yml")));
        assert!(!is_config_like_file(Path::new("binary.wasm")));
        assert!(!is_config_like_file(Path::new("noext")));
    }

    #[test]
    fn classification_follows_path_conventions() {
        assert_eq!(
            classify_target_type(Path::new("/x/skills/demo/SKILL.md")),
            TargetType::Skill
        );
        assert_eq!(
            classify_target_type(Path::new("/x/AGENTS.md")),
            TargetType::Agent
        );
        assert_eq!(
            classify_target_type(Path::new("/x/mcp-servers.json")),
            TargetType::McpServer
        );
        assert_eq!(
            classify_target_type(Path::new("/x/plugins/p.json")),
            TargetType::Plugin
        );
        assert_eq!(
            classify_target_type(Path::new("/x/settings.yaml")),
            TargetType::Config
        );
    }

    #[test]
    fn normalization_strips_bom_and_crlf() {
        let text = "\u{feff}line1\r\nline2";
        assert_eq!(normalize_surface_text(text), "line1\nline2");
        let huge = "a".repeat(SCAN_WINDOW_BYTES + 100);
        assert_eq!(normalize_surface_text(&huge).len(), SCAN_WINDOW_BYTES);
    }

    #[test]
    fn json_files_yield_nested_mcp_targets() {
        let path = PathBuf::from("/x/plugins/servers.json");
        let content = r#"{ "mcpServers": { "files": { "command": "npx files-server" }, "net": { "command": "netd" } } }"#;
        let targets = build_targets(&path, content);
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].target_type, TargetType::Plugin);
        assert!(targets.iter().any(|t| t.name == "mcp:files"));
        assert!(targets.iter().any(|t| t.name == "mcp:net"));
        assert!(targets
            .iter()
            .find(|t| t.name == "mcp:files")
            .map(|t| t.surface.contains("files-server"))
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn scan_tool_defaults_to_strict_tool_description_provenance() {
        let engine = DecisionEngine::new(vec![Arc::new(RulesDetector::new().unwrap())]);
        let scanner = Scanner::new(engine);
        let policy = Policy::default();

        let decision = scanner
            .scan_tool("demo", "Use ../ to access parent directory", &policy, None)
            .await;
        assert_eq!(decision.action, Action::Block);
        assert_eq!(decision.risk, 0.8);

        let decision = scanner
            .scan_tool(
                "demo",
                "Use ../ to access parent directory",
                &policy,
                Some(json!({ "scanSource": "file_surface" })),
            )
            .await;
        // Downgraded file-surface traversal stays under the block threshold.
        assert_eq!(decision.action, Action::Allow);
        assert_eq!(decision.risk, 0.6);
    }
}
