//! Fast-path allow/block list evaluation.
//!
//! Cheap identity and indicator matching that runs before the detector chain.
//! The allowlist is consulted first: explicit trust short-circuits, which is
//! why exploitability probes strip it before assessing.

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::policy::{Action, MatchList, Policy};

/// What the fast path is being asked about.
#[derive(Clone, Debug)]
pub struct MatchProbe<'a> {
    pub tool_name: &'a str,
    pub content: &'a str,
}

/// Fast-path outcome. `action: None` means no list matched.
#[derive(Clone, Debug, Default)]
pub struct PolicyMatch {
    pub action: Option<Action>,
    pub reasons: Vec<String>,
}

/// Evaluate the probe against the policy's allowlist, then blocklist.
pub fn evaluate_policy_match(policy: &Policy, probe: &MatchProbe<'_>) -> PolicyMatch {
    if let Some(allowlist) = &policy.allowlist {
        if let Some(reason) = match_list(allowlist, probe) {
            return PolicyMatch {
                action: Some(Action::Allow),
                reasons: vec![format!("allowlist: {reason}")],
            };
        }
    }

    if let Some(blocklist) = &policy.blocklist {
        if let Some(reason) = match_list(blocklist, probe) {
            return PolicyMatch {
                action: Some(Action::Block),
                reasons: vec![format!("blocklist: {reason}")],
            };
        }
    }

    PolicyMatch::default()
}

fn match_list(list: &MatchList, probe: &MatchProbe<'_>) -> Option<String> {
    for name in list.tool_names.iter().chain(&list.package_names) {
        if name_matches(name, probe.tool_name) {
            return Some(format!("name matches {name}"));
        }
    }

    for pattern in list.url_patterns.iter().chain(&list.content_patterns) {
        if pattern_matches(pattern, probe.tool_name) || pattern_matches(pattern, probe.content) {
            return Some(format!("pattern matches {pattern}"));
        }
    }

    if !list.sha256.is_empty() {
        let digest = sha256_hex(probe.content);
        for expected in &list.sha256 {
            if expected.eq_ignore_ascii_case(&digest) {
                return Some(format!("sha256 matches {expected}"));
            }
        }
    }

    None
}

fn name_matches(entry: &str, tool_name: &str) -> bool {
    if entry == tool_name {
        return true;
    }
    match Regex::new(entry) {
        Ok(regex) => regex.is_match(tool_name),
        Err(_) => false,
    }
}

fn pattern_matches(pattern: &str, text: &str) -> bool {
    match Regex::new(&format!("(?i){pattern}")) {
        Ok(regex) => regex.is_match(text),
        // Invalid regex entries degrade to substring matching.
        Err(_) => text.to_lowercase().contains(&pattern.to_lowercase()),
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
