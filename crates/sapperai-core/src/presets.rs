//! Built-in policy presets.

use crate::policy::{Action, Policy, PolicyMode, Thresholds};

/// A named, documented starting-point policy.
#[derive(Clone, Debug)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub policy: Policy,
}

pub const PRESET_NAMES: [&str; 6] = [
    "monitor",
    "standard",
    "strict",
    "paranoid",
    "ci",
    "development",
];

/// Look up a preset by name.
pub fn preset(name: &str) -> Option<Preset> {
    let base = |mode, fail_open, risk, confidence, detectors: &[&str]| Policy {
        mode,
        default_action: Action::Allow,
        fail_open,
        detectors: Some(detectors.iter().map(|d| d.to_string()).collect()),
        thresholds: Some(Thresholds {
            risk_threshold: Some(risk),
            block_min_confidence: Some(confidence),
        }),
        ..Policy::default()
    };

    let preset = match name {
        "monitor" => Preset {
            name: "monitor",
            description: "Monitor only - logs threats but never blocks",
            policy: base(PolicyMode::Monitor, true, 0.7, 0.5, &["rules"]),
        },
        "standard" => Preset {
            name: "standard",
            description: "Balanced protection with sensible defaults",
            policy: base(PolicyMode::Enforce, true, 0.7, 0.5, &["rules"]),
        },
        "strict" => Preset {
            name: "strict",
            description: "Strict enforcement with lower thresholds",
            policy: base(PolicyMode::Enforce, false, 0.5, 0.3, &["rules"]),
        },
        "paranoid" => Preset {
            name: "paranoid",
            description: "Maximum security - aggressive blocking, fail closed, LLM analysis",
            policy: base(PolicyMode::Enforce, false, 0.3, 0.2, &["rules", "llm"]),
        },
        "ci" => Preset {
            name: "ci",
            description: "CI/CD pipeline - deterministic, fail closed, no LLM",
            policy: base(PolicyMode::Enforce, false, 0.7, 0.5, &["rules"]),
        },
        "development" => Preset {
            name: "development",
            description: "Development mode - permissive, monitor only",
            policy: base(PolicyMode::Monitor, true, 0.9, 0.8, &["rules"]),
        },
        _ => return None,
    };
    Some(preset)
}
