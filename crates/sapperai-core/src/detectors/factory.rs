//! Detector construction from policy.

use std::sync::Arc;

use crate::detectors::{
    Detector, LlmClassifier, LlmDetector, RulesDetector, ThreatIntelDetector, ThreatIntelEntry,
};
use crate::error::Result;
use crate::policy::Policy;

/// Build the detector chain for a policy.
///
/// Threat-intel indicators, when present, are checked first. Named detectors
/// come from `preferred` when given, else `policy.detectors`, else `rules`.
/// Unknown names are ignored; an empty resolution force-includes the rules
/// detector so detection never silently vanishes.
pub fn create_detectors(
    policy: &Policy,
    threat_intel: Vec<ThreatIntelEntry>,
    preferred: Option<&[String]>,
    llm_classifier: Option<Arc<dyn LlmClassifier>>,
) -> Result<Vec<Arc<dyn Detector>>> {
    let mut detectors: Vec<Arc<dyn Detector>> = Vec::new();

    if !threat_intel.is_empty() {
        detectors.push(Arc::new(ThreatIntelDetector::new(threat_intel)));
    }

    let names: Vec<String> = match preferred {
        Some(names) => names.to_vec(),
        None => policy.effective_detectors(),
    };

    let mut added_named = false;
    for name in &names {
        match name.as_str() {
            "rules" => {
                detectors.push(Arc::new(RulesDetector::new()?));
                added_named = true;
            }
            "llm" => {
                let detector = match llm_classifier.clone() {
                    Some(classifier) => LlmDetector::new(classifier),
                    None => LlmDetector::inactive(),
                };
                detectors.push(Arc::new(detector));
                added_named = true;
            }
            other => {
                tracing::warn!(detector = other, "unknown detector name in policy, skipping");
            }
        }
    }

    if !added_named {
        detectors.push(Arc::new(RulesDetector::new()?));
    }

    Ok(detectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{ThreatIntelKind, ThreatSeverity};
    use chrono::Utc;

    fn intel_entry() -> ThreatIntelEntry {
        ThreatIntelEntry {
            id: "e1".to_string(),
            kind: ThreatIntelKind::ToolName,
            value: "evil_tool".to_string(),
            reason: "known bad".to_string(),
            severity: ThreatSeverity::High,
            source: "unit".to_string(),
            added_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn intel_entries_prepend_the_intel_detector() {
        let detectors =
            create_detectors(&Policy::default(), vec![intel_entry()], None, None).unwrap();
        assert_eq!(detectors[0].id(), "threat_intel");
        assert_eq!(detectors[1].id(), "rules");
    }

    #[test]
    fn empty_resolution_force_includes_rules() {
        let policy = Policy {
            detectors: Some(vec!["nonexistent".to_string()]),
            ..Policy::default()
        };
        let detectors = create_detectors(&policy, Vec::new(), None, None).unwrap();
        assert_eq!(detectors.len(), 1);
        assert_eq!(detectors[0].id(), "rules");
    }

    #[test]
    fn preferred_names_override_policy_detectors() {
        let policy = Policy {
            detectors: Some(vec!["llm".to_string()]),
            ..Policy::default()
        };
        let preferred = vec!["rules".to_string()];
        let detectors =
            create_detectors(&policy, Vec::new(), Some(&preferred), None).unwrap();
        assert_eq!(detectors.len(), 1);
        assert_eq!(detectors[0].id(), "rules");
    }

    #[test]
    fn llm_without_classifier_is_inactive_but_present() {
        let policy = Policy {
            detectors: Some(vec!["rules".to_string(), "llm".to_string()]),
            ..Policy::default()
        };
        let detectors = create_detectors(&policy, Vec::new(), None, None).unwrap();
        assert_eq!(detectors.len(), 2);
        assert_eq!(detectors[1].id(), "llm");
    }
}
