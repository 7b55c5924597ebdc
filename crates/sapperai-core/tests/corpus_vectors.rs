#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Fixture-corpus pipeline tests: realistic benign traffic must pass
//! untouched while a broad attack corpus is overwhelmingly blocked.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use sapperai_core::{
    Action, AssessmentContext, DecisionEngine, Policy, RulesDetector, ToolCall, ToolResult,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fixture {
    kind: String,
    tool_call: FixtureCall,
    #[serde(default)]
    tool_result: Option<FixtureResult>,
    expected: String,
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixtureCall {
    tool_name: String,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct FixtureResult {
    content: Value,
}

fn load_fixtures(raw: &str) -> Vec<Fixture> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("valid fixture line"))
        .collect()
}

fn context_for(fixture: &Fixture, policy: Policy) -> AssessmentContext {
    let call = ToolCall::new(
        fixture.tool_call.tool_name.clone(),
        fixture.tool_call.arguments.clone(),
    );
    match fixture.kind.as_str() {
        "pre_tool_call" => AssessmentContext::pre_tool_call(call, policy),
        "post_tool_result" => {
            let result = fixture
                .tool_result
                .as_ref()
                .expect("post_tool_result fixture carries a result");
            AssessmentContext::post_tool_result(
                call,
                ToolResult::new(result.content.clone()),
                policy,
            )
        }
        other => panic!("unknown fixture kind: {other}"),
    }
}

fn rules_engine() -> DecisionEngine {
    DecisionEngine::new(vec![Arc::new(RulesDetector::new().unwrap())])
}

#[tokio::test]
async fn benign_corpus_yields_zero_blocks_under_enforce() {
    let fixtures = load_fixtures(include_str!("fixtures/benign-100.jsonl"));
    assert_eq!(fixtures.len(), 100);

    let engine = rules_engine();
    let mut blocked = Vec::new();
    for fixture in &fixtures {
        let decision = engine.assess(&context_for(fixture, Policy::default())).await;
        if decision.action == Action::Block {
            blocked.push(fixture.label.clone());
        }
    }

    assert!(blocked.is_empty(), "false positives: {blocked:?}");
}

#[tokio::test]
async fn attack_corpus_detection_rate_is_at_least_80_percent() {
    let fixtures = load_fixtures(include_str!("fixtures/malicious-50.jsonl"));
    assert_eq!(fixtures.len(), 50);

    let engine = rules_engine();
    let mut blocked = 0usize;
    for fixture in &fixtures {
        let decision = engine.assess(&context_for(fixture, Policy::default())).await;
        if decision.action == Action::Block {
            blocked += 1;
        }
    }

    let rate = blocked as f64 / fixtures.len() as f64;
    assert!(
        rate >= 0.8,
        "detection rate {rate:.2} below floor ({blocked}/{} blocked)",
        fixtures.len()
    );
}

#[tokio::test]
async fn edge_cases_match_their_expected_verdicts() {
    let fixtures = load_fixtures(include_str!("fixtures/edge-cases-20.jsonl"));
    assert_eq!(fixtures.len(), 20);

    let engine = rules_engine();
    for fixture in &fixtures {
        let decision = engine.assess(&context_for(fixture, Policy::default())).await;
        let expected = match fixture.expected.as_str() {
            "allow" => Action::Allow,
            "block" => Action::Block,
            other => panic!("unknown expected verdict: {other}"),
        };
        assert_eq!(
            decision.action, expected,
            "fixture {} (risk {:.2}, reasons {:?})",
            fixture.label, decision.risk, decision.reasons
        );
    }
}
