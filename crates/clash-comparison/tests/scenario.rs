//! The full scenario against the in-process stub services

use std::collections::HashMap;
use std::sync::Arc;

use clash_client::StaticToken;
use clash_comparison::{
    ComparisonConfig, ScenarioError, ScenarioRunner, SlotSummary, Step, StepOutcome,
};
use clash_stub::{fixtures, StubServer};
use serde_json::json;

const ITWIN: &str = "itwin-1";
const IMODEL: &str = "imodel-1";

fn config(stub: &StubServer, extra: &[(&str, &str)]) -> ComparisonConfig {
    let mut vars: HashMap<String, String> = [
        ("CLASH_RMS_URL", stub.base_url()),
        ("CLASH_RAS_URL", stub.base_url()),
        ("CLASH_ITWIN_ID", ITWIN),
        ("CLASH_IMODEL_ID", IMODEL),
        ("CLASH_RESULT_ID", "res-1"),
        ("CLASH_BULK_COUNT", "3"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    ComparisonConfig::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

fn runner(config: ComparisonConfig) -> ScenarioRunner {
    ScenarioRunner::new(config, Arc::new(StaticToken::new("test-token"))).unwrap()
}

async fn seeded_stub() -> StubServer {
    let stub = StubServer::start().await.unwrap();
    let first = stub.seed_test(fixtures::test_row("Walls vs ducts", IMODEL));
    stub.seed_test(fixtures::test_row("Pipes vs beams", IMODEL));
    stub.seed_rule(fixtures::suppression_rule_row("rule-1", "Ignore boxes"));
    stub.seed_template(fixtures::rule_template_row("tpl-1", "Like expression"));
    // An older changeset, so the in-place run does not replace it
    let mut metadata =
        fixtures::result_metadata("res-1", &first, IMODEL, "2024-03-05T10:00:00Z", [5, 2, 1, 1, 0, 0]);
    metadata["changesetId"] = json!("4b1f0c1e9e2a7d3c5f6a8b9c0d1e2f3a4b5c6d7e");
    stub.seed_result(metadata, Some(fixtures::result_body(3, "report-1")));
    stub.set_run_body(fixtures::result_body(2, "report-2"));
    stub
}

#[tokio::test]
async fn test_full_scenario_runs_every_step_and_cleans_up() {
    let stub = seeded_stub().await;
    let mut runner = runner(config(&stub, &[]));

    let report = runner.run().await;

    let ran: Vec<Step> = report.steps.iter().map(|record| record.step).collect();
    let expected: Vec<Step> = Step::ALL
        .into_iter()
        .filter(|step| *step != Step::PollClashResult)
        .collect();
    assert_eq!(ran, expected);
    for record in &report.steps {
        assert_eq!(record.outcome, StepOutcome::Ran, "{}", record.step);
        assert!(
            matches!(record.rc, SlotSummary::Completed(_)),
            "{} RC: {:?}",
            record.step,
            record.rc
        );
        assert!(
            matches!(record.wsg, SlotSummary::Completed(_)),
            "{} WSG: {:?}",
            record.step,
            record.wsg
        );
    }

    for step in [
        Step::GetClashTests,
        Step::GetClashResults,
        Step::GetSuppressionRuleTemplates,
        Step::GetSuppressionRules,
    ] {
        assert_eq!(report.step(step).unwrap().parity, Some(true), "{}", step);
    }

    // Everything the scenario created was deleted again
    assert_eq!(stub.tests().len(), 2);
    assert_eq!(stub.rules().len(), 1);

    // RC ran the first test, WSG the second
    let runs = stub.requests_for("run tests");
    assert_eq!(runs.len(), 2);
    let configs: Vec<&str> = runs
        .iter()
        .filter_map(|r| r.body.as_ref()?[0]["configurationId"].as_str())
        .collect();
    assert_ne!(configs[0], configs[1]);
}

#[tokio::test]
async fn test_polled_run_result_is_fetched() {
    let stub = seeded_stub().await;
    let mut runner = runner(config(
        &stub,
        &[("CLASH_POLL", "true"), ("CLASH_POLL_INTERVAL_SECS", "0")],
    ));

    let report = runner.run().await;

    assert_eq!(
        report.step(Step::PollClashResult).unwrap().outcome,
        StepOutcome::Ran
    );
    let state = runner.state();
    assert_eq!(Some(&state.result_id), state.last_run_result_id.as_ref());
    assert_eq!(
        stub.requests_for("result by id")
            .iter()
            .filter(|r| r.path.ends_with(&state.result_id))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_call_order_follows_policy() {
    for (order, rc_first) in [("rc-first", true), ("wsg-first", false), ("independent", true)] {
        let stub = seeded_stub().await;
        let mut runner = runner(config(&stub, &[("CLASH_ORDER", order)]));

        runner.run_step(Step::GetClashTests).await.unwrap();

        let requests = stub.requests_for("list tests");
        assert_eq!(requests.len(), 2, "{}", order);
        // RC pages through query parameters, WSG through headers
        assert_eq!(
            requests[0].query.contains_key("pageSize"),
            rc_first,
            "{}",
            order
        );
        assert_eq!(requests[1].header("pageSize").is_some(), rc_first, "{}", order);
    }
}

#[tokio::test]
async fn test_disabled_client_is_never_called() {
    let stub = seeded_stub().await;
    let mut runner = runner(config(&stub, &[("CLASH_CALL_WSG", "false")]));

    let record = runner.run_step(Step::GetClashTests).await.unwrap();

    assert_eq!(record.wsg, SlotSummary::Disabled);
    assert_eq!(record.parity, None);
    let requests = stub.requests_for("list tests");
    assert_eq!(requests.len(), 1);
    assert!(requests[0].query.contains_key("pageSize"));
    assert!(runner.state().current_test.is_some());
}

#[tokio::test]
async fn test_failed_run_is_recorded_and_scenario_continues() {
    let stub = seeded_stub().await;
    stub.fail("run tests", 503);
    let mut runner = runner(config(&stub, &[]));

    let report = runner.run().await;

    // Both clients were tried even though the first one failed
    assert_eq!(stub.requests_for("run tests").len(), 2);
    assert!(matches!(
        report.step(Step::RunClashTest).unwrap().outcome,
        StepOutcome::Failed(_)
    ));
    assert_eq!(
        report.step(Step::BulkCreateAndDeleteTests).unwrap().outcome,
        StepOutcome::Ran
    );
}

#[tokio::test]
async fn test_dependent_steps_skip_without_inputs() {
    let stub = StubServer::start().await.unwrap();
    let mut runner = runner(config(&stub, &[]));

    let report = runner.run().await;

    assert_eq!(
        report.step(Step::GetClashTests).unwrap().outcome,
        StepOutcome::Ran
    );
    for step in [
        Step::GetClashTestById,
        Step::EditClashTest,
        Step::CopyClashTest,
        Step::DeleteClashTest,
        Step::RunClashTest,
        Step::GetSuppressionRuleById,
        Step::BulkCreateAndDeleteTests,
    ] {
        assert!(
            matches!(report.step(step).unwrap().outcome, StepOutcome::Skipped(_)),
            "{} was not skipped",
            step
        );
    }
    assert!(stub.requests_for("get test").is_empty());
    assert!(stub.requests_for("run tests").is_empty());

    // The configured result does not exist: both calls fail, the step still ran
    let results = report.step(Step::GetClashResults).unwrap();
    assert_eq!(results.outcome, StepOutcome::Ran);
    assert!(matches!(results.rc, SlotSummary::Failed { .. }));
    assert!(matches!(results.wsg, SlotSummary::Failed { .. }));
}

#[tokio::test]
async fn test_cancelled_run_is_not_taken_as_finished() {
    let stub = seeded_stub().await;
    let mut runner = runner(config(
        &stub,
        &[
            ("CLASH_POLL", "true"),
            ("CLASH_POLL_INTERVAL_SECS", "0"),
            ("CLASH_POLL_MAX_ATTEMPTS", "3"),
        ],
    ));
    runner.run_step(Step::GetClashTests).await.unwrap();
    runner.run_step(Step::RunClashTest).await.unwrap();
    let run_id = runner.state().last_run_result_id.clone().unwrap();
    stub.set_result_status(&run_id, 7);
    stub.clear_requests();

    let record = runner.run_step(Step::PollClashResult).await.unwrap();

    assert_eq!(record.outcome, StepOutcome::Ran);
    assert_eq!(stub.requests_for("list results").len(), 3);
    // The configured result stays the one the results step fetches
    assert_eq!(runner.state().result_id, "res-1");
}

#[tokio::test]
async fn test_failed_second_test_create_removes_the_first() {
    let stub = seeded_stub().await;
    let mut runner = runner(config(&stub, &[]));
    runner.run_step(Step::GetClashTests).await.unwrap();
    stub.fail_after("create tests", 1, 500);

    let error = runner.run_step(Step::DeleteClashTest).await.unwrap_err();

    assert!(matches!(
        error,
        ScenarioError::Client {
            step: Step::DeleteClashTest,
            ..
        }
    ));
    assert_eq!(stub.requests_for("create tests").len(), 2);
    assert_eq!(stub.requests_for("delete tests").len(), 1);
    assert_eq!(stub.tests().len(), 2);
}

#[tokio::test]
async fn test_failed_second_rule_create_removes_the_first() {
    let stub = seeded_stub().await;
    let mut runner = runner(config(&stub, &[]));
    stub.fail_after("create suppression rule", 1, 500);

    let error = runner.run_step(Step::DeleteSuppressionRule).await.unwrap_err();

    assert!(matches!(
        error,
        ScenarioError::Client {
            step: Step::DeleteSuppressionRule,
            ..
        }
    ));
    assert_eq!(stub.requests_for("create suppression rule").len(), 2);
    assert_eq!(stub.requests_for("delete suppression rule").len(), 1);
    assert_eq!(stub.rules().len(), 1);
}

#[tokio::test]
async fn test_created_tests_compare_without_ids() {
    let stub = seeded_stub().await;
    let mut runner = runner(config(&stub, &[]));
    runner.run_step(Step::GetClashTests).await.unwrap();

    for step in [Step::CopyClashTest, Step::ImportClashTests, Step::CreateClashTests] {
        let record = runner.run_step(step).await.unwrap();
        assert_eq!(record.parity, Some(true), "{}", step);
    }
    assert_eq!(stub.tests().len(), 2);
}
