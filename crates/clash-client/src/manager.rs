//! High-level clash detection operations over either client variant

use std::sync::Arc;
use std::time::{Duration, Instant};

use clash_core::{
    aggregate, AggregatedTestRow, ClashRecord, ClashResultSet, ClashTestSpec, CreatedTest,
    ManualSuppression, NewSuppressionRule, RuleTemplate, SuppressionPlan, SuppressionRule,
    SuppressionRuleUpdate, TestDefinition, TestRunRequest, TestRunStatus, ValidationResult,
    CLASH_SUPPRESS_MAX_PAYLOAD,
};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::client::{ClashServiceClient, ClientKind, ContextIds};
use crate::error::{ClientError, ClientResult};

/// Timings of one bulk create-then-delete round
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRun {
    pub created: usize,
    pub create_elapsed: Duration,
    /// `None` when creation returned no tests to delete
    pub delete_elapsed: Option<Duration>,
}

/// Clash detection operations scoped to one iTwin and iModel
///
/// Written once against [`ClashServiceClient`], so the same code drives
/// both the typed and the raw client.
#[derive(Clone)]
pub struct ClashDetectionManager {
    client: Arc<dyn ClashServiceClient>,
    ctx: ContextIds,
}

impl ClashDetectionManager {
    pub fn new(client: Arc<dyn ClashServiceClient>, ctx: ContextIds) -> Self {
        Self { client, ctx }
    }

    pub fn kind(&self) -> ClientKind {
        self.client.kind()
    }

    pub fn context(&self) -> &ContextIds {
        &self.ctx
    }

    /// Every test of the iModel joined with its most recent result
    pub async fn list_tests(&self) -> ClientResult<Vec<AggregatedTestRow>> {
        let tests = self.client.list_tests(&self.ctx).await?;
        let results = self.client.list_results(&self.ctx).await?;
        debug!(
            client = %self.kind(),
            tests = tests.len(),
            results = results.len(),
            "Aggregating tests with results"
        );
        Ok(aggregate(tests, results))
    }

    pub async fn get_test(&self, test_id: &str) -> ClientResult<TestDefinition> {
        self.client.get_test(&self.ctx, test_id).await
    }

    /// Replace a test's settings with those of `test`
    pub async fn edit_test(&self, test_id: &str, test: &TestDefinition) -> ClientResult<()> {
        let spec = ClashTestSpec::from_definition(test, &self.ctx.imodel_id);
        self.client.update_test(&self.ctx, test_id, &spec).await
    }

    /// Create a copy of a test under a new name
    ///
    /// The test is fetched again first so the copy reflects its current
    /// settings.
    pub async fn copy_test(&self, test_id: &str, name: &str) -> ClientResult<Vec<CreatedTest>> {
        let current = self.client.get_test(&self.ctx, test_id).await?;
        let imodel_id = current
            .tag
            .as_ref()
            .map(|tag| tag.repository_id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.ctx.imodel_id)
            .to_string();
        let spec = ClashTestSpec::from_definition(&current, &imodel_id).renamed(name);
        self.client.create_tests(&self.ctx, &[spec]).await
    }

    /// Create tests from bodies already in the create shape
    pub async fn import_tests(&self, tests: &[ClashTestSpec]) -> ClientResult<Vec<CreatedTest>> {
        self.client.create_tests(&self.ctx, tests).await
    }

    /// Create tests from definitions, bound to the configured iModel
    pub async fn create_tests(&self, tests: &[TestDefinition]) -> ClientResult<Vec<CreatedTest>> {
        let specs: Vec<ClashTestSpec> = tests
            .iter()
            .map(|test| ClashTestSpec::from_definition(test, &self.ctx.imodel_id).renamed(&test.name))
            .collect();
        self.client.create_tests(&self.ctx, &specs).await
    }

    pub async fn delete_tests(&self, test_ids: &[String]) -> ClientResult<()> {
        if test_ids.is_empty() {
            return Ok(());
        }
        self.client.delete_tests(&self.ctx, test_ids).await
    }

    pub async fn run_tests(&self, runs: &[TestRunRequest]) -> ClientResult<Vec<TestRunStatus>> {
        self.client.run_tests(&self.ctx, runs).await
    }

    /// Run one test against a changeset and return the new result id
    pub async fn run_test(&self, test_id: &str, changeset_id: &str) -> ClientResult<String> {
        let run = TestRunRequest {
            imodel_id: self.ctx.imodel_id.clone(),
            changeset_id: changeset_id.to_string(),
            configuration_id: test_id.to_string(),
        };
        self.run_tests(&[run])
            .await?
            .into_iter()
            .next()
            .map(|status| status.result_id)
            .ok_or_else(|| ClientError::no_data("run tests"))
    }

    /// Clash records of a result, with suppressing rules resolved
    ///
    /// Rules that cannot be fetched leave suppressing rules unresolved
    /// rather than failing the whole call.
    pub async fn get_results(&self, result_id: &str) -> ClientResult<ClashResultSet> {
        let rules = match self.suppression_rules(None).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(client = %self.kind(), error = %e, "Suppression rules unavailable");
                Vec::new()
            }
        };

        let mut results = self.client.get_result(&self.ctx, result_id, &rules).await?;
        for clash in &mut results.clashes {
            clash.mark_manual_suppression();
        }
        Ok(results)
    }

    /// Poll result metadata until the result is Completed or Failed
    ///
    /// Other statuses keep the loop going, including cancelled ones. Gives
    /// up after `max_attempts` and returns the last metadata seen.
    pub async fn poll_result(
        &self,
        result_id: &str,
        interval: Duration,
        max_attempts: u32,
    ) -> ClientResult<ValidationResult> {
        let mut last = None;
        for attempt in 1..=max_attempts.max(1) {
            let results = self.client.list_results(&self.ctx).await?;
            if let Some(result) = results.into_iter().find(|r| r.id == result_id) {
                debug!(client = %self.kind(), attempt, status = %result.status, "Polled result");
                if result.status.is_finished() {
                    return Ok(result);
                }
                if !result.status.is_recognized() {
                    warn!(
                        client = %self.kind(),
                        status = %result.status,
                        "Unrecognized result status"
                    );
                } else if result.status.is_terminal() {
                    warn!(
                        client = %self.kind(),
                        status = %result.status,
                        "Result stopped without finishing"
                    );
                }
                last = Some(result);
            }
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }
        last.ok_or_else(|| ClientError::no_data("poll result"))
    }

    pub async fn cancel_results(&self, result_ids: &[String]) -> ClientResult<()> {
        self.client.cancel_jobs(&self.ctx, result_ids).await
    }

    /// Toggle manual suppression of one clash
    pub async fn suppress_clash(&self, clash: &ClashRecord, reason: &str) -> ClientResult<()> {
        self.suppress_clashes(std::slice::from_ref(clash), reason)
            .await
            .map(|_| ())
    }

    /// Toggle manual suppression of many clashes in concurrent chunks
    ///
    /// Returns the number of calls issued. The first failed chunk's error
    /// is returned after every chunk has finished.
    pub async fn suppress_clashes(
        &self,
        clashes: &[ClashRecord],
        reason: &str,
    ) -> ClientResult<usize> {
        let Some(plan) = SuppressionPlan::for_clashes(clashes, reason, CLASH_SUPPRESS_MAX_PAYLOAD)
        else {
            return Ok(0);
        };
        if plan.report_id.is_empty() {
            return Err(ClientError::no_data("suppress"));
        }

        let calls = plan.requests.iter().map(|request| {
            self.client
                .suppress(&self.ctx, &plan.report_id, plan.action, request)
        });
        let outcomes = join_all(calls).await;
        let issued = outcomes.len();
        outcomes.into_iter().collect::<ClientResult<Vec<()>>>()?;

        info!(client = %self.kind(), clashes = clashes.len(), calls = issued, "Suppression sent");
        Ok(issued)
    }

    pub async fn clash_history(&self, clash: &ClashRecord) -> ClientResult<Vec<ManualSuppression>> {
        self.client
            .suppression_history(
                &self.ctx,
                &clash.report_id,
                &clash.element_a_id,
                &clash.element_b_id,
            )
            .await
    }

    pub async fn rule_templates(&self) -> ClientResult<Vec<RuleTemplate>> {
        self.client.list_rule_templates(&self.ctx).await
    }

    /// Suppression rules; an ordered listing comes back newest first
    pub async fn suppression_rules(
        &self,
        order_by: Option<&str>,
    ) -> ClientResult<Vec<SuppressionRule>> {
        let mut rules = self.client.list_suppression_rules(&self.ctx, order_by).await?;
        if order_by.is_some() {
            rules.reverse();
        }
        Ok(rules)
    }

    pub async fn suppression_rule(&self, rule_id: &str) -> ClientResult<SuppressionRule> {
        self.client.get_suppression_rule(&self.ctx, rule_id).await
    }

    /// Create a suppression rule and return its id
    pub async fn add_suppression_rule(&self, rule: &NewSuppressionRule) -> ClientResult<String> {
        let created = self.client.create_suppression_rule(&self.ctx, rule).await?;
        Ok(created.id)
    }

    pub async fn update_suppression_rule(
        &self,
        rule_id: &str,
        update: &SuppressionRuleUpdate,
    ) -> ClientResult<()> {
        self.client
            .update_suppression_rule(&self.ctx, rule_id, update)
            .await
    }

    pub async fn delete_suppression_rule(&self, rule_id: &str) -> ClientResult<()> {
        self.client.delete_suppression_rule(&self.ctx, rule_id).await
    }

    /// Create `count` copies of a test in one call, then delete them in one call
    pub async fn bulk_create_and_delete(
        &self,
        test: &TestDefinition,
        count: usize,
    ) -> ClientResult<BulkRun> {
        let spec = ClashTestSpec::from_definition(test, &self.ctx.imodel_id).renamed(&test.name);
        let specs = vec![spec; count];

        let started = Instant::now();
        let created = self.client.create_tests(&self.ctx, &specs).await?;
        let create_elapsed = started.elapsed();
        info!(
            elapsed_ms = create_elapsed.as_millis() as u64,
            "BulkCreate - {}",
            self.kind()
        );

        if created.is_empty() {
            return Ok(BulkRun {
                created: 0,
                create_elapsed,
                delete_elapsed: None,
            });
        }

        let ids: Vec<String> = created.iter().map(|test| test.id.clone()).collect();
        let started = Instant::now();
        self.client.delete_tests(&self.ctx, &ids).await?;
        let delete_elapsed = started.elapsed();
        info!(
            elapsed_ms = delete_elapsed.as_millis() as u64,
            "BulkDelete - {}",
            self.kind()
        );

        Ok(BulkRun {
            created: ids.len(),
            create_elapsed,
            delete_elapsed: Some(delete_elapsed),
        })
    }
}
