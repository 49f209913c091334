//! The fixed comparison scenario
//!
//! Steps run once each, in order. Values later steps depend on (the test
//! being worked on, a result id, a suppression rule) are carried in
//! [`ScenarioState`] and come from the preferred client's response. A step
//! whose input is missing is skipped; a failed step is recorded and the
//! scenario moves on.

use std::fmt;
use std::sync::Arc;

use clash_client::{
    AccessTokenProvider, ClashDetectionManager, ClientError, ClientKind, ClientResult,
    ContextIds, RcClient, WsgClient,
};
use clash_core::{
    ClashTestSpec, CreatedTest, SuppressionRule, SuppressionRuleUpdate, TestDefinition,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::compare::CompareOptions;
use crate::config::ComparisonConfig;
use crate::driver::{DualMeasurement, Driver, Slot, SlotSummary};

/// Scenario steps, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    GetClashTests,
    GetClashTestById,
    EditClashTest,
    CopyClashTest,
    ImportClashTests,
    CreateClashTests,
    DeleteClashTest,
    RunClashTest,
    PollClashResult,
    GetClashResults,
    GetSuppressionRuleTemplates,
    GetSuppressionRules,
    GetSuppressionRuleById,
    AddSuppressionRule,
    UpdateSuppressionRule,
    DeleteSuppressionRule,
    BulkCreateAndDeleteTests,
}

impl Step {
    pub const ALL: [Step; 17] = [
        Step::GetClashTests,
        Step::GetClashTestById,
        Step::EditClashTest,
        Step::CopyClashTest,
        Step::ImportClashTests,
        Step::CreateClashTests,
        Step::DeleteClashTest,
        Step::RunClashTest,
        Step::PollClashResult,
        Step::GetClashResults,
        Step::GetSuppressionRuleTemplates,
        Step::GetSuppressionRules,
        Step::GetSuppressionRuleById,
        Step::AddSuppressionRule,
        Step::UpdateSuppressionRule,
        Step::DeleteSuppressionRule,
        Step::BulkCreateAndDeleteTests,
    ];

    /// Operation name used in timing logs
    pub fn name(self) -> &'static str {
        match self {
            Step::GetClashTests => "getClashTests",
            Step::GetClashTestById => "getClashTestById",
            Step::EditClashTest => "editClashTest",
            Step::CopyClashTest => "copyClashTest",
            Step::ImportClashTests => "importClashTests",
            Step::CreateClashTests => "createClashTests",
            Step::DeleteClashTest => "deleteClashTest",
            Step::RunClashTest => "runClashTest",
            Step::PollClashResult => "pollClashResult",
            Step::GetClashResults => "getClashResults",
            Step::GetSuppressionRuleTemplates => "getSuppressionRuleTemplates",
            Step::GetSuppressionRules => "getSuppressionRules",
            Step::GetSuppressionRuleById => "getSuppressionRuleById",
            Step::AddSuppressionRule => "addSuppressionRule",
            Step::UpdateSuppressionRule => "updateSuppressionRule",
            Step::DeleteSuppressionRule => "deleteSuppressionRule",
            Step::BulkCreateAndDeleteTests => "bulkCreateAndDeleteTests",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    /// An earlier step did not produce what this one needs
    #[error("{step}: skipped, no {input} available")]
    MissingInput { step: Step, input: &'static str },

    #[error("{step}: {source}")]
    Client {
        step: Step,
        #[source]
        source: ClientError,
    },
}

impl ScenarioError {
    fn client(step: Step) -> impl FnOnce(ClientError) -> Self {
        move |source| Self::Client { step, source }
    }
}

/// Values carried from one step to the next
#[derive(Debug, Clone, Default)]
pub struct ScenarioState {
    pub current_test: Option<TestDefinition>,
    pub second_test: Option<TestDefinition>,
    /// Result the results step fetches
    pub result_id: String,
    /// Result created by the run step
    pub last_run_result_id: Option<String>,
    pub suppression_rule: Option<SuppressionRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Ran,
    Skipped(String),
    Failed(String),
}

/// What one step did, per client
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub step: Step,
    pub outcome: StepOutcome,
    pub rc: SlotSummary,
    pub wsg: SlotSummary,
    /// `None` when outputs were not compared
    pub parity: Option<bool>,
}

impl StepRecord {
    fn ran<T>(step: Step, measurement: &DualMeasurement<T>) -> Self {
        Self {
            step,
            outcome: StepOutcome::Ran,
            rc: measurement.rc.summary(),
            wsg: measurement.wsg.summary(),
            parity: measurement.passed(),
        }
    }

    fn single<T>(step: Step, kind: ClientKind, slot: &Slot<T>) -> Self {
        let (rc, wsg) = match kind {
            ClientKind::Rc => (slot.summary(), SlotSummary::Disabled),
            ClientKind::Wsg => (SlotSummary::Disabled, slot.summary()),
        };
        Self {
            step,
            outcome: StepOutcome::Ran,
            rc,
            wsg,
            parity: None,
        }
    }

    fn without_calls(step: Step, outcome: StepOutcome) -> Self {
        Self {
            step,
            outcome,
            rc: SlotSummary::Disabled,
            wsg: SlotSummary::Disabled,
            parity: None,
        }
    }
}

/// Every step's record, in run order
#[derive(Debug, Clone, Default)]
pub struct ScenarioReport {
    pub steps: Vec<StepRecord>,
}

impl ScenarioReport {
    pub fn step(&self, step: Step) -> Option<&StepRecord> {
        self.steps.iter().find(|record| record.step == step)
    }

    /// Steps whose compared outputs differed
    pub fn mismatches(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|record| record.parity == Some(false))
            .map(|record| record.step)
            .collect()
    }

    pub fn print_summary(&self) {
        println!("\n=== Clash Client Comparison Summary ===");
        println!(
            "{:<30} {:>16} {:>16}  {}",
            "Step", "RC", "WSG", "Parity"
        );

        for record in &self.steps {
            let parity = match (&record.outcome, record.parity) {
                (StepOutcome::Skipped(reason), _) => format!("skipped: {}", reason),
                (StepOutcome::Failed(reason), _) => format!("❌ failed: {}", reason),
                (StepOutcome::Ran, Some(true)) => "✅".to_string(),
                (StepOutcome::Ran, Some(false)) => "❌ mismatch".to_string(),
                (StepOutcome::Ran, None) => "-".to_string(),
            };
            println!(
                "{:<30} {:>16} {:>16}  {}",
                record.step,
                record.rc.to_string(),
                record.wsg.to_string(),
                parity
            );
        }

        let compared = self.steps.iter().filter(|r| r.parity.is_some()).count();
        let mismatched = self.mismatches().len();
        println!();
        println!("Parity: {}/{} compared steps match", compared - mismatched, compared);
    }
}

/// Drives the scenario through both clients
pub struct ScenarioRunner {
    config: ComparisonConfig,
    driver: Driver,
    rc: ClashDetectionManager,
    wsg: ClashDetectionManager,
    state: ScenarioState,
}

impl ScenarioRunner {
    /// Build both clients; only the enabled ones are ever called
    pub fn new(
        config: ComparisonConfig,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> ClientResult<Self> {
        let ctx = ContextIds::new(&config.itwin_id, &config.imodel_id);
        let rc = RcClient::new(config.endpoints.clone(), Arc::clone(&tokens))?;
        let wsg = WsgClient::new(config.endpoints.clone(), tokens)?;
        Ok(Self {
            driver: Driver::from_config(&config),
            rc: ClashDetectionManager::new(Arc::new(rc), ctx.clone()),
            wsg: ClashDetectionManager::new(Arc::new(wsg), ctx),
            state: ScenarioState {
                result_id: config.result_id.clone(),
                ..ScenarioState::default()
            },
            config,
        })
    }

    pub fn state(&self) -> &ScenarioState {
        &self.state
    }

    /// Manager used for setup and cleanup: the first client in call order
    /// Driver for steps that create tests; each client gets new ids
    fn creating_driver(&self) -> Driver {
        self.driver
            .clone()
            .with_compare_options(CompareOptions::new().ignore_field("id"))
    }

    fn primary(&self) -> &ClashDetectionManager {
        match self.driver.order().first() {
            Some(ClientKind::Wsg) => &self.wsg,
            _ => &self.rc,
        }
    }

    /// Run every step and return what each did
    pub async fn run(&mut self) -> ScenarioReport {
        let mut report = ScenarioReport::default();
        for step in Step::ALL {
            if step == Step::PollClashResult && self.config.poll.is_none() {
                continue;
            }

            let record = match self.run_step(step).await {
                Ok(record) => record,
                Err(e @ ScenarioError::MissingInput { .. }) => {
                    info!(step = %step, "{}", e);
                    StepRecord::without_calls(step, StepOutcome::Skipped(e.to_string()))
                }
                Err(e) => {
                    error!(step = %step, context_id = %self.config.itwin_id, "{}", e);
                    StepRecord::without_calls(step, StepOutcome::Failed(e.to_string()))
                }
            };
            report.steps.push(record);
        }
        report
    }

    pub async fn run_step(&mut self, step: Step) -> Result<StepRecord, ScenarioError> {
        match step {
            Step::GetClashTests => self.get_clash_tests().await,
            Step::GetClashTestById => self.get_clash_test_by_id().await,
            Step::EditClashTest => self.edit_clash_test().await,
            Step::CopyClashTest => self.copy_clash_test().await,
            Step::ImportClashTests => self.import_clash_tests().await,
            Step::CreateClashTests => self.create_clash_tests().await,
            Step::DeleteClashTest => self.delete_clash_test().await,
            Step::RunClashTest => self.run_clash_test().await,
            Step::PollClashResult => self.poll_clash_result().await,
            Step::GetClashResults => self.get_clash_results().await,
            Step::GetSuppressionRuleTemplates => self.get_suppression_rule_templates().await,
            Step::GetSuppressionRules => self.get_suppression_rules().await,
            Step::GetSuppressionRuleById => self.get_suppression_rule_by_id().await,
            Step::AddSuppressionRule => self.add_suppression_rule().await,
            Step::UpdateSuppressionRule => self.update_suppression_rule().await,
            Step::DeleteSuppressionRule => self.delete_suppression_rule().await,
            Step::BulkCreateAndDeleteTests => self.bulk_create_and_delete_tests().await,
        }
    }

    fn current_test(&self, step: Step) -> Result<TestDefinition, ScenarioError> {
        self.state
            .current_test
            .clone()
            .ok_or(ScenarioError::MissingInput {
                step,
                input: "clash test",
            })
    }

    async fn get_clash_tests(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::GetClashTests;
        let measurement = self
            .driver
            .execute(step.name(), || self.rc.list_tests(), || self.wsg.list_tests())
            .await;
        let record = StepRecord::ran(step, &measurement);

        if let Some(rows) = measurement.into_preferred() {
            let mut tests = rows.into_iter().map(|row| row.test);
            self.state.current_test = tests.next();
            self.state.second_test = tests.next();
        }
        Ok(record)
    }

    async fn get_clash_test_by_id(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::GetClashTestById;
        let test = self.current_test(step)?;
        let measurement = self
            .driver
            .execute(
                step.name(),
                || self.rc.get_test(&test.id),
                || self.wsg.get_test(&test.id),
            )
            .await;
        let record = StepRecord::ran(step, &measurement);

        if let Some(test) = measurement.into_preferred() {
            self.state.current_test = Some(test);
        }
        Ok(record)
    }

    async fn edit_clash_test(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::EditClashTest;
        let test = self.current_test(step)?;
        let measurement = self
            .driver
            .execute(
                step.name(),
                || self.rc.edit_test(&test.id, &test),
                || self.wsg.edit_test(&test.id, &test),
            )
            .await;
        Ok(StepRecord::ran(step, &measurement))
    }

    async fn copy_clash_test(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::CopyClashTest;
        let test = self.current_test(step)?;
        let name = format!("{} - Imported", test.name);
        let measurement = self
            .creating_driver()
            .execute(
                step.name(),
                || self.rc.copy_test(&test.id, &name),
                || self.wsg.copy_test(&test.id, &name),
            )
            .await;
        self.cleanup_created(step, &measurement).await;
        Ok(StepRecord::ran(step, &measurement))
    }

    async fn import_clash_tests(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::ImportClashTests;
        let test = self.current_test(step)?;
        let specs = [ClashTestSpec::from_definition(&test, &self.config.imodel_id)];
        let measurement = self
            .creating_driver()
            .execute(
                step.name(),
                || self.rc.import_tests(&specs),
                || self.wsg.import_tests(&specs),
            )
            .await;
        self.cleanup_created(step, &measurement).await;
        Ok(StepRecord::ran(step, &measurement))
    }

    async fn create_clash_tests(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::CreateClashTests;
        let tests = [self.current_test(step)?];
        let measurement = self
            .creating_driver()
            .execute(
                step.name(),
                || self.rc.create_tests(&tests),
                || self.wsg.create_tests(&tests),
            )
            .await;
        self.cleanup_created(step, &measurement).await;
        Ok(StepRecord::ran(step, &measurement))
    }

    /// Delete every test a step created, through the primary manager
    async fn cleanup_created(&self, step: Step, measurement: &DualMeasurement<Vec<CreatedTest>>) {
        let ids: Vec<String> = measurement
            .values()
            .flatten()
            .map(|created| created.id.clone())
            .collect();
        if let Err(e) = self.primary().delete_tests(&ids).await {
            warn!(step = %step, error = %e, "Cleanup of created tests failed");
        }
    }

    async fn delete_clash_test(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::DeleteClashTest;
        let tests = [self.current_test(step)?];
        let primary = self.primary();

        let mut ids = Vec::with_capacity(2);
        for _ in 0..2 {
            let created = primary.create_tests(&tests).await.and_then(|created| {
                created
                    .into_iter()
                    .next()
                    .map(|test| test.id)
                    .ok_or_else(|| ClientError::no_data("create tests"))
            });
            match created {
                Ok(id) => ids.push(id),
                Err(source) => {
                    if let Err(e) = primary.delete_tests(&ids).await {
                        warn!(step = %step, error = %e, "Cleanup of created tests failed");
                    }
                    return Err(ScenarioError::Client { step, source });
                }
            }
        }
        let rc_ids = [ids[0].clone()];
        let wsg_ids = [ids[1].clone()];

        let measurement = self
            .driver
            .execute(
                step.name(),
                || self.rc.delete_tests(&rc_ids),
                || self.wsg.delete_tests(&wsg_ids),
            )
            .await;

        let leftover: Vec<String> = [(&measurement.rc, &rc_ids[0]), (&measurement.wsg, &wsg_ids[0])]
            .into_iter()
            .filter(|(slot, _)| slot.value().is_none())
            .map(|(_, id)| id.clone())
            .collect();
        if let Err(e) = self.primary().delete_tests(&leftover).await {
            warn!(step = %step, error = %e, "Cleanup of undeleted tests failed");
        }
        Ok(StepRecord::ran(step, &measurement))
    }

    /// RC runs the current test, WSG the second one
    async fn run_clash_test(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::RunClashTest;
        let first = self.current_test(step)?;
        let second = self.state.second_test.clone().unwrap_or_else(|| first.clone());
        let changeset_id = self.config.changeset_id.clone();

        let measurement = self
            .driver
            .measure(
                step.name(),
                || self.rc.run_test(&first.id, &changeset_id),
                || self.wsg.run_test(&second.id, &changeset_id),
            )
            .await;
        let record = StepRecord::ran(step, &measurement);

        self.state.last_run_result_id = measurement.preferred().cloned();
        if let Some(error) = measurement.into_first_error() {
            return Err(ScenarioError::Client {
                step,
                source: error,
            });
        }
        Ok(record)
    }

    async fn poll_clash_result(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::PollClashResult;
        let Some(poll) = self.config.poll else {
            return Err(ScenarioError::MissingInput {
                step,
                input: "poll settings",
            });
        };
        let result_id = self
            .state
            .last_run_result_id
            .clone()
            .ok_or(ScenarioError::MissingInput {
                step,
                input: "run result",
            })?;

        let primary = self.primary();
        let kind = primary.kind();
        let slot = self
            .driver
            .run(step.name(), kind, || {
                primary.poll_result(&result_id, poll.interval, poll.max_attempts)
            })
            .await;
        let record = StepRecord::single(step, kind, &slot);

        if let Some(result) = slot.into_value() {
            info!(result_id = %result.id, status = %result.status, "Polled run result");
            if result.status.is_finished() {
                self.state.result_id = result.id;
            }
        }
        Ok(record)
    }

    async fn get_clash_results(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::GetClashResults;
        let result_id = self.state.result_id.clone();
        if result_id.is_empty() {
            return Err(ScenarioError::MissingInput {
                step,
                input: "result id",
            });
        }
        let measurement = self
            .driver
            .execute(
                step.name(),
                || self.rc.get_results(&result_id),
                || self.wsg.get_results(&result_id),
            )
            .await;
        Ok(StepRecord::ran(step, &measurement))
    }

    async fn get_suppression_rule_templates(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::GetSuppressionRuleTemplates;
        let measurement = self
            .driver
            .execute(
                step.name(),
                || self.rc.rule_templates(),
                || self.wsg.rule_templates(),
            )
            .await;
        Ok(StepRecord::ran(step, &measurement))
    }

    async fn get_suppression_rules(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::GetSuppressionRules;
        let measurement = self
            .driver
            .execute(
                step.name(),
                || self.rc.suppression_rules(None),
                || self.wsg.suppression_rules(None),
            )
            .await;
        let record = StepRecord::ran(step, &measurement);

        if let Some(rules) = measurement.into_preferred() {
            self.state.suppression_rule = rules.into_iter().next();
        }
        Ok(record)
    }

    async fn get_suppression_rule_by_id(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::GetSuppressionRuleById;
        let rule_id = self
            .state
            .suppression_rule
            .as_ref()
            .map(|rule| rule.id.clone())
            .ok_or(ScenarioError::MissingInput {
                step,
                input: "suppression rule",
            })?;
        let measurement = self
            .driver
            .execute(
                step.name(),
                || self.rc.suppression_rule(&rule_id),
                || self.wsg.suppression_rule(&rule_id),
            )
            .await;
        Ok(StepRecord::ran(step, &measurement))
    }

    async fn add_suppression_rule(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::AddSuppressionRule;
        let rule = &self.config.suppression_rule;
        let measurement = self
            .driver
            .measure(
                step.name(),
                || self.rc.add_suppression_rule(rule),
                || self.wsg.add_suppression_rule(rule),
            )
            .await;

        for rule_id in measurement.values() {
            self.delete_rule_quietly(step, rule_id).await;
        }
        Ok(StepRecord::ran(step, &measurement))
    }

    async fn update_suppression_rule(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::UpdateSuppressionRule;
        let rule = &self.config.suppression_rule;
        let rule_id = self
            .primary()
            .add_suppression_rule(rule)
            .await
            .map_err(ScenarioError::client(step))?;

        let mut update = SuppressionRuleUpdate::from(rule);
        update.name = format!("{}-edited", rule.name);
        let measurement = self
            .driver
            .execute(
                step.name(),
                || self.rc.update_suppression_rule(&rule_id, &update),
                || self.wsg.update_suppression_rule(&rule_id, &update),
            )
            .await;

        self.delete_rule_quietly(step, &rule_id).await;
        Ok(StepRecord::ran(step, &measurement))
    }

    async fn delete_suppression_rule(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::DeleteSuppressionRule;
        let rule = &self.config.suppression_rule;
        let primary = self.primary();
        let rc_rule = primary
            .add_suppression_rule(rule)
            .await
            .map_err(ScenarioError::client(step))?;
        let wsg_rule = match primary.add_suppression_rule(rule).await {
            Ok(rule_id) => rule_id,
            Err(source) => {
                self.delete_rule_quietly(step, &rc_rule).await;
                return Err(ScenarioError::Client { step, source });
            }
        };

        let measurement = self
            .driver
            .execute(
                step.name(),
                || self.rc.delete_suppression_rule(&rc_rule),
                || self.wsg.delete_suppression_rule(&wsg_rule),
            )
            .await;

        if measurement.rc.value().is_none() {
            self.delete_rule_quietly(step, &rc_rule).await;
        }
        if measurement.wsg.value().is_none() {
            self.delete_rule_quietly(step, &wsg_rule).await;
        }
        Ok(StepRecord::ran(step, &measurement))
    }

    async fn delete_rule_quietly(&self, step: Step, rule_id: &str) {
        if let Err(e) = self.primary().delete_suppression_rule(rule_id).await {
            warn!(step = %step, rule_id, error = %e, "Cleanup of suppression rule failed");
        }
    }

    async fn bulk_create_and_delete_tests(&mut self) -> Result<StepRecord, ScenarioError> {
        let step = Step::BulkCreateAndDeleteTests;
        let test = self.current_test(step)?;
        let count = self.config.bulk_count;
        let measurement = self
            .driver
            .measure(
                step.name(),
                || self.rc.bulk_create_and_delete(&test, count),
                || self.wsg.bulk_create_and_delete(&test, count),
            )
            .await;
        Ok(StepRecord::ran(step, &measurement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names_are_unique_and_ordered() {
        let names: Vec<&str> = Step::ALL.iter().map(|step| step.name()).collect();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
        assert_eq!(names.first(), Some(&"getClashTests"));
        assert_eq!(names.last(), Some(&"bulkCreateAndDeleteTests"));
    }

    #[test]
    fn test_report_mismatches() {
        let record = |step, parity| StepRecord {
            step,
            outcome: StepOutcome::Ran,
            rc: SlotSummary::Disabled,
            wsg: SlotSummary::Disabled,
            parity,
        };
        let report = ScenarioReport {
            steps: vec![
                record(Step::GetClashTests, Some(true)),
                record(Step::GetClashResults, Some(false)),
                record(Step::AddSuppressionRule, None),
            ],
        };
        assert_eq!(report.mismatches(), vec![Step::GetClashResults]);
        assert!(report.step(Step::AddSuppressionRule).is_some());
        assert!(report.step(Step::RunClashTest).is_none());
    }
}
