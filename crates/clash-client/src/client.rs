//! The contract both client variants implement

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use clash_core::{
    ClashResultSet, ClashTestSpec, CreatedTest, ManualSuppression, NewSuppressionRule,
    RuleTemplate, SuppressAction, SuppressionRequest, SuppressionRule, SuppressionRuleUpdate,
    TestDefinition, TestRunRequest, TestRunStatus, ValidationResult,
};

use crate::error::ClientResult;

/// Page size requested from the rule service
///
/// Without it the service returns 10 rows per page.
pub const RMS_DEFAULT_PAGE_SIZE: u32 = 1000;

/// Page size requested from the results service
pub const RAS_DEFAULT_PAGE_SIZE: u32 = 100;

/// Page size requested for rule templates
pub const RULE_TEMPLATE_PAGE_SIZE: u32 = 50;

/// Rule template type for clash suppression rules
pub const CLASH_RULE_TEMPLATE_TYPE: &str = "2";

/// Most manual suppression history entries fetched per clash pair
pub const SUPPRESSION_HISTORY_TOP: u32 = 100;

/// Which client variant produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// Typed REST client
    Rc,
    /// Raw web-service-gateway style client
    Wsg,
}

impl ClientKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Rc => "RC",
            Self::Wsg => "WSG",
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The iTwin (context) and iModel (repository) every call is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextIds {
    pub itwin_id: String,
    pub imodel_id: String,
}

impl ContextIds {
    pub fn new(itwin_id: impl Into<String>, imodel_id: impl Into<String>) -> Self {
        Self {
            itwin_id: itwin_id.into(),
            imodel_id: imodel_id.into(),
        }
    }
}

/// Base URLs and request timeouts of the two upstream services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    /// Rule management service
    pub rms_url: String,
    /// Results analysis service
    pub ras_url: String,
    pub rms_timeout: Duration,
    pub ras_timeout: Duration,
}

impl ServiceEndpoints {
    pub const DEFAULT_RMS_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DEFAULT_RAS_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(rms_url: &str, ras_url: &str) -> Self {
        Self {
            rms_url: rms_url.trim_end_matches('/').to_string(),
            ras_url: ras_url.trim_end_matches('/').to_string(),
            rms_timeout: Self::DEFAULT_RMS_TIMEOUT,
            ras_timeout: Self::DEFAULT_RAS_TIMEOUT,
        }
    }

    /// Hosted services, with an optional environment prefix such as `qa-`
    pub fn hosted(url_prefix: &str) -> Self {
        Self::new(
            &format!(
                "https://{}connect-designvalidationrulemanagement.bentley.com",
                url_prefix
            ),
            &format!(
                "https://{}connect-resultsanalysisservice.bentley.com",
                url_prefix
            ),
        )
    }

    pub fn with_timeouts(mut self, rms_timeout: Duration, ras_timeout: Duration) -> Self {
        self.rms_timeout = rms_timeout;
        self.ras_timeout = ras_timeout;
        self
    }

    pub(crate) fn tests_url(&self, itwin_id: &str) -> String {
        format!("{}/v3/contexts/{}/tests", self.rms_url, itwin_id)
    }

    pub(crate) fn test_url(&self, itwin_id: &str, test_id: &str) -> String {
        format!("{}/{}", self.tests_url(itwin_id), test_id)
    }

    pub(crate) fn run_url(&self, itwin_id: &str) -> String {
        format!("{}/run", self.tests_url(itwin_id))
    }

    pub(crate) fn rule_templates_url(&self, itwin_id: &str) -> String {
        format!("{}/v3/contexts/{}/ruletemplates", self.rms_url, itwin_id)
    }

    pub(crate) fn suppression_rules_url(&self, itwin_id: &str) -> String {
        format!("{}/v3/contexts/{}/suppressionrules", self.rms_url, itwin_id)
    }

    pub(crate) fn suppression_rule_url(&self, itwin_id: &str, rule_id: &str) -> String {
        format!("{}/{}", self.suppression_rules_url(itwin_id), rule_id)
    }

    pub(crate) fn results_url(&self) -> String {
        format!("{}/v2/results", self.ras_url)
    }

    pub(crate) fn result_url(&self, result_id: &str) -> String {
        format!("{}/{}", self.results_url(), result_id)
    }

    pub(crate) fn cancel_jobs_url(&self) -> String {
        format!("{}/canceljobs", self.results_url())
    }

    pub(crate) fn suppress_url(&self) -> String {
        format!("{}/2/suppress", self.results_url())
    }
}

/// Operations both client variants provide against the rule and results services
///
/// Every method returns canonical records. A failed or empty upstream call
/// comes back as an error value the caller must handle.
#[async_trait]
pub trait ClashServiceClient: Send + Sync {
    /// Which variant this is, for logs and measurements
    fn kind(&self) -> ClientKind;

    /// All clash tests bound to the context's iModel, every page concatenated
    async fn list_tests(&self, ctx: &ContextIds) -> ClientResult<Vec<TestDefinition>>;

    async fn get_test(&self, ctx: &ContextIds, test_id: &str) -> ClientResult<TestDefinition>;

    async fn create_tests(
        &self,
        ctx: &ContextIds,
        tests: &[ClashTestSpec],
    ) -> ClientResult<Vec<CreatedTest>>;

    async fn update_test(
        &self,
        ctx: &ContextIds,
        test_id: &str,
        test: &ClashTestSpec,
    ) -> ClientResult<()>;

    async fn delete_tests(&self, ctx: &ContextIds, test_ids: &[String]) -> ClientResult<()>;

    /// Start runs in place, replacing any result of the same changeset
    async fn run_tests(
        &self,
        ctx: &ContextIds,
        runs: &[TestRunRequest],
    ) -> ClientResult<Vec<TestRunStatus>>;

    async fn list_rule_templates(&self, ctx: &ContextIds) -> ClientResult<Vec<RuleTemplate>>;

    async fn list_suppression_rules(
        &self,
        ctx: &ContextIds,
        order_by: Option<&str>,
    ) -> ClientResult<Vec<SuppressionRule>>;

    async fn get_suppression_rule(
        &self,
        ctx: &ContextIds,
        rule_id: &str,
    ) -> ClientResult<SuppressionRule>;

    async fn create_suppression_rule(
        &self,
        ctx: &ContextIds,
        rule: &NewSuppressionRule,
    ) -> ClientResult<SuppressionRule>;

    async fn update_suppression_rule(
        &self,
        ctx: &ContextIds,
        rule_id: &str,
        update: &SuppressionRuleUpdate,
    ) -> ClientResult<()>;

    async fn delete_suppression_rule(&self, ctx: &ContextIds, rule_id: &str) -> ClientResult<()>;

    /// Metadata of every result in the context's iModel, every page concatenated
    async fn list_results(&self, ctx: &ContextIds) -> ClientResult<Vec<ValidationResult>>;

    /// Clash records of one result; suppressing rules resolve against `rules`
    async fn get_result(
        &self,
        ctx: &ContextIds,
        result_id: &str,
        rules: &[SuppressionRule],
    ) -> ClientResult<ClashResultSet>;

    async fn cancel_jobs(&self, ctx: &ContextIds, result_ids: &[String]) -> ClientResult<()>;

    /// Send one chunk of manual suppression changes for a clash report
    async fn suppress(
        &self,
        ctx: &ContextIds,
        report_id: &str,
        action: SuppressAction,
        request: &SuppressionRequest,
    ) -> ClientResult<()>;

    async fn suppression_history(
        &self,
        ctx: &ContextIds,
        report_id: &str,
        element_a_id: &str,
        element_b_id: &str,
    ) -> ClientResult<Vec<ManualSuppression>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let endpoints = ServiceEndpoints::new("http://rms/", "http://ras");
        assert_eq!(endpoints.tests_url("c1"), "http://rms/v3/contexts/c1/tests");
        assert_eq!(endpoints.run_url("c1"), "http://rms/v3/contexts/c1/tests/run");
        assert_eq!(
            endpoints.suppression_rule_url("c1", "r1"),
            "http://rms/v3/contexts/c1/suppressionrules/r1"
        );
        assert_eq!(endpoints.result_url("x"), "http://ras/v2/results/x");
        assert_eq!(endpoints.suppress_url(), "http://ras/v2/results/2/suppress");
    }

    #[test]
    fn test_hosted_prefix() {
        let endpoints = ServiceEndpoints::hosted("qa-");
        assert_eq!(
            endpoints.rms_url,
            "https://qa-connect-designvalidationrulemanagement.bentley.com"
        );
        assert_eq!(
            endpoints.ras_url,
            "https://qa-connect-resultsanalysisservice.bentley.com"
        );
    }
}
