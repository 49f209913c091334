//! Raw web-service-gateway style client
//!
//! Every URL and header is assembled here by hand and continuation loops
//! are driven manually. Bodies are read as untyped JSON and normalized by
//! [`normalize`].

pub mod normalize;
pub mod transport;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clash_core::{
    ClashResultSet, ClashTestSpec, CreatedTest, ManualSuppression, NewSuppressionRule,
    RuleTemplate, SuppressAction, SuppressionRequest, SuppressionRule, SuppressionRuleUpdate,
    TestDefinition, TestRunRequest, TestRunStatus, ValidationResult,
};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::client::{
    ClashServiceClient, ClientKind, ContextIds, ServiceEndpoints, CLASH_RULE_TEMPLATE_TYPE,
    RAS_DEFAULT_PAGE_SIZE, RMS_DEFAULT_PAGE_SIZE, RULE_TEMPLATE_PAGE_SIZE,
    SUPPRESSION_HISTORY_TOP,
};
use crate::error::{ClientError, ClientResult};
use crate::token::{authorization_value, AccessTokenProvider};

use transport::{ApiResponse, HttpRequester, RequestOptions};

/// Which service a request goes to, for its timeout
#[derive(Debug, Clone, Copy)]
enum Service {
    Rms,
    Ras,
}

pub struct WsgClient {
    http: HttpRequester,
    endpoints: ServiceEndpoints,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl WsgClient {
    pub fn new(
        endpoints: ServiceEndpoints,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> ClientResult<Self> {
        Ok(Self {
            http: HttpRequester::new()?,
            endpoints,
            tokens,
        })
    }

    fn timeout(&self, service: Service) -> Duration {
        match service {
            Service::Rms => self.endpoints.rms_timeout,
            Service::Ras => self.endpoints.ras_timeout,
        }
    }

    /// Base options every call carries: JSON content type and bearer token
    async fn options(&self, method: Method, service: Service) -> ClientResult<RequestOptions> {
        let token = self.tokens.access_token().await?;
        Ok(RequestOptions::new(method, self.timeout(service))
            .header("Content-Type", "application/json")
            .header("Authorization", authorization_value(&token)))
    }

    async fn send(
        &self,
        operation: &str,
        url: &str,
        options: RequestOptions,
    ) -> ClientResult<ApiResponse> {
        self.http.request(operation, url, options).await
    }

    /// Follow continuation tokens until the service reports no more data
    ///
    /// The first request carries an empty `continuationToken` header; each
    /// page's token is copied into the next request. A token seen before
    /// fails the call.
    async fn get_all_rows(
        &self,
        operation: &str,
        url: &str,
        mut options: RequestOptions,
        page_size: u32,
    ) -> ClientResult<Vec<Value>> {
        options.set_header("pageSize", page_size.to_string());
        options.set_header("continuationToken", "");

        let mut rows = Vec::new();
        let mut pages = 0usize;
        let mut seen = HashSet::from([String::new()]);
        loop {
            let response = self.send(operation, url, options.clone()).await?;
            let body = response.json(operation)?;
            rows.extend(normalize::page_rows(body));
            pages += 1;

            match normalize::next_token(body) {
                Some(token) if !seen.insert(token.clone()) => {
                    return Err(ClientError::parse(operation, "continuation token repeated"));
                }
                Some(token) => options.set_header("continuationToken", token),
                None => break,
            }
        }
        debug!(operation, pages, rows = rows.len(), "WSG pages collected");
        Ok(rows)
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        url: &str,
        options: RequestOptions,
        body: &B,
    ) -> ClientResult<ApiResponse> {
        let body =
            serde_json::to_value(body).map_err(|e| ClientError::parse(operation, e))?;
        self.send(operation, url, options.body(body)).await
    }
}

#[async_trait]
impl ClashServiceClient for WsgClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Wsg
    }

    async fn list_tests(&self, ctx: &ContextIds) -> ClientResult<Vec<TestDefinition>> {
        let url = format!(
            "{}?repositoryId={}&includeRulesCount=true",
            self.endpoints.tests_url(&ctx.itwin_id),
            ctx.imodel_id
        );
        let options = self.options(Method::GET, Service::Rms).await?;
        self.get_all_rows("list tests", &url, options, RMS_DEFAULT_PAGE_SIZE)
            .await?
            .iter()
            .map(|row| normalize::test_definition(&ctx.itwin_id, row))
            .collect()
    }

    async fn get_test(&self, ctx: &ContextIds, test_id: &str) -> ClientResult<TestDefinition> {
        let url = self.endpoints.test_url(&ctx.itwin_id, test_id);
        let options = self.options(Method::GET, Service::Rms).await?;
        let response = self.send("get test", &url, options).await?;
        normalize::test_definition(&ctx.itwin_id, response.json("get test")?)
    }

    async fn create_tests(
        &self,
        ctx: &ContextIds,
        tests: &[ClashTestSpec],
    ) -> ClientResult<Vec<CreatedTest>> {
        let url = self.endpoints.tests_url(&ctx.itwin_id);
        let options = self.options(Method::POST, Service::Rms).await?;
        let response = self.send_json("create tests", &url, options, tests).await?;
        normalize::created_tests(response.json("create tests")?)
    }

    async fn update_test(
        &self,
        ctx: &ContextIds,
        test_id: &str,
        test: &ClashTestSpec,
    ) -> ClientResult<()> {
        let url = self.endpoints.test_url(&ctx.itwin_id, test_id);
        let options = self.options(Method::PUT, Service::Rms).await?;
        self.send_json("update test", &url, options, test).await?;
        Ok(())
    }

    async fn delete_tests(&self, ctx: &ContextIds, test_ids: &[String]) -> ClientResult<()> {
        let url = self.endpoints.tests_url(&ctx.itwin_id);
        let options = self.options(Method::PATCH, Service::Rms).await?;
        self.send_json("delete tests", &url, options, test_ids)
            .await?;
        Ok(())
    }

    async fn run_tests(
        &self,
        ctx: &ContextIds,
        runs: &[TestRunRequest],
    ) -> ClientResult<Vec<TestRunStatus>> {
        let url = self.endpoints.run_url(&ctx.itwin_id);
        let options = self
            .options(Method::POST, Service::Rms)
            .await?
            .header("In-Place", "force");
        let response = self.send_json("run tests", &url, options, runs).await?;
        normalize::run_statuses(response.json("run tests")?)
    }

    async fn list_rule_templates(&self, ctx: &ContextIds) -> ClientResult<Vec<RuleTemplate>> {
        let url = format!(
            "{}?type={}",
            self.endpoints.rule_templates_url(&ctx.itwin_id),
            CLASH_RULE_TEMPLATE_TYPE
        );
        let options = self.options(Method::GET, Service::Rms).await?;
        self.get_all_rows("list rule templates", &url, options, RULE_TEMPLATE_PAGE_SIZE)
            .await?
            .iter()
            .map(normalize::rule_template)
            .collect()
    }

    async fn list_suppression_rules(
        &self,
        ctx: &ContextIds,
        order_by: Option<&str>,
    ) -> ClientResult<Vec<SuppressionRule>> {
        let mut url = self.endpoints.suppression_rules_url(&ctx.itwin_id);
        if let Some(order_by) = order_by {
            url = format!("{}?orderBy={}", url, order_by);
        }
        let options = self.options(Method::GET, Service::Rms).await?;
        self.get_all_rows("list suppression rules", &url, options, RMS_DEFAULT_PAGE_SIZE)
            .await?
            .iter()
            .map(normalize::suppression_rule)
            .collect()
    }

    async fn get_suppression_rule(
        &self,
        ctx: &ContextIds,
        rule_id: &str,
    ) -> ClientResult<SuppressionRule> {
        let url = self.endpoints.suppression_rule_url(&ctx.itwin_id, rule_id);
        let options = self.options(Method::GET, Service::Rms).await?;
        let response = self.send("get suppression rule", &url, options).await?;
        normalize::suppression_rule(response.json("get suppression rule")?)
    }

    async fn create_suppression_rule(
        &self,
        ctx: &ContextIds,
        rule: &NewSuppressionRule,
    ) -> ClientResult<SuppressionRule> {
        let url = self.endpoints.suppression_rules_url(&ctx.itwin_id);
        let options = self.options(Method::POST, Service::Rms).await?;
        let response = self
            .send_json("create suppression rule", &url, options, rule)
            .await?;
        normalize::suppression_rule(response.json("create suppression rule")?)
    }

    async fn update_suppression_rule(
        &self,
        ctx: &ContextIds,
        rule_id: &str,
        update: &SuppressionRuleUpdate,
    ) -> ClientResult<()> {
        let url = self.endpoints.suppression_rule_url(&ctx.itwin_id, rule_id);
        let options = self.options(Method::PATCH, Service::Rms).await?;
        self.send_json("update suppression rule", &url, options, update)
            .await?;
        Ok(())
    }

    async fn delete_suppression_rule(&self, ctx: &ContextIds, rule_id: &str) -> ClientResult<()> {
        let url = self.endpoints.suppression_rule_url(&ctx.itwin_id, rule_id);
        let options = self.options(Method::DELETE, Service::Rms).await?;
        self.send("delete suppression rule", &url, options).await?;
        Ok(())
    }

    async fn list_results(&self, ctx: &ContextIds) -> ClientResult<Vec<ValidationResult>> {
        let url = self.endpoints.results_url();
        let options = self
            .options(Method::GET, Service::Ras)
            .await?
            .header("itwin-id", ctx.itwin_id.as_str())
            .header("repository-id", ctx.imodel_id.as_str());
        self.get_all_rows("list results", &url, options, RAS_DEFAULT_PAGE_SIZE)
            .await?
            .iter()
            .map(normalize::validation_result)
            .collect()
    }

    async fn get_result(
        &self,
        ctx: &ContextIds,
        result_id: &str,
        rules: &[SuppressionRule],
    ) -> ClientResult<ClashResultSet> {
        let url = self.endpoints.result_url(result_id);
        let options = self
            .options(Method::GET, Service::Ras)
            .await?
            .header("itwin-id", ctx.itwin_id.as_str());
        let response = self.send("result by id", &url, options).await?;
        normalize::clash_result_set(response.json("result by id")?, rules)
    }

    async fn cancel_jobs(&self, ctx: &ContextIds, result_ids: &[String]) -> ClientResult<()> {
        let url = self.endpoints.cancel_jobs_url();
        let options = self
            .options(Method::POST, Service::Ras)
            .await?
            .header("itwin-id", ctx.itwin_id.as_str());
        self.send_json("cancel jobs", &url, options, result_ids)
            .await?;
        Ok(())
    }

    async fn suppress(
        &self,
        ctx: &ContextIds,
        report_id: &str,
        action: SuppressAction,
        request: &SuppressionRequest,
    ) -> ClientResult<()> {
        let method = match action {
            SuppressAction::Apply => Method::POST,
            SuppressAction::Remove => Method::DELETE,
        };
        let url = self.endpoints.suppress_url();
        let options = self
            .options(method, Service::Ras)
            .await?
            .header("itwin-id", ctx.itwin_id.as_str())
            .header("clash-report-id", report_id);
        self.send_json("suppress", &url, options, request).await?;
        Ok(())
    }

    async fn suppression_history(
        &self,
        ctx: &ContextIds,
        report_id: &str,
        element_a_id: &str,
        element_b_id: &str,
    ) -> ClientResult<Vec<ManualSuppression>> {
        let url = format!(
            "{}?top={}&clashReportId={}&elementAId={}&elementBId={}&includeUserMetadata=true",
            self.endpoints.suppress_url(),
            SUPPRESSION_HISTORY_TOP,
            report_id,
            element_a_id,
            element_b_id
        );
        let options = self
            .options(Method::GET, Service::Ras)
            .await?
            .header("itwin-id", ctx.itwin_id.as_str());
        let response = self.send("suppression history", &url, options).await?;
        Ok(normalize::page_rows(response.json("suppression history")?)
            .iter()
            .map(normalize::manual_suppression)
            .collect())
    }
}
