//! Typed REST client
//!
//! Responses deserialize into the shapes in [`types`] before being
//! normalized. Listings page through query parameters and are exposed as a
//! lazy stream of pages.

pub mod normalize;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use clash_core::{
    ClashResultSet, ClashTestSpec, CreatedTest, ManualSuppression, NewSuppressionRule,
    RuleTemplate, SuppressAction, SuppressionRequest, SuppressionRule, SuppressionRuleUpdate,
    TestDefinition, TestRunRequest, TestRunStatus, ValidationResult,
};
use futures::stream::{self, Stream, TryStreamExt};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::{
    ClashServiceClient, ClientKind, ContextIds, ServiceEndpoints, CLASH_RULE_TEMPLATE_TYPE,
    RAS_DEFAULT_PAGE_SIZE, RMS_DEFAULT_PAGE_SIZE, RULE_TEMPLATE_PAGE_SIZE,
    SUPPRESSION_HISTORY_TOP,
};
use crate::error::{ClientError, ClientResult};
use crate::token::{authorization_value, AccessTokenProvider};

use types::{
    CreatedDto, Page, ResultByIdDto, ResultMetadataDto, RuleTemplateDto, RunStatusDto,
    StatusEnvelope, SuppressionHistoryDto, SuppressionRuleDto, TestDto,
};

/// Send a request and return the body of a successful response
async fn execute(operation: &'static str, request: RequestBuilder) -> ClientResult<String> {
    let response = request
        .send()
        .await
        .map_err(|e| ClientError::transport(operation, e))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ClientError::transport(operation, e))?;

    if !status.is_success() {
        return Err(ClientError::Status {
            operation: operation.to_string(),
            status,
            body,
        });
    }
    Ok(body)
}

async fn execute_json<T: DeserializeOwned>(
    operation: &'static str,
    request: RequestBuilder,
) -> ClientResult<T> {
    let body = execute(operation, request).await?;
    if body.trim().is_empty() {
        return Err(ClientError::no_data(operation));
    }
    serde_json::from_str(&body).map_err(|e| ClientError::parse(operation, e))
}

/// Lazy stream of pages for a listing request
///
/// Each page is fetched only when polled. The stream ends after the page
/// that reports no more data, and fails if the service hands back a token
/// it already gave.
pub fn page_stream<T>(
    operation: &'static str,
    request: RequestBuilder,
    page_size: u32,
) -> impl Stream<Item = ClientResult<Vec<T>>>
where
    T: DeserializeOwned + Send + 'static,
{
    let start = (Some(String::new()), HashSet::new());
    stream::try_unfold(start, move |(token, mut seen): (Option<String>, HashSet<String>)| {
        let next = token.map(|token| {
            seen.insert(token.clone());
            request.try_clone().map(|page| {
                page.query(&[
                    ("pageSize", page_size.to_string()),
                    ("continuationToken", token),
                ])
            })
        });
        async move {
            let page = match next {
                None => return Ok(None),
                Some(None) => {
                    return Err(ClientError::parse(operation, "request cannot be repeated"))
                }
                Some(Some(page)) => page,
            };
            let page: Page<T> = execute_json(operation, page).await?;
            let token = page.next_token();
            if token.as_ref().is_some_and(|token| seen.contains(token)) {
                return Err(ClientError::parse(operation, "continuation token repeated"));
            }
            Ok(Some((page.rows, (token, seen))))
        }
    })
}

pub struct RcClient {
    http: Client,
    endpoints: ServiceEndpoints,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl RcClient {
    pub fn new(
        endpoints: ServiceEndpoints,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> ClientResult<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| ClientError::transport("build http client", e))?;
        Ok(Self {
            http,
            endpoints,
            tokens,
        })
    }

    async fn rms(&self, method: Method, url: &str) -> ClientResult<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(self
            .http
            .request(method, url)
            .timeout(self.endpoints.rms_timeout)
            .header(AUTHORIZATION, authorization_value(&token)))
    }

    async fn ras(&self, method: Method, url: &str, ctx: &ContextIds) -> ClientResult<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(self
            .http
            .request(method, url)
            .timeout(self.endpoints.ras_timeout)
            .header(AUTHORIZATION, authorization_value(&token))
            .header("itwin-id", ctx.itwin_id.as_str()))
    }

    async fn collect_pages<T>(
        operation: &'static str,
        request: RequestBuilder,
        page_size: u32,
    ) -> ClientResult<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let rows: Vec<T> = page_stream(operation, request, page_size)
            .try_concat()
            .await?;
        debug!(operation, rows = rows.len(), "RC pages collected");
        Ok(rows)
    }
}

#[async_trait]
impl ClashServiceClient for RcClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Rc
    }

    async fn list_tests(&self, ctx: &ContextIds) -> ClientResult<Vec<TestDefinition>> {
        let request = self
            .rms(Method::GET, &self.endpoints.tests_url(&ctx.itwin_id))
            .await?
            .query(&[
                ("repositoryId", ctx.imodel_id.as_str()),
                ("includeRulesCount", "true"),
            ]);
        Self::collect_pages::<TestDto>("list tests", request, RMS_DEFAULT_PAGE_SIZE)
            .await?
            .into_iter()
            .map(|test| normalize::test_definition(&ctx.itwin_id, test))
            .collect()
    }

    async fn get_test(&self, ctx: &ContextIds, test_id: &str) -> ClientResult<TestDefinition> {
        let request = self
            .rms(Method::GET, &self.endpoints.test_url(&ctx.itwin_id, test_id))
            .await?;
        let test: TestDto = execute_json("get test", request).await?;
        normalize::test_definition(&ctx.itwin_id, test)
    }

    async fn create_tests(
        &self,
        ctx: &ContextIds,
        tests: &[ClashTestSpec],
    ) -> ClientResult<Vec<CreatedTest>> {
        let request = self
            .rms(Method::POST, &self.endpoints.tests_url(&ctx.itwin_id))
            .await?
            .json(tests);
        let envelope: StatusEnvelope<CreatedDto> = execute_json("create tests", request).await?;
        envelope
            .status
            .ok_or_else(|| ClientError::no_data("create tests"))?
            .into_iter()
            .map(normalize::created_test)
            .collect()
    }

    async fn update_test(
        &self,
        ctx: &ContextIds,
        test_id: &str,
        test: &ClashTestSpec,
    ) -> ClientResult<()> {
        let request = self
            .rms(Method::PUT, &self.endpoints.test_url(&ctx.itwin_id, test_id))
            .await?
            .json(test);
        execute("update test", request).await?;
        Ok(())
    }

    async fn delete_tests(&self, ctx: &ContextIds, test_ids: &[String]) -> ClientResult<()> {
        let request = self
            .rms(Method::PATCH, &self.endpoints.tests_url(&ctx.itwin_id))
            .await?
            .json(test_ids);
        execute("delete tests", request).await?;
        Ok(())
    }

    async fn run_tests(
        &self,
        ctx: &ContextIds,
        runs: &[TestRunRequest],
    ) -> ClientResult<Vec<TestRunStatus>> {
        let request = self
            .rms(Method::POST, &self.endpoints.run_url(&ctx.itwin_id))
            .await?
            .header("In-Place", "force")
            .json(runs);
        let envelope: StatusEnvelope<RunStatusDto> = execute_json("run tests", request).await?;
        envelope
            .status
            .ok_or_else(|| ClientError::no_data("run tests"))?
            .into_iter()
            .map(normalize::run_status)
            .collect()
    }

    async fn list_rule_templates(&self, ctx: &ContextIds) -> ClientResult<Vec<RuleTemplate>> {
        let request = self
            .rms(Method::GET, &self.endpoints.rule_templates_url(&ctx.itwin_id))
            .await?
            .query(&[("type", CLASH_RULE_TEMPLATE_TYPE)]);
        Self::collect_pages::<RuleTemplateDto>(
            "list rule templates",
            request,
            RULE_TEMPLATE_PAGE_SIZE,
        )
        .await?
        .into_iter()
        .map(normalize::rule_template)
        .collect()
    }

    async fn list_suppression_rules(
        &self,
        ctx: &ContextIds,
        order_by: Option<&str>,
    ) -> ClientResult<Vec<SuppressionRule>> {
        let mut request = self
            .rms(Method::GET, &self.endpoints.suppression_rules_url(&ctx.itwin_id))
            .await?;
        if let Some(order_by) = order_by {
            request = request.query(&[("orderBy", order_by)]);
        }
        Self::collect_pages::<SuppressionRuleDto>(
            "list suppression rules",
            request,
            RMS_DEFAULT_PAGE_SIZE,
        )
        .await?
        .into_iter()
        .map(normalize::suppression_rule)
        .collect()
    }

    async fn get_suppression_rule(
        &self,
        ctx: &ContextIds,
        rule_id: &str,
    ) -> ClientResult<SuppressionRule> {
        let url = self.endpoints.suppression_rule_url(&ctx.itwin_id, rule_id);
        let request = self.rms(Method::GET, &url).await?;
        let rule: SuppressionRuleDto = execute_json("get suppression rule", request).await?;
        normalize::suppression_rule(rule)
    }

    async fn create_suppression_rule(
        &self,
        ctx: &ContextIds,
        rule: &NewSuppressionRule,
    ) -> ClientResult<SuppressionRule> {
        let request = self
            .rms(Method::POST, &self.endpoints.suppression_rules_url(&ctx.itwin_id))
            .await?
            .json(rule);
        let rule: SuppressionRuleDto = execute_json("create suppression rule", request).await?;
        normalize::suppression_rule(rule)
    }

    async fn update_suppression_rule(
        &self,
        ctx: &ContextIds,
        rule_id: &str,
        update: &SuppressionRuleUpdate,
    ) -> ClientResult<()> {
        let url = self.endpoints.suppression_rule_url(&ctx.itwin_id, rule_id);
        let request = self.rms(Method::PATCH, &url).await?.json(update);
        execute("update suppression rule", request).await?;
        Ok(())
    }

    async fn delete_suppression_rule(&self, ctx: &ContextIds, rule_id: &str) -> ClientResult<()> {
        let url = self.endpoints.suppression_rule_url(&ctx.itwin_id, rule_id);
        let request = self.rms(Method::DELETE, &url).await?;
        execute("delete suppression rule", request).await?;
        Ok(())
    }

    async fn list_results(&self, ctx: &ContextIds) -> ClientResult<Vec<ValidationResult>> {
        let request = self
            .ras(Method::GET, &self.endpoints.results_url(), ctx)
            .await?
            .header("repository-id", ctx.imodel_id.as_str());
        Self::collect_pages::<ResultMetadataDto>("list results", request, RAS_DEFAULT_PAGE_SIZE)
            .await?
            .into_iter()
            .map(normalize::validation_result)
            .collect()
    }

    async fn get_result(
        &self,
        ctx: &ContextIds,
        result_id: &str,
        rules: &[SuppressionRule],
    ) -> ClientResult<ClashResultSet> {
        let request = self
            .ras(Method::GET, &self.endpoints.result_url(result_id), ctx)
            .await?;
        let response: ResultByIdDto = execute_json("result by id", request).await?;
        normalize::clash_result_set(response, rules)
    }

    async fn cancel_jobs(&self, ctx: &ContextIds, result_ids: &[String]) -> ClientResult<()> {
        let request = self
            .ras(Method::POST, &self.endpoints.cancel_jobs_url(), ctx)
            .await?
            .json(result_ids);
        execute("cancel jobs", request).await?;
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
        let call = self
            .ras(method, &self.endpoints.suppress_url(), ctx)
            .await?
            .header("clash-report-id", report_id)
            .json(request);
        execute("suppress", call).await?;
        Ok(())
    }

    async fn suppression_history(
        &self,
        ctx: &ContextIds,
        report_id: &str,
        element_a_id: &str,
        element_b_id: &str,
    ) -> ClientResult<Vec<ManualSuppression>> {
        let top = SUPPRESSION_HISTORY_TOP.to_string();
        let request = self
            .ras(Method::GET, &self.endpoints.suppress_url(), ctx)
            .await?
            .query(&[
                ("top", top.as_str()),
                ("clashReportId", report_id),
                ("elementAId", element_a_id),
                ("elementBId", element_b_id),
                ("includeUserMetadata", "true"),
            ]);
        let page: Page<SuppressionHistoryDto> =
            execute_json("suppression history", request).await?;
        Ok(page
            .rows
            .into_iter()
            .map(normalize::manual_suppression)
            .collect())
    }
}
