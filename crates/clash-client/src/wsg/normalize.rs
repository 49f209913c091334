//! Lenient extraction of canonical records from raw service JSON
//!
//! Missing optional fields fall back to defaults (0, empty string, empty
//! list). Only a missing identifier makes a row unusable.

use chrono::{DateTime, Utc};
use clash_core::model::{
    resolve_label, test_type_label, Point3, ReferenceLabel, RepositoryTag, SuppressingRuleRef,
    UserRef,
};
use clash_core::{
    ClashCounts, ClashRecord, ClashResultSet, ClashTestSettings, CreatedTest, ManualSuppression,
    RuleTemplate, SuppressionRule, TestDefinition, TestRunStatus, ValidationResult,
    ValidationStatus,
};
use serde_json::{Map, Value};

use crate::error::{ClientError, ClientResult};
use crate::lenient;

fn field<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&Value::Null)
}

fn text(value: &Value, key: &str) -> String {
    opt_text(value, key).unwrap_or_default()
}

fn opt_text(value: &Value, key: &str) -> Option<String> {
    lenient::as_text(field(value, key))
}

fn int(value: &Value, key: &str) -> i64 {
    opt_int(value, key).unwrap_or(0)
}

fn opt_int(value: &Value, key: &str) -> Option<i64> {
    lenient::as_int(field(value, key))
}

fn float(value: &Value, key: &str) -> f64 {
    opt_float(value, key).unwrap_or(0.0)
}

fn opt_float(value: &Value, key: &str) -> Option<f64> {
    lenient::as_float(field(value, key))
}

fn flag(value: &Value, key: &str) -> bool {
    lenient::as_flag(field(value, key)).unwrap_or(false)
}

fn date(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    lenient::as_date(field(value, key))
}

fn status_of(value: &Value) -> Option<ValidationStatus> {
    lenient::as_status(field(value, "status"))
}

fn strings(value: &Value, key: &str) -> Vec<String> {
    lenient::as_strings(field(value, key))
}

fn object(value: &Value, key: &str) -> Map<String, Value> {
    lenient::as_object(field(value, key))
}

fn opaque(value: &Value, key: &str) -> Value {
    field(value, key).clone()
}

fn user(value: Option<&Value>) -> Option<UserRef> {
    let value = value.filter(|v| v.is_object())?;
    Some(UserRef {
        id: text(value, "id"),
        name: text(value, "name"),
        email: opt_text(value, "email"),
    })
}

fn required_id(operation: &str, value: &Value) -> ClientResult<String> {
    match value.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ClientError::parse(operation, "row without id")),
    }
}

/// `rows` of a paged envelope; absent rows are an empty page
pub fn page_rows(body: &Value) -> Vec<Value> {
    body.get("rows")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Continuation token when the page says more data follows
pub fn next_token(body: &Value) -> Option<String> {
    if !flag(body, "hasMoreData") {
        return None;
    }
    opt_text(body, "continuationToken").filter(|token| !token.is_empty())
}

pub fn test_definition(itwin_id: &str, row: &Value) -> ClientResult<TestDefinition> {
    let metadata = row.get("userMetadata");
    Ok(TestDefinition {
        id: required_id("test", row)?,
        name: text(row, "name"),
        description: text(row, "description"),
        context_id: itwin_id.to_string(),
        created_by: user(metadata.and_then(|m| m.get("createdBy"))),
        created_at: date(row, "creationDate"),
        modified_by: user(metadata.and_then(|m| m.get("modifiedBy"))),
        modified_at: date(row, "modificationDate"),
        rules_count: lenient::count(int(row, "rulesCount")),
        tag: row.get("tag").filter(|t| t.is_object()).map(|tag| RepositoryTag {
            repository_id: text(tag, "id"),
            repository_type: text(tag, "type"),
        }),
        settings: ClashTestSettings {
            set_a: opaque(row, "setA"),
            set_b: opaque(row, "setB"),
            touching_tolerance: float(row, "touchingTolerance"),
            include_sub_models: flag(row, "includeSubModels"),
            suppression_rules: strings(row, "suppressionRules"),
            suppress_touching: flag(row, "suppressTouching"),
            advanced_settings: opaque(row, "advancedSettings"),
        },
    })
}

pub fn validation_result(row: &Value) -> ClientResult<ValidationResult> {
    let status = status_of(row).unwrap_or(ValidationStatus::Created);
    let statuses = row.get("vStatuses").cloned().unwrap_or(Value::Null);

    Ok(ValidationResult {
        id: required_id("result metadata", row)?,
        context_id: text(row, "iTwinId"),
        imodel_id: text(row, "repositoryId"),
        imodel_name: text(row, "iModelName"),
        version_name: opt_text(row, "changesetName"),
        changeset_id: text(row, "changesetId"),
        num_elements: int(row, "numElements"),
        num_issues: int(row, "numIssues"),
        num_rules: int(row, "numRules"),
        num_validations: int(row, "numValidations"),
        status,
        status_text: status.name().to_string(),
        test_type: test_type_label(opt_int(row, "configurationType")).to_string(),
        executed: date(row, "executed"),
        user_name: text(row, "userName"),
        configuration_id: text(row, "configurationId"),
        configuration_name: text(row, "configurationName"),
        duration: opt_float(row, "duration"),
        counts: ClashCounts {
            raw_new: int(&statuses, "new"),
            raw_open: int(&statuses, "open"),
            raw_resolved: int(&statuses, "resolved"),
            rule_suppressed: int(&statuses, "rs"),
            manually_suppressed: int(&statuses, "ms"),
            dual_suppressed: int(&statuses, "multiSup"),
        },
    })
}

fn reference_labels(value: &Value, key: &str) -> Vec<ReferenceLabel> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| ReferenceLabel {
                    id: text(item, "id"),
                    label: text(item, "label"),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn clash_record(
    clash: &Value,
    index: usize,
    categories: &[ReferenceLabel],
    models: &[ReferenceLabel],
    rules: &[SuppressionRule],
) -> ClashRecord {
    let sphere = clash.get("boundingSphere").cloned().unwrap_or(Value::Null);
    let center = sphere.get("center").cloned().unwrap_or(Value::Null);
    let category_a = text(clash, "elementACategoryId");
    let category_b = text(clash, "elementBCategoryId");
    let model_a = text(clash, "elementAModelId");
    let model_b = text(clash, "elementBModelId");

    ClashRecord {
        id: index.to_string(),
        element_a_id: text(clash, "elementAId"),
        element_b_id: text(clash, "elementBId"),
        element_a_label: text(clash, "elementALabel"),
        element_b_label: text(clash, "elementBLabel"),
        element_a_category_label: resolve_label(categories, &category_a),
        element_b_category_label: resolve_label(categories, &category_b),
        element_a_model_label: resolve_label(models, &model_a),
        element_b_model_label: resolve_label(models, &model_b),
        element_a_category_id: category_a,
        element_b_category_id: category_b,
        element_a_model_id: model_a,
        element_b_model_id: model_b,
        clash_type: text(clash, "clashType"),
        center: Point3 {
            x: float(&center, "x"),
            y: float(&center, "y"),
            z: float(&center, "z"),
        },
        radius: float(&sphere, "radius"),
        clearance: float(clash, "clearance"),
        additional_hilitable_element_a_ids: strings(clash, "additionalHilitableElementAIds"),
        additional_hilitable_element_b_ids: strings(clash, "additionalHilitableElementBIds"),
        suppressing_rules: SuppressingRuleRef::resolve_all(
            &strings(clash, "suppressingRules"),
            rules,
        ),
        is_manually_suppressed: flag(clash, "isMSupp"),
        suppressing_manually: Vec::new(),
        status: int(clash, "status"),
        report_id: text(clash, "clashReportId"),
        unique_id: text(clash, "cuid"),
    }
}

pub fn clash_result_set(body: &Value, rules: &[SuppressionRule]) -> ClientResult<ClashResultSet> {
    const OPERATION: &str = "result by id";
    let metadata = body
        .get("resultMetadata")
        .ok_or_else(|| ClientError::no_data(OPERATION))?;
    let result = body
        .get("result")
        .filter(|r| r.is_object())
        .ok_or_else(|| ClientError::no_data(OPERATION))?;

    let categories = reference_labels(result, "categoryList");
    let models = reference_labels(result, "modelList");
    let clashes = result
        .get("clashes")
        .and_then(Value::as_array)
        .map(|clashes| {
            clashes
                .iter()
                .enumerate()
                .map(|(index, clash)| clash_record(clash, index, &categories, &models, rules))
                .collect()
        })
        .unwrap_or_default();

    Ok(ClashResultSet {
        id: required_id(OPERATION, metadata)?,
        status: status_of(metadata),
        calculate_overlap: flag(result, "calculateOverlap"),
        clashes,
    })
}

pub fn suppression_rule(row: &Value) -> ClientResult<SuppressionRule> {
    Ok(SuppressionRule {
        id: required_id("suppression rule", row)?,
        template_id: text(row, "templateId"),
        name: text(row, "name"),
        reason: text(row, "reason"),
        parameters: object(row, "parameters"),
        created_by: user(row.get("createdBy")),
        created_at: date(row, "createdDateTime"),
        modified_at: date(row, "modifiedDateTime"),
    })
}

pub fn rule_template(row: &Value) -> ClientResult<RuleTemplate> {
    Ok(RuleTemplate {
        id: required_id("rule template", row)?,
        name: text(row, "name"),
        description: text(row, "description"),
        parameters: opaque(row, "parameters"),
    })
}

pub fn manual_suppression(row: &Value) -> ManualSuppression {
    ManualSuppression {
        id: text(row, "id"),
        element_a_id: text(row, "elementAId"),
        element_b_id: text(row, "elementBId"),
        reason: text(row, "reason"),
        user_name: row
            .get("createdBy")
            .map(|user| text(user, "name"))
            .unwrap_or_default(),
        created_at: date(row, "createdDateTime"),
    }
}

fn status_rows(operation: &str, body: &Value) -> ClientResult<Vec<Value>> {
    body.get("status")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| ClientError::no_data(operation))
}

pub fn created_tests(body: &Value) -> ClientResult<Vec<CreatedTest>> {
    status_rows("create tests", body)?
        .iter()
        .map(|row| {
            Ok(CreatedTest {
                id: required_id("create tests", row)?,
                name: text(row, "name"),
            })
        })
        .collect()
}

pub fn run_statuses(body: &Value) -> ClientResult<Vec<TestRunStatus>> {
    status_rows("run tests", body)?
        .iter()
        .map(|row| match opt_text(row, "resultId") {
            Some(result_id) => Ok(TestRunStatus {
                configuration_id: text(row, "configurationId"),
                result_id,
            }),
            None => Err(ClientError::parse("run tests", "run status without resultId")),
        })
        .collect()
}
