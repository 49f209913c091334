//! Typed wire shapes of the rule and results services

//!
//! Every scalar goes through a [`lenient`] adapter, so a null, a number sent
//! as a string or a date without an offset reads the way the WSG normalizer
//! reads it.

use chrono::{DateTime, Utc};
use clash_core::ValidationStatus;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::lenient;

/// One page of a paged listing
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub rows: Vec<T>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub has_more_data: bool,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub continuation_token: Option<String>,
}

impl<T> Page<T> {
    /// Token of the next page, if the service says there is one
    pub fn next_token(&self) -> Option<String> {
        if !self.has_more_data {
            return None;
        }
        self.continuation_token
            .clone()
            .filter(|token| !token.is_empty())
    }
}

/// `{status: [...]}` envelope of create and run responses
#[derive(Debug, Deserialize)]
pub struct StatusEnvelope<T> {
    pub status: Option<Vec<T>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetadataDto {
    #[serde(default, deserialize_with = "lenient::opt_object")]
    pub created_by: Option<UserDto>,
    #[serde(default, deserialize_with = "lenient::opt_object")]
    pub modified_by: Option<UserDto>,
}

#[derive(Debug, Deserialize)]
pub struct TagDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, rename = "type", deserialize_with = "lenient::text")]
    pub tag_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient::opt_object")]
    pub user_metadata: Option<UserMetadataDto>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub modification_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub rules_count: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_object")]
    pub tag: Option<TagDto>,
    #[serde(default)]
    pub set_a: Value,
    #[serde(default)]
    pub set_b: Value,
    #[serde(default, deserialize_with = "lenient::float")]
    pub touching_tolerance: f64,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub include_sub_models: bool,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub suppression_rules: Vec<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub suppress_touching: bool,
    #[serde(default)]
    pub advanced_settings: Value,
}

#[derive(Debug, Deserialize)]
pub struct CreatedDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub configuration_id: String,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub result_id: Option<String>,
}

/// Clash counts by category, as the results service abbreviates them
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCountsDto {
    #[serde(default, deserialize_with = "lenient::int")]
    pub new: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub open: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub resolved: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub rs: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub ms: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub multi_sup: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadataDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, rename = "iTwinId", deserialize_with = "lenient::text")]
    pub itwin_id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub repository_id: String,
    #[serde(default, rename = "iModelName", deserialize_with = "lenient::text")]
    pub imodel_name: String,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub changeset_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub changeset_id: String,
    #[serde(default, deserialize_with = "lenient::int")]
    pub num_elements: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub num_issues: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub num_rules: i64,
    #[serde(default, deserialize_with = "lenient::int")]
    pub num_validations: i64,
    #[serde(default, deserialize_with = "lenient::status")]
    pub status: Option<ValidationStatus>,
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub configuration_type: Option<i64>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub executed: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub user_name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub configuration_id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub configuration_name: String,
    #[serde(default, deserialize_with = "lenient::opt_float")]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_object")]
    pub v_statuses: Option<StatusCountsDto>,
}

#[derive(Debug, Deserialize)]
pub struct ResultHeaderDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::status")]
    pub status: Option<ValidationStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PointDto {
    #[serde(default, deserialize_with = "lenient::float")]
    pub x: f64,
    #[serde(default, deserialize_with = "lenient::float")]
    pub y: f64,
    #[serde(default, deserialize_with = "lenient::float")]
    pub z: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct BoundingSphereDto {
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub center: PointDto,
    #[serde(default, deserialize_with = "lenient::float")]
    pub radius: f64,
}

/// Entry of the category or model lookup list
#[derive(Debug, Deserialize)]
pub struct LabelDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct ClashDto {
    #[serde(default, rename = "elementAId", deserialize_with = "lenient::text")]
    pub element_id_a: String,
    #[serde(default, rename = "elementBId", deserialize_with = "lenient::text")]
    pub element_id_b: String,
    #[serde(default, rename = "elementALabel", deserialize_with = "lenient::text")]
    pub element_label_a: String,
    #[serde(default, rename = "elementBLabel", deserialize_with = "lenient::text")]
    pub element_label_b: String,
    #[serde(default, rename = "elementACategoryId", deserialize_with = "lenient::text")]
    pub category_id_a: String,
    #[serde(default, rename = "elementBCategoryId", deserialize_with = "lenient::text")]
    pub category_id_b: String,
    #[serde(default, rename = "elementAModelId", deserialize_with = "lenient::text")]
    pub model_id_a: String,
    #[serde(default, rename = "elementBModelId", deserialize_with = "lenient::text")]
    pub model_id_b: String,
    #[serde(default, rename = "clashType", deserialize_with = "lenient::text")]
    pub clash_type: String,
    #[serde(default, rename = "boundingSphere", deserialize_with = "lenient::null_as_default")]
    pub bounding_sphere: BoundingSphereDto,
    #[serde(default, deserialize_with = "lenient::float")]
    pub clearance: f64,
    #[serde(
        default,
        rename = "additionalHilitableElementAIds",
        deserialize_with = "lenient::strings"
    )]
    pub hilitable_ids_a: Vec<String>,
    #[serde(
        default,
        rename = "additionalHilitableElementBIds",
        deserialize_with = "lenient::strings"
    )]
    pub hilitable_ids_b: Vec<String>,
    #[serde(default, rename = "suppressingRules", deserialize_with = "lenient::strings")]
    pub suppressing_rules: Vec<String>,
    #[serde(default, rename = "isMSupp", deserialize_with = "lenient::flag")]
    pub manually_suppressed: bool,
    #[serde(default, deserialize_with = "lenient::int")]
    pub status: i64,
    #[serde(default, rename = "clashReportId", deserialize_with = "lenient::text")]
    pub report_id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub cuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBodyDto {
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub clashes: Vec<ClashDto>,
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub category_list: Vec<LabelDto>,
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub model_list: Vec<LabelDto>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub calculate_overlap: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultByIdDto {
    #[serde(default, deserialize_with = "lenient::opt_object")]
    pub result_metadata: Option<ResultHeaderDto>,
    #[serde(default, deserialize_with = "lenient::opt_object")]
    pub result: Option<ResultBodyDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionRuleDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub template_id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub reason: String,
    #[serde(default, deserialize_with = "lenient::object")]
    pub parameters: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient::opt_object")]
    pub created_by: Option<UserDto>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub created_date_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub modified_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RuleTemplateDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionHistoryDto {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, rename = "elementAId", deserialize_with = "lenient::text")]
    pub element_id_a: String,
    #[serde(default, rename = "elementBId", deserialize_with = "lenient::text")]
    pub element_id_b: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub reason: String,
    #[serde(default, deserialize_with = "lenient::opt_object")]
    pub created_by: Option<UserDto>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub created_date_time: Option<DateTime<Utc>>,
}
