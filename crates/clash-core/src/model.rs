//! Canonical records shared by both client variants
//!
//! Every client normalizes its own wire shapes into these types, so the
//! harness can compare the two clients field by field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ValidationStatus;

/// Configuration type the rule service uses for clash tests
pub const CLASH_CONFIG_TYPE: i64 = 2;

/// Test type label for clash detection results
pub const CLASH_DETECTION_CONFIG_STRING: &str = "Clash Detection";

/// Test type label for any other configuration type
pub const UNKNOWN_CONFIG_STRING: &str = "Unknown";

/// Repository type bound to every test created by the harness
pub const IMODEL_REPOSITORY_TYPE: &str = "iModels";

/// A user reference attached to created/modified metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Binding of a test definition to a repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryTag {
    pub repository_id: String,
    pub repository_type: String,
}

impl RepositoryTag {
    /// Tag binding a test to an iModel
    pub fn imodel(imodel_id: impl Into<String>) -> Self {
        Self {
            repository_id: imodel_id.into(),
            repository_type: IMODEL_REPOSITORY_TYPE.to_string(),
        }
    }
}

/// Clash test settings the rule service needs to recreate a test
///
/// Element sets and advanced settings are kept opaque; the harness only
/// round-trips them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClashTestSettings {
    #[serde(default)]
    pub set_a: Value,
    #[serde(default)]
    pub set_b: Value,
    #[serde(default)]
    pub touching_tolerance: f64,
    #[serde(default)]
    pub include_sub_models: bool,
    #[serde(default)]
    pub suppression_rules: Vec<String>,
    #[serde(default)]
    pub suppress_touching: bool,
    #[serde(default)]
    pub advanced_settings: Value,
}

/// A clash test definition owned by the rule service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context_id: String,
    #[serde(default)]
    pub created_by: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_by: Option<UserRef>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rules_count: u32,
    #[serde(default)]
    pub tag: Option<RepositoryTag>,
    #[serde(default)]
    pub settings: ClashTestSettings,
}

/// Body posted to create or update a clash test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClashTestSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub config_type: i64,
    #[serde(flatten)]
    pub settings: ClashTestSettings,
    pub tag: RepositoryTag,
}

impl ClashTestSpec {
    /// Reshape a definition into the create/update body, bound to `imodel_id`
    pub fn from_definition(test: &TestDefinition, imodel_id: &str) -> Self {
        Self {
            id: (!test.id.is_empty()).then(|| test.id.clone()),
            name: test.name.clone(),
            description: test.description.clone(),
            config_type: CLASH_CONFIG_TYPE,
            settings: test.settings.clone(),
            tag: RepositoryTag::imodel(imodel_id),
        }
    }

    /// Same body with a different name and no id, for copies
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.id = None;
        self.name = name.into();
        self
    }
}

/// Status row returned for each created test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTest {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// One test to run against a changeset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunRequest {
    #[serde(rename = "iModelId")]
    pub imodel_id: String,
    pub changeset_id: String,
    pub configuration_id: String,
}

/// Status row returned for each started run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunStatus {
    #[serde(default)]
    pub configuration_id: String,
    pub result_id: String,
}

/// Per-category clash counts of a validation result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClashCounts {
    pub raw_new: i64,
    pub raw_open: i64,
    pub raw_resolved: i64,
    pub rule_suppressed: i64,
    pub manually_suppressed: i64,
    pub dual_suppressed: i64,
}

/// Sums and differences saturate at the `i64` bounds
impl ClashCounts {
    pub fn total(&self) -> i64 {
        self.raw_new
            .saturating_add(self.raw_open)
            .saturating_add(self.raw_resolved)
    }

    pub fn resolved(&self) -> i64 {
        self.raw_resolved
            .saturating_add(self.rule_suppressed)
            .saturating_add(self.manually_suppressed)
            .saturating_add(self.dual_suppressed)
    }

    pub fn active(&self) -> i64 {
        self.total().saturating_sub(self.resolved())
    }
}

/// Metadata of one validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub id: String,
    pub context_id: String,
    #[serde(rename = "iModelId")]
    pub imodel_id: String,
    #[serde(rename = "iModelName")]
    pub imodel_name: String,
    /// Changeset name; an unlabeled changeset reports its raw hash here
    pub version_name: Option<String>,
    pub changeset_id: String,
    pub num_elements: i64,
    pub num_issues: i64,
    pub num_rules: i64,
    pub num_validations: i64,
    pub status: ValidationStatus,
    pub status_text: String,
    pub test_type: String,
    pub executed: Option<DateTime<Utc>>,
    pub user_name: String,
    pub configuration_id: String,
    pub configuration_name: String,
    pub duration: Option<f64>,
    pub counts: ClashCounts,
}

/// Test type label for a configuration type code
pub fn test_type_label(configuration_type: Option<i64>) -> &'static str {
    if configuration_type == Some(CLASH_CONFIG_TYPE) {
        CLASH_DETECTION_CONFIG_STRING
    } else {
        UNKNOWN_CONFIG_STRING
    }
}

/// An (id, label) entry of the category or model lookup list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLabel {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

/// Linear lookup of a label; a miss yields an empty string
pub fn resolve_label(list: &[ReferenceLabel], id: &str) -> String {
    list.iter()
        .find(|item| item.id == id)
        .map(|item| item.label.clone())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A suppression rule as referenced from a clash
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressingRuleRef {
    pub id: String,
    pub name: String,
    pub user: String,
    pub reason: String,
    pub definition: String,
    pub parameters: Map<String, Value>,
    pub valid: bool,
}

impl SuppressingRuleRef {
    /// Resolve rule ids against the context's rules; unknown ids keep empty fields
    pub fn resolve_all(rule_ids: &[String], rules: &[SuppressionRule]) -> Vec<Self> {
        rule_ids
            .iter()
            .map(|id| match rules.iter().find(|rule| &rule.id == id) {
                Some(rule) => Self {
                    id: id.clone(),
                    name: rule.name.clone(),
                    user: rule
                        .created_by
                        .as_ref()
                        .map(|user| user.name.clone())
                        .unwrap_or_default(),
                    reason: rule.reason.clone(),
                    valid: true,
                    ..Self::default()
                },
                None => Self {
                    id: id.clone(),
                    valid: true,
                    ..Self::default()
                },
            })
            .collect()
    }
}

/// One interference between two elements within a result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClashRecord {
    /// Position of the clash within its result
    pub id: String,
    pub element_a_id: String,
    pub element_b_id: String,
    pub element_a_label: String,
    pub element_b_label: String,
    pub element_a_category_id: String,
    pub element_b_category_id: String,
    pub element_a_model_id: String,
    pub element_b_model_id: String,
    pub element_a_category_label: String,
    pub element_b_category_label: String,
    pub element_a_model_label: String,
    pub element_b_model_label: String,
    #[serde(rename = "type")]
    pub clash_type: String,
    pub center: Point3,
    pub radius: f64,
    pub clearance: f64,
    pub additional_hilitable_element_a_ids: Vec<String>,
    pub additional_hilitable_element_b_ids: Vec<String>,
    pub suppressing_rules: Vec<SuppressingRuleRef>,
    #[serde(rename = "isMSupp")]
    pub is_manually_suppressed: bool,
    /// Numeric element pair, filled only for manually suppressed clashes
    pub suppressing_manually: Vec<u64>,
    pub status: i64,
    pub report_id: String,
    pub unique_id: String,
}

impl ClashRecord {
    /// Fill the legacy numeric pair when the clash is manually suppressed
    pub fn mark_manual_suppression(&mut self) {
        if self.is_manually_suppressed {
            self.suppressing_manually = [&self.element_a_id, &self.element_b_id]
                .into_iter()
                .filter_map(|id| parse_element_id(id))
                .collect();
        }
    }
}

/// Parse an element id written either as `0x` hex or decimal
pub fn parse_element_id(id: &str) -> Option<u64> {
    let id = id.trim();
    match id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => id.parse().ok(),
    }
}

/// Clash records of one validation result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClashResultSet {
    pub id: String,
    pub status: Option<ValidationStatus>,
    pub calculate_overlap: bool,
    pub clashes: Vec<ClashRecord>,
}

/// A suppression rule owned by the rule service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionRule {
    pub id: String,
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub created_by: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Body posted to create a suppression rule from a template
///
/// The service rejects an empty parameters object, so it is left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSuppressionRule {
    pub template_id: String,
    pub name: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

/// Body patched onto a suppression rule; replaces all three fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionRuleUpdate {
    pub name: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl From<&NewSuppressionRule> for SuppressionRuleUpdate {
    fn from(rule: &NewSuppressionRule) -> Self {
        Self {
            name: rule.name.clone(),
            reason: rule.reason.clone(),
            parameters: rule.parameters.clone(),
        }
    }
}

/// A template suppression rules are created from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// One entry of a clash pair's manual suppression history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSuppression {
    pub id: String,
    pub element_a_id: String,
    pub element_b_id: String,
    pub reason: String,
    pub user_name: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_label_miss_is_empty() {
        let list = vec![ReferenceLabel {
            id: "0x1".into(),
            label: "Walls".into(),
        }];
        assert_eq!(resolve_label(&list, "0x1"), "Walls");
        assert_eq!(resolve_label(&list, "0x2"), "");
        assert_eq!(resolve_label(&[], "0x1"), "");
    }

    #[test]
    fn test_parse_element_id() {
        assert_eq!(parse_element_id("0x20000000a1"), Some(0x20000000a1));
        assert_eq!(parse_element_id("42"), Some(42));
        assert_eq!(parse_element_id("not-an-id"), None);
    }

    #[test]
    fn test_manual_suppression_pair() {
        let mut clash = ClashRecord {
            element_a_id: "0x10".into(),
            element_b_id: "0x11".into(),
            is_manually_suppressed: true,
            ..ClashRecord::default()
        };
        clash.mark_manual_suppression();
        assert_eq!(clash.suppressing_manually, vec![16, 17]);

        let mut untouched = ClashRecord {
            element_a_id: "0x10".into(),
            element_b_id: "0x11".into(),
            ..ClashRecord::default()
        };
        untouched.mark_manual_suppression();
        assert!(untouched.suppressing_manually.is_empty());
    }

    #[test]
    fn test_suppressing_rules_resolution() {
        let rules = vec![SuppressionRule {
            id: "r1".into(),
            name: "Ignore boxes".into(),
            reason: "noise".into(),
            created_by: Some(UserRef {
                id: "u1".into(),
                name: "Dana".into(),
                email: None,
            }),
            ..SuppressionRule::default()
        }];

        let resolved = SuppressingRuleRef::resolve_all(&["r1".into(), "r9".into()], &rules);
        assert_eq!(resolved[0].name, "Ignore boxes");
        assert_eq!(resolved[0].user, "Dana");
        assert_eq!(resolved[1].id, "r9");
        assert_eq!(resolved[1].name, "");
        assert!(resolved.iter().all(|rule| rule.valid));
    }

    #[test]
    fn test_empty_parameters_are_omitted() {
        let rule = NewSuppressionRule {
            template_id: "t".into(),
            name: "n".into(),
            reason: "r".into(),
            parameters: Map::new(),
        };
        assert_eq!(
            serde_json::to_value(&rule).unwrap(),
            json!({"templateId": "t", "name": "n", "reason": "r"})
        );
    }

    #[test]
    fn test_spec_binds_repository_tag() {
        let test = TestDefinition {
            id: "t1".into(),
            name: "Walls vs ducts".into(),
            settings: ClashTestSettings {
                touching_tolerance: 0.01,
                ..ClashTestSettings::default()
            },
            ..TestDefinition::default()
        };

        let body = serde_json::to_value(ClashTestSpec::from_definition(&test, "model-1")).unwrap();
        assert_eq!(body["configType"], 2);
        assert_eq!(body["touchingTolerance"], 0.01);
        assert_eq!(body["tag"]["repositoryId"], "model-1");
        assert_eq!(body["tag"]["repositoryType"], "iModels");

        let copy = ClashTestSpec::from_definition(&test, "model-1").renamed("copy");
        assert!(copy.id.is_none());
        assert_eq!(copy.name, "copy");
    }
}
