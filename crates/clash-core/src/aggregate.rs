//! Join test definitions with their most recent validation result

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{ClashCounts, TestDefinition, ValidationResult};
use crate::ValidationStatus;

/// Version name shown for a result run against an unlabeled changeset
pub const NO_NAMED_VERSION: &str = "no named version";

/// A test definition with its latest result and derived clash counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTestRow {
    #[serde(flatten)]
    pub test: TestDefinition,
    /// Creator display name
    pub user: String,
    pub last_modified_by: String,
    pub total_clashes: i64,
    pub resolved_clashes: i64,
    pub active_clashes: i64,
    #[serde(flatten)]
    pub counts: ClashCounts,
    pub result_id: Option<String>,
    #[serde(rename = "iModelId")]
    pub imodel_id: Option<String>,
    pub repository_id: Option<String>,
    #[serde(rename = "iModelVersionName")]
    pub imodel_version_name: Option<String>,
    pub last_executed_date: Option<DateTime<Utc>>,
    pub status: ValidationStatus,
    pub localized_status: String,
}

impl AggregatedTestRow {
    /// Build the row for `test`, using `latest` when the test has been run
    pub fn new(test: TestDefinition, latest: Option<&ValidationResult>) -> Self {
        let counts = latest.map(|result| result.counts).unwrap_or_default();
        let status = latest
            .map(|result| result.status)
            .unwrap_or(ValidationStatus::Created);

        Self {
            user: user_name(test.created_by.as_ref()),
            last_modified_by: user_name(test.modified_by.as_ref()),
            total_clashes: counts.total(),
            resolved_clashes: counts.resolved(),
            active_clashes: counts.active(),
            counts,
            result_id: latest.map(|result| result.id.clone()),
            imodel_id: latest.map(|result| result.imodel_id.clone()),
            repository_id: test.tag.as_ref().map(|tag| tag.repository_id.clone()),
            imodel_version_name: latest
                .and_then(|result| classify_version_name(result.version_name.as_deref())),
            last_executed_date: latest.and_then(|result| result.executed),
            localized_status: status.name().to_string(),
            status,
            test,
        }
    }
}

fn user_name(user: Option<&crate::model::UserRef>) -> String {
    user.map(|user| user.name.clone()).unwrap_or_default()
}

/// Sort results newest first
///
/// The sort is stable, so results with equal timestamps keep their
/// relative order. Results without a timestamp go last.
pub fn sort_by_executed_desc(results: &mut [ValidationResult]) {
    results.sort_by(|a, b| b.executed.cmp(&a.executed));
}

/// Whether `name` is a raw 40-character changeset hash rather than a version label
///
/// The match is case-sensitive: uppercase hashes are treated as labels.
pub fn is_raw_changeset_id(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z0-9]{40}$").expect("changeset pattern is valid"))
        .is_match(name)
}

/// Replace raw changeset hashes with [`NO_NAMED_VERSION`]; pass labels through
pub fn classify_version_name(name: Option<&str>) -> Option<String> {
    match name {
        Some(name) if is_raw_changeset_id(name) => Some(NO_NAMED_VERSION.to_string()),
        Some(name) => Some(name.to_string()),
        None => None,
    }
}

/// Produce one row per test, joined with the test's most recent result
///
/// Output order follows `tests`. Results are indexed by configuration id
/// after sorting, keeping the first (newest) entry per id, which matches
/// a linear "first match" scan over the sorted list.
pub fn aggregate(
    tests: Vec<TestDefinition>,
    mut results: Vec<ValidationResult>,
) -> Vec<AggregatedTestRow> {
    sort_by_executed_desc(&mut results);

    let mut latest: HashMap<&str, &ValidationResult> = HashMap::with_capacity(results.len());
    for result in &results {
        latest
            .entry(result.configuration_id.as_str())
            .or_insert(result);
    }

    tests
        .into_iter()
        .map(|test| {
            let result = latest.get(test.id.as_str()).copied();
            AggregatedTestRow::new(test, result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RepositoryTag, UserRef};
    use chrono::TimeZone;

    fn result(id: &str, configuration_id: &str, executed: Option<i64>) -> ValidationResult {
        ValidationResult {
            id: id.to_string(),
            context_id: "ctx".into(),
            imodel_id: "model".into(),
            imodel_name: String::new(),
            version_name: None,
            changeset_id: String::new(),
            num_elements: 0,
            num_issues: 0,
            num_rules: 0,
            num_validations: 0,
            status: ValidationStatus::Completed,
            status_text: "Completed".into(),
            test_type: "Clash Detection".into(),
            executed: executed.map(|secs| Utc.timestamp_opt(secs, 0).unwrap()),
            user_name: String::new(),
            configuration_id: configuration_id.to_string(),
            configuration_name: String::new(),
            duration: None,
            counts: ClashCounts::default(),
        }
    }

    fn test_def(id: &str) -> TestDefinition {
        TestDefinition {
            id: id.to_string(),
            name: format!("test {}", id),
            ..TestDefinition::default()
        }
    }

    #[test]
    fn test_sort_is_stable_for_equal_timestamps() {
        let mut results = vec![
            result("a", "t", Some(100)),
            result("b", "t", Some(200)),
            result("c", "t", Some(100)),
            result("d", "t", None),
            result("e", "t", Some(200)),
        ];
        sort_by_executed_desc(&mut results);

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "e", "a", "c", "d"]);
    }

    #[test]
    fn test_changeset_name_classification() {
        assert!(is_raw_changeset_id(
            "bd5cfc4999bb906e61b2e1b36a6249599ad19456"
        ));
        assert_eq!(
            classify_version_name(Some("bd5cfc4999bb906e61b2e1b36a6249599ad19456")).as_deref(),
            Some(NO_NAMED_VERSION)
        );
        assert_eq!(
            classify_version_name(Some("Release 1.0")).as_deref(),
            Some("Release 1.0")
        );
        assert_eq!(
            classify_version_name(Some("BD5CFC4999BB906E61B2E1B36A6249599AD19456")).as_deref(),
            Some("BD5CFC4999BB906E61B2E1B36A6249599AD19456")
        );
        assert_eq!(classify_version_name(None), None);
        assert!(!is_raw_changeset_id("bd5cfc4999bb906e61b2e1b36a6249599ad1945"));
    }

    #[test]
    fn test_single_test_counts() {
        let mut latest = result("r1", "t1", Some(10));
        latest.counts = ClashCounts {
            raw_new: 5,
            raw_open: 2,
            raw_resolved: 1,
            rule_suppressed: 1,
            manually_suppressed: 0,
            dual_suppressed: 0,
        };

        let rows = aggregate(vec![test_def("t1")], vec![latest]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_clashes, 8);
        assert_eq!(rows[0].resolved_clashes, 2);
        assert_eq!(rows[0].active_clashes, 6);
        assert_eq!(rows[0].result_id.as_deref(), Some("r1"));
        assert_eq!(rows[0].status, ValidationStatus::Completed);
    }

    #[test]
    fn test_latest_result_wins() {
        let mut old = result("old", "t1", Some(10));
        old.counts.raw_new = 100;
        let mut new = result("new", "t1", Some(20));
        new.counts.raw_new = 3;
        new.version_name = Some("bd5cfc4999bb906e61b2e1b36a6249599ad19456".into());

        let rows = aggregate(vec![test_def("t1")], vec![old, new]);
        assert_eq!(rows[0].result_id.as_deref(), Some("new"));
        assert_eq!(rows[0].total_clashes, 3);
        assert_eq!(rows[0].imodel_version_name.as_deref(), Some(NO_NAMED_VERSION));
    }

    #[test]
    fn test_unrun_test_defaults_to_created() {
        let mut test = test_def("t2");
        test.created_by = Some(UserRef {
            id: "u".into(),
            name: "Robin".into(),
            email: None,
        });
        test.tag = Some(RepositoryTag::imodel("model-9"));

        let rows = aggregate(vec![test], vec![result("r1", "other", Some(5))]);
        let row = &rows[0];
        assert_eq!(row.status, ValidationStatus::Created);
        assert_eq!(row.localized_status, "Created");
        assert_eq!(row.total_clashes, 0);
        assert_eq!(row.active_clashes, 0);
        assert_eq!(row.result_id, None);
        assert_eq!(row.user, "Robin");
        assert_eq!(row.repository_id.as_deref(), Some("model-9"));
    }

    #[test]
    fn test_started_status_is_kept() {
        let mut started = result("r1", "t1", Some(1));
        started.status = ValidationStatus::Started;

        let rows = aggregate(vec![test_def("t1")], vec![started]);
        assert_eq!(rows[0].status, ValidationStatus::Started);
        assert_eq!(rows[0].localized_status, "Started");
    }

    #[test]
    fn test_indexed_join_matches_linear_scan() {
        let tests: Vec<_> = (0..6).map(|i| test_def(&format!("t{}", i))).collect();
        let results: Vec<_> = (0..30)
            .map(|i| {
                let mut r = result(
                    &format!("r{}", i),
                    &format!("t{}", i % 4),
                    Some((i * 7 % 5) as i64),
                );
                r.counts.raw_open = i;
                r
            })
            .collect();

        let rows = aggregate(tests.clone(), results.clone());

        let mut sorted = results;
        sort_by_executed_desc(&mut sorted);
        for (test, row) in tests.iter().zip(&rows) {
            let expected = sorted.iter().find(|r| r.configuration_id == test.id);
            assert_eq!(row.result_id, expected.map(|r| r.id.clone()));
            assert_eq!(
                row.active_clashes,
                row.total_clashes - row.resolved_clashes
            );
        }
    }

    #[test]
    fn test_derived_counts_invariant() {
        for raw_new in 0..4 {
            for raw_resolved in 0..4 {
                for dual in 0..3 {
                    let counts = ClashCounts {
                        raw_new,
                        raw_open: 1,
                        raw_resolved,
                        rule_suppressed: 1,
                        manually_suppressed: 0,
                        dual_suppressed: dual,
                    };
                    assert_eq!(counts.total(), raw_new + 1 + raw_resolved);
                    assert_eq!(counts.active(), counts.total() - counts.resolved());
                }
            }
        }
    }

    #[test]
    fn test_extreme_counts_saturate() {
        let mut latest = result("r1", "t1", Some(10));
        latest.counts = ClashCounts {
            raw_new: i64::MAX,
            raw_open: i64::MAX,
            raw_resolved: 1,
            rule_suppressed: i64::MIN,
            manually_suppressed: i64::MIN,
            dual_suppressed: 0,
        };

        let rows = aggregate(vec![test_def("t1")], vec![latest]);
        assert_eq!(rows[0].total_clashes, i64::MAX);
        assert_eq!(rows[0].resolved_clashes, i64::MIN);
        assert_eq!(rows[0].active_clashes, i64::MAX);

        let negative = ClashCounts {
            raw_new: i64::MIN,
            raw_resolved: i64::MAX,
            ..ClashCounts::default()
        };
        assert_eq!(negative.total(), -1);
        assert_eq!(negative.resolved(), i64::MAX);
        assert_eq!(negative.active(), i64::MIN);
    }
}
