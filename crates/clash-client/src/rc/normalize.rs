//! Conversion of typed wire shapes into canonical records

use clash_core::model::{
    resolve_label, test_type_label, Point3, ReferenceLabel, RepositoryTag, SuppressingRuleRef,
    UserRef,
};
use clash_core::{
    ClashCounts, ClashRecord, ClashResultSet, ClashTestSettings, CreatedTest, ManualSuppression,
    RuleTemplate, SuppressionRule, TestDefinition, TestRunStatus, ValidationResult,
    ValidationStatus,
};

use super::types::{
    ClashDto, CreatedDto, LabelDto, ResultByIdDto, ResultMetadataDto, RuleTemplateDto,
    RunStatusDto, StatusCountsDto, SuppressionHistoryDto, SuppressionRuleDto, TestDto, UserDto,
};
use crate::error::{ClientError, ClientResult};
use crate::lenient;

fn required(operation: &str, id: String) -> ClientResult<String> {
    if id.is_empty() {
        Err(ClientError::parse(operation, "row without id"))
    } else {
        Ok(id)
    }
}

impl From<UserDto> for UserRef {
    fn from(user: UserDto) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
        }
    }
}

impl From<LabelDto> for ReferenceLabel {
    fn from(label: LabelDto) -> Self {
        Self {
            id: label.id,
            label: label.label,
        }
    }
}

impl From<StatusCountsDto> for ClashCounts {
    fn from(counts: StatusCountsDto) -> Self {
        Self {
            raw_new: counts.new,
            raw_open: counts.open,
            raw_resolved: counts.resolved,
            rule_suppressed: counts.rs,
            manually_suppressed: counts.ms,
            dual_suppressed: counts.multi_sup,
        }
    }
}

pub fn test_definition(itwin_id: &str, test: TestDto) -> ClientResult<TestDefinition> {
    let metadata = test.user_metadata.unwrap_or_default();
    Ok(TestDefinition {
        id: required("test", test.id)?,
        name: test.name,
        description: test.description,
        context_id: itwin_id.to_string(),
        created_by: metadata.created_by.map(UserRef::from),
        created_at: test.creation_date,
        modified_by: metadata.modified_by.map(UserRef::from),
        modified_at: test.modification_date,
        rules_count: lenient::count(test.rules_count.unwrap_or(0)),
        tag: test.tag.map(|tag| RepositoryTag {
            repository_id: tag.id,
            repository_type: tag.tag_type,
        }),
        settings: ClashTestSettings {
            set_a: test.set_a,
            set_b: test.set_b,
            touching_tolerance: test.touching_tolerance,
            include_sub_models: test.include_sub_models,
            suppression_rules: test.suppression_rules,
            suppress_touching: test.suppress_touching,
            advanced_settings: test.advanced_settings,
        },
    })
}

pub fn validation_result(row: ResultMetadataDto) -> ClientResult<ValidationResult> {
    let status = row.status.unwrap_or(ValidationStatus::Created);
    Ok(ValidationResult {
        id: required("result metadata", row.id)?,
        context_id: row.itwin_id,
        imodel_id: row.repository_id,
        imodel_name: row.imodel_name,
        version_name: row.changeset_name,
        changeset_id: row.changeset_id,
        num_elements: row.num_elements,
        num_issues: row.num_issues,
        num_rules: row.num_rules,
        num_validations: row.num_validations,
        status,
        status_text: status.name().to_string(),
        test_type: test_type_label(row.configuration_type).to_string(),
        executed: row.executed,
        user_name: row.user_name,
        configuration_id: row.configuration_id,
        configuration_name: row.configuration_name,
        duration: row.duration,
        counts: row.v_statuses.map(ClashCounts::from).unwrap_or_default(),
    })
}

fn clash_record(
    clash: ClashDto,
    index: usize,
    categories: &[ReferenceLabel],
    models: &[ReferenceLabel],
    rules: &[SuppressionRule],
) -> ClashRecord {
    let sphere = clash.bounding_sphere;
    ClashRecord {
        id: index.to_string(),
        element_a_category_label: resolve_label(categories, &clash.category_id_a),
        element_b_category_label: resolve_label(categories, &clash.category_id_b),
        element_a_model_label: resolve_label(models, &clash.model_id_a),
        element_b_model_label: resolve_label(models, &clash.model_id_b),
        element_a_id: clash.element_id_a,
        element_b_id: clash.element_id_b,
        element_a_label: clash.element_label_a,
        element_b_label: clash.element_label_b,
        element_a_category_id: clash.category_id_a,
        element_b_category_id: clash.category_id_b,
        element_a_model_id: clash.model_id_a,
        element_b_model_id: clash.model_id_b,
        clash_type: clash.clash_type,
        center: Point3 {
            x: sphere.center.x,
            y: sphere.center.y,
            z: sphere.center.z,
        },
        radius: sphere.radius,
        clearance: clash.clearance,
        additional_hilitable_element_a_ids: clash.hilitable_ids_a,
        additional_hilitable_element_b_ids: clash.hilitable_ids_b,
        suppressing_rules: SuppressingRuleRef::resolve_all(&clash.suppressing_rules, rules),
        is_manually_suppressed: clash.manually_suppressed,
        suppressing_manually: Vec::new(),
        status: clash.status,
        report_id: clash.report_id,
        unique_id: clash.cuid,
    }
}

pub fn clash_result_set(
    response: ResultByIdDto,
    rules: &[SuppressionRule],
) -> ClientResult<ClashResultSet> {
    const OPERATION: &str = "result by id";
    let (Some(metadata), Some(body)) = (response.result_metadata, response.result) else {
        return Err(ClientError::no_data(OPERATION));
    };

    let categories: Vec<ReferenceLabel> =
        body.category_list.into_iter().map(ReferenceLabel::from).collect();
    let models: Vec<ReferenceLabel> =
        body.model_list.into_iter().map(ReferenceLabel::from).collect();
    let clashes = body
        .clashes
        .into_iter()
        .enumerate()
        .map(|(index, clash)| clash_record(clash, index, &categories, &models, rules))
        .collect();

    Ok(ClashResultSet {
        id: required(OPERATION, metadata.id)?,
        status: metadata.status,
        calculate_overlap: body.calculate_overlap,
        clashes,
    })
}

pub fn suppression_rule(rule: SuppressionRuleDto) -> ClientResult<SuppressionRule> {
    Ok(SuppressionRule {
        id: required("suppression rule", rule.id)?,
        template_id: rule.template_id,
        name: rule.name,
        reason: rule.reason,
        parameters: rule.parameters,
        created_by: rule.created_by.map(UserRef::from),
        created_at: rule.created_date_time,
        modified_at: rule.modified_date_time,
    })
}

pub fn rule_template(template: RuleTemplateDto) -> ClientResult<RuleTemplate> {
    Ok(RuleTemplate {
        id: required("rule template", template.id)?,
        name: template.name,
        description: template.description,
        parameters: template.parameters,
    })
}

pub fn manual_suppression(entry: SuppressionHistoryDto) -> ManualSuppression {
    ManualSuppression {
        id: entry.id,
        element_a_id: entry.element_id_a,
        element_b_id: entry.element_id_b,
        reason: entry.reason,
        user_name: entry.created_by.map(|user| user.name).unwrap_or_default(),
        created_at: entry.created_date_time,
    }
}

pub fn created_test(row: CreatedDto) -> ClientResult<CreatedTest> {
    Ok(CreatedTest {
        id: required("create tests", row.id)?,
        name: row.name,
    })
}

pub fn run_status(row: RunStatusDto) -> ClientResult<TestRunStatus> {
    match row.result_id {
        Some(result_id) => Ok(TestRunStatus {
            configuration_id: row.configuration_id,
            result_id,
        }),
        None => Err(ClientError::parse("run tests", "run status without resultId")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_status_is_created() {
        let row: ResultMetadataDto = serde_json::from_value(json!({"id": "r1"})).unwrap();
        let result = validation_result(row).unwrap();
        assert_eq!(result.status, ValidationStatus::Created);
        assert_eq!(result.status_text, "Created");
        assert_eq!(result.counts.total(), 0);
    }

    #[test]
    fn test_unknown_status_code_is_kept() {
        let row: ResultMetadataDto =
            serde_json::from_value(json!({"id": "r1", "status": 42})).unwrap();
        assert_eq!(
            validation_result(row).unwrap().status,
            ValidationStatus::Unrecognized(42)
        );
    }

    #[test]
    fn test_result_without_body_is_no_data() {
        let response: ResultByIdDto =
            serde_json::from_value(json!({"resultMetadata": {"id": "r1"}})).unwrap();
        assert!(matches!(
            clash_result_set(response, &[]),
            Err(ClientError::NoData { .. })
        ));
    }

    #[test]
    fn test_clash_labels_resolve() {
        let response: ResultByIdDto = serde_json::from_value(json!({
            "resultMetadata": {"id": "r1", "status": 1},
            "result": {
                "clashes": [{"elementAId": "0x1", "elementBId": "0x2", "elementAModelId": "0xm"}],
                "modelList": [{"id": "0xm", "label": "Structure"}],
            }
        }))
        .unwrap();
        let set = clash_result_set(response, &[]).unwrap();
        assert_eq!(set.status, Some(ValidationStatus::Completed));
        assert_eq!(set.clashes[0].element_a_model_label, "Structure");
        assert_eq!(set.clashes[0].element_b_model_label, "");
    }

    fn sparse_result() -> serde_json::Value {
        json!({
            "id": "r9",
            "iTwinId": null,
            "iModelName": 17,
            "changesetName": null,
            "numElements": "120",
            "numIssues": null,
            "status": "1",
            "configurationType": "2",
            "executed": "2024-03-05T10:00:00",
            "userName": null,
            "duration": "4.5",
            "vStatuses": {"new": "3", "open": null, "rs": 2.0, "multiSup": "x"}
        })
    }

    #[test]
    fn test_sparse_result_reads_leniently() {
        let row: ResultMetadataDto = serde_json::from_value(sparse_result()).unwrap();
        let result = validation_result(row).unwrap();
        assert_eq!(result.context_id, "");
        assert_eq!(result.imodel_name, "");
        assert_eq!(result.num_elements, 120);
        assert_eq!(result.num_issues, 0);
        assert_eq!(result.status, ValidationStatus::Completed);
        assert_eq!(result.test_type, "Clash Detection");
        assert!(result.executed.is_some());
        assert_eq!(result.duration, Some(4.5));
        assert_eq!(result.counts.raw_new, 3);
        assert_eq!(result.counts.raw_open, 0);
        assert_eq!(result.counts.rule_suppressed, 2);
        assert_eq!(result.counts.dual_suppressed, 0);
    }

    #[test]
    fn test_sparse_result_matches_raw_reader() {
        let row: ResultMetadataDto = serde_json::from_value(sparse_result()).unwrap();
        let typed = validation_result(row).unwrap();
        let raw = crate::wsg::normalize::validation_result(&sparse_result()).unwrap();
        assert_eq!(typed, raw);
    }

    #[test]
    fn test_normalizing_twice_gives_the_same_records() {
        let read = || {
            let row: ResultMetadataDto = serde_json::from_value(sparse_result()).unwrap();
            validation_result(row).unwrap()
        };
        assert_eq!(read(), read());

        let test = json!({
            "id": "t1",
            "name": null,
            "userMetadata": {"createdBy": null, "modifiedBy": "someone"},
            "rulesCount": "9999999999",
            "creationDate": "2024-01-02T03:04:05",
            "suppressionRules": null,
            "touchingTolerance": "0.5",
            "tag": null
        });
        let read_test = || {
            let dto: TestDto = serde_json::from_value(test.clone()).unwrap();
            test_definition("itwin", dto).unwrap()
        };
        let first = read_test();
        assert_eq!(first, read_test());
        assert_eq!(first.rules_count, u32::MAX);
        assert_eq!(first.created_by, None);
        assert_eq!(first.modified_by, None);
        assert_eq!(first.settings.touching_tolerance, 0.5);
        assert_eq!(
            first,
            crate::wsg::normalize::test_definition("itwin", &test).unwrap()
        );

        let body = json!({
            "resultMetadata": {"id": "r1", "status": null},
            "result": {
                "clashes": [{"elementAId": "0x1", "boundingSphere": null, "clearance": "0.1"}],
                "categoryList": null,
                "modelList": [{"id": "0xm", "label": null}],
            }
        });
        let read_set = || {
            let dto: ResultByIdDto = serde_json::from_value(body.clone()).unwrap();
            clash_result_set(dto, &[]).unwrap()
        };
        let set = read_set();
        assert_eq!(set, read_set());
        assert_eq!(set.status, None);
        assert_eq!(set.clashes[0].radius, 0.0);
        assert_eq!(set, crate::wsg::normalize::clash_result_set(&body, &[]).unwrap());
    }

    #[test]
    fn test_out_of_range_status_is_unrecognized() {
        let row: ResultMetadataDto =
            serde_json::from_value(json!({"id": "r1", "status": 4294967297i64})).unwrap();
        assert_eq!(
            validation_result(row).unwrap().status,
            ValidationStatus::Unrecognized(i32::MAX)
        );
    }
}
