//! Wire-shaped sample rows for seeding the stub

use serde_json::{json, Value};

/// A clash test row bound to `imodel_id`; the stub assigns the id if absent
pub fn test_row(name: &str, imodel_id: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{} description", name),
        "userMetadata": {
            "createdBy": {"id": "u-1", "name": "Alex Reviewer", "email": "alex@example.com"},
            "modifiedBy": {"id": "u-2", "name": "Sam Modeler", "email": "sam@example.com"}
        },
        "creationDate": "2024-03-01T10:00:00Z",
        "modificationDate": "2024-03-02T11:30:00Z",
        "rulesCount": 1,
        "tag": {"id": imodel_id, "type": "iModels"},
        "setA": {"modelIds": ["0x20000000001"], "categoryIds": [], "selfCheck": false},
        "setB": {"modelIds": ["0x20000000002"], "categoryIds": [], "selfCheck": false},
        "touchingTolerance": 0.01,
        "includeSubModels": false,
        "suppressionRules": ["rule-1"],
        "suppressTouching": true,
        "advancedSettings": {"longClearance": 0, "calculateOverlap": true}
    })
}

/// Result metadata row for a run of `configuration_id`
pub fn result_metadata(
    id: &str,
    configuration_id: &str,
    imodel_id: &str,
    executed: &str,
    counts: [i64; 6],
) -> Value {
    let [new, open, resolved, rs, ms, multi_sup] = counts;
    json!({
        "id": id,
        "iTwinId": "",
        "repositoryId": imodel_id,
        "iModelName": "Stub iModel",
        "changesetName": "9d4a4c92c929c4eee7dd879fb9af519d9fa027e5",
        "changesetId": "9d4a4c92c929c4eee7dd879fb9af519d9fa027e5",
        "numElements": 120,
        "numIssues": new + open + resolved,
        "numRules": 1,
        "numValidations": 1,
        "status": 1,
        "configurationType": 2,
        "executed": executed,
        "userName": "Alex Reviewer",
        "configurationId": configuration_id,
        "configurationName": "Walls vs ducts",
        "duration": 12.5,
        "vStatuses": {
            "new": new,
            "open": open,
            "resolved": resolved,
            "rs": rs,
            "ms": ms,
            "multiSup": multi_sup
        }
    })
}

/// One clash between two numbered elements
pub fn clash(index: usize, report_id: &str) -> Value {
    let a = 0x1000 + index * 2;
    let b = a + 1;
    json!({
        "elementAId": format!("0x{:x}", a),
        "elementBId": format!("0x{:x}", b),
        "elementALabel": format!("Wall [{}]", a),
        "elementBLabel": format!("Duct [{}]", b),
        "elementACategoryId": "0xc1",
        "elementBCategoryId": "0xc2",
        "elementAModelId": "0xm1",
        "elementBModelId": "0xm9",
        "clashType": "Collision",
        "boundingSphere": {"center": {"x": index as f64, "y": 1.5, "z": -2.0}, "radius": 0.25},
        "clearance": 0.0,
        "additionalHilitableElementAIds": [],
        "additionalHilitableElementBIds": [],
        "suppressingRules": ["rule-1"],
        "isMSupp": false,
        "status": 0,
        "clashReportId": report_id,
        "cuid": format!("cuid-{}", index)
    })
}

/// Body of a result by id holding `count` clashes of one report
///
/// Model `0xm9` is left out of the model list so its label stays empty.
pub fn result_body(count: usize, report_id: &str) -> Value {
    let clashes: Vec<Value> = (0..count).map(|i| clash(i, report_id)).collect();
    json!({
        "clashes": clashes,
        "categoryList": [
            {"id": "0xc1", "label": "Walls"},
            {"id": "0xc2", "label": "Ducts"}
        ],
        "modelList": [{"id": "0xm1", "label": "Architecture"}],
        "calculateOverlap": true
    })
}

pub fn suppression_rule_row(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "templateId": "c9767f64-cdda-4fec-be02-0f5ca05a430d",
        "name": name,
        "reason": "known overlap",
        "parameters": {"likeExpression1": {"value": "boxes"}},
        "createdBy": {"id": "u-1", "name": "Alex Reviewer", "email": "alex@example.com"},
        "createdDateTime": "2024-02-01T09:00:00Z",
        "modifiedDateTime": "2024-02-01T09:00:00Z"
    })
}

pub fn rule_template_row(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "description": format!("{} template", name),
        "parameters": {"likeExpression1": {"type": "string"}}
    })
}
