//! Manual suppression requests and payload chunking

use serde::{Deserialize, Serialize};

use crate::model::ClashRecord;

/// Most clash pairs the results service accepts in one suppress call
pub const CLASH_SUPPRESS_MAX_PAYLOAD: usize = 50;

/// Whether a suppress call applies or removes manual suppression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressAction {
    Apply,
    Remove,
}

impl SuppressAction {
    /// Already suppressed clashes get unsuppressed, others suppressed
    pub fn for_clash(clash: &ClashRecord) -> Self {
        if clash.is_manually_suppressed {
            Self::Remove
        } else {
            Self::Apply
        }
    }
}

/// Body of one suppress call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionRequest {
    pub element_ids: Vec<[String; 2]>,
    pub reason: String,
}

/// A batch of suppress calls against one clash report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionPlan {
    pub report_id: String,
    pub action: SuppressAction,
    pub requests: Vec<SuppressionRequest>,
}

impl SuppressionPlan {
    /// Plan the calls needed to suppress `clashes`
    ///
    /// The report id and the action come from the first clash. Returns
    /// `None` for an empty selection.
    pub fn for_clashes(clashes: &[ClashRecord], reason: &str, max_payload: usize) -> Option<Self> {
        let first = clashes.first()?;
        let pairs: Vec<[String; 2]> = clashes
            .iter()
            .map(|clash| [clash.element_a_id.clone(), clash.element_b_id.clone()])
            .collect();

        Some(Self {
            report_id: first.report_id.clone(),
            action: SuppressAction::for_clash(first),
            requests: chunk_pairs(pairs, max_payload)
                .into_iter()
                .map(|element_ids| SuppressionRequest {
                    element_ids,
                    reason: reason.to_string(),
                })
                .collect(),
        })
    }
}

/// Split element pairs into consecutive chunks of at most `max_payload`
pub fn chunk_pairs(pairs: Vec<[String; 2]>, max_payload: usize) -> Vec<Vec<[String; 2]>> {
    let max_payload = max_payload.max(1);
    pairs
        .chunks(max_payload)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn clashes(count: usize) -> Vec<ClashRecord> {
        (0..count)
            .map(|i| ClashRecord {
                element_a_id: format!("0x{:x}", i * 2),
                element_b_id: format!("0x{:x}", i * 2 + 1),
                report_id: "report-1".into(),
                ..ClashRecord::default()
            })
            .collect()
    }

    #[test]
    fn test_120_clashes_make_three_calls() {
        let input = clashes(120);
        let plan = SuppressionPlan::for_clashes(&input, "reviewed", CLASH_SUPPRESS_MAX_PAYLOAD)
            .unwrap();

        let sizes: Vec<_> = plan.requests.iter().map(|r| r.element_ids.len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(plan.report_id, "report-1");
        assert_eq!(plan.action, SuppressAction::Apply);

        let mut seen = HashSet::new();
        for request in &plan.requests {
            for pair in &request.element_ids {
                assert!(seen.insert(pair.clone()), "pair sent twice: {:?}", pair);
            }
        }
        let expected: HashSet<_> = input
            .iter()
            .map(|c| [c.element_a_id.clone(), c.element_b_id.clone()])
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_empty_selection_plans_nothing() {
        assert!(SuppressionPlan::for_clashes(&[], "x", CLASH_SUPPRESS_MAX_PAYLOAD).is_none());
    }

    #[test]
    fn test_suppressed_clash_is_removed() {
        let mut input = clashes(3);
        input[0].is_manually_suppressed = true;
        let plan = SuppressionPlan::for_clashes(&input, "undo", 2).unwrap();
        assert_eq!(plan.action, SuppressAction::Remove);
        assert_eq!(plan.requests.len(), 2);
    }

    #[test]
    fn test_request_body_shape() {
        let request = SuppressionRequest {
            element_ids: vec![["0x1".into(), "0x2".into()]],
            reason: "ok".into(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"elementIds": [["0x1", "0x2"]], "reason": "ok"})
        );
    }
}
