//! Structural comparison of the two clients' canonical outputs

use serde_json::Value;
use std::collections::HashSet;

/// Result of comparing the RC and WSG outputs of one operation
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub operation: String,
    pub passed: bool,
    pub differences: Vec<Difference>,
}

/// A specific difference between outputs
#[derive(Debug, Clone)]
pub struct Difference {
    pub category: DiffCategory,
    pub path: String,
    pub rc_value: String,
    pub wsg_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiffCategory {
    Structure,
    Value,
    Missing,
    Extra,
}

impl std::fmt::Display for DiffCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffCategory::Structure => write!(f, "STRUCTURE"),
            DiffCategory::Value => write!(f, "VALUE"),
            DiffCategory::Missing => write!(f, "MISSING"),
            DiffCategory::Extra => write!(f, "EXTRA"),
        }
    }
}

/// Options for comparing outputs
#[derive(Debug, Clone, Default)]
pub struct CompareOptions {
    /// Fields to skip: a full dotted path, or a key name skipped at any depth
    pub ignore_fields: HashSet<String>,
}

impl CompareOptions {
    pub fn new() -> Self {
        let mut opts = Self::default();
        // Clock-derived values
        for field in ["createdAt", "modifiedAt", "executed", "lastExecutedDate"] {
            opts.ignore_fields.insert(field.to_string());
        }
        opts
    }

    pub fn ignore_field(mut self, field: &str) -> Self {
        self.ignore_fields.insert(field.to_string());
        self
    }

    fn ignores(&self, path: &str) -> bool {
        let path = path.trim_start_matches('.');
        if self.ignore_fields.contains(path) {
            return true;
        }
        let key = path.rsplit('.').next().unwrap_or(path);
        !key.ends_with(']') && self.ignore_fields.contains(key)
    }
}

/// Compare the serialized outputs of both clients
pub fn compare_outputs(
    operation: &str,
    rc: &Value,
    wsg: &Value,
    options: &CompareOptions,
) -> ComparisonResult {
    let mut differences = Vec::new();
    compare_json("", rc, wsg, options, &mut differences);

    ComparisonResult {
        operation: operation.to_string(),
        passed: differences.is_empty(),
        differences,
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn compare_json(
    path: &str,
    rc: &Value,
    wsg: &Value,
    options: &CompareOptions,
    differences: &mut Vec<Difference>,
) {
    if !path.is_empty() && options.ignores(path) {
        return;
    }

    match (rc, wsg) {
        (Value::Object(rc_obj), Value::Object(wsg_obj)) => {
            for (key, rc_value) in rc_obj {
                let new_path = child_path(path, key);
                if options.ignores(&new_path) {
                    continue;
                }

                match wsg_obj.get(key) {
                    Some(wsg_value) => {
                        compare_json(&new_path, rc_value, wsg_value, options, differences);
                    }
                    None => {
                        differences.push(Difference {
                            category: DiffCategory::Missing,
                            path: new_path,
                            rc_value: rc_value.to_string(),
                            wsg_value: "(missing)".to_string(),
                        });
                    }
                }
            }

            for (key, wsg_value) in wsg_obj {
                let new_path = child_path(path, key);
                if !rc_obj.contains_key(key) && !options.ignores(&new_path) {
                    differences.push(Difference {
                        category: DiffCategory::Extra,
                        path: new_path,
                        rc_value: "(not present)".to_string(),
                        wsg_value: wsg_value.to_string(),
                    });
                }
            }
        }
        (Value::Array(rc_arr), Value::Array(wsg_arr)) => {
            if rc_arr.len() != wsg_arr.len() {
                differences.push(Difference {
                    category: DiffCategory::Structure,
                    path: format!("{}.length", path),
                    rc_value: rc_arr.len().to_string(),
                    wsg_value: wsg_arr.len().to_string(),
                });
            }

            for (i, (rc_elem, wsg_elem)) in rc_arr.iter().zip(wsg_arr.iter()).enumerate() {
                let new_path = format!("{}[{}]", path, i);
                compare_json(&new_path, rc_elem, wsg_elem, options, differences);
            }
        }
        _ => {
            if rc != wsg {
                differences.push(Difference {
                    category: DiffCategory::Value,
                    path: path.to_string(),
                    rc_value: rc.to_string(),
                    wsg_value: wsg.to_string(),
                });
            }
        }
    }
}
