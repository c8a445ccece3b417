//! Aggregate consistency validation.
//!
//! The validator reconstructs a submission from the flat tables (the
//! canonical form), loads the cached aggregate copy, and reports any
//! structural difference between the two documents. Drift is reported,
//! never repaired here: correction is a separate maintenance action.

use crate::error::Result;
use crate::loader::SubmissionLoader;
use disclosure_db_store::submission;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::error;

/// One structural difference between canonical and aggregate documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Difference {
    pub kind: DifferenceKind,
    /// Dotted path of the differing key.
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    Added,
    Removed,
    Changed,
}

/// Drift found for one submission.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub submission_id: i64,
    pub differences: Vec<Difference>,
}

/// Result of a paged validation run.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub offset: i64,
    pub limit: i64,
    pub total: i64,
    pub invalid_submissions: Vec<DriftReport>,
}

/// Recompute-and-diff validator over the aggregate cache.
pub struct AggregateValidator {
    loader: SubmissionLoader,
}

impl AggregateValidator {
    pub fn new(loader: SubmissionLoader) -> Self {
        AggregateValidator { loader }
    }

    /// Validate one submission. `None` means the aggregate matches the
    /// canonical reconstruction.
    pub async fn validate(&self, submission_id: i64) -> Result<Option<DriftReport>> {
        let canonical = self.loader.load(submission_id, false, true).await?;
        let aggregated = self.loader.load(submission_id, true, false).await?;

        let canonical = serde_json::to_value(&canonical)?;
        let aggregated = serde_json::to_value(&aggregated)?;
        let differences = json_diff(&canonical, &aggregated, "");
        if differences.is_empty() {
            return Ok(None);
        }
        error!(
            submission_id,
            differences = differences.len(),
            "aggregate drift detected"
        );
        Ok(Some(DriftReport {
            submission_id,
            differences,
        }))
    }

    /// Validate a page of submissions ordered by id.
    pub async fn validate_page(&self, offset: i64, limit: i64) -> Result<ValidationReport> {
        let pool = self.loader.pool();
        let total = submission::count_all(pool).await?;
        let ids = submission::page_ids(pool, offset, limit).await?;
        let mut invalid_submissions = Vec::new();
        for id in ids {
            if let Some(report) = self.validate(id).await? {
                invalid_submissions.push(report);
            }
        }
        Ok(ValidationReport {
            offset,
            limit,
            total,
            invalid_submissions,
        })
    }
}

/// Structural diff of two JSON documents: added/removed/changed keys with
/// dotted paths.
pub fn json_diff(canonical: &JsonValue, other: &JsonValue, path: &str) -> Vec<Difference> {
    let mut differences = Vec::new();
    diff_into(canonical, other, path, &mut differences);
    differences
}

fn diff_into(canonical: &JsonValue, other: &JsonValue, path: &str, out: &mut Vec<Difference>) {
    match (canonical, other) {
        (JsonValue::Object(a), JsonValue::Object(b)) => {
            for (key, value) in a {
                let child = join(path, key);
                match b.get(key) {
                    Some(other_value) => diff_into(value, other_value, &child, out),
                    None => out.push(Difference {
                        kind: DifferenceKind::Removed,
                        path: child,
                    }),
                }
            }
            for key in b.keys() {
                if !a.contains_key(key) {
                    out.push(Difference {
                        kind: DifferenceKind::Added,
                        path: join(path, key),
                    });
                }
            }
        }
        (JsonValue::Array(a), JsonValue::Array(b)) => {
            for (i, (left, right)) in a.iter().zip(b.iter()).enumerate() {
                diff_into(left, right, &join(path, &i.to_string()), out);
            }
            if a.len() > b.len() {
                for i in b.len()..a.len() {
                    out.push(Difference {
                        kind: DifferenceKind::Removed,
                        path: join(path, &i.to_string()),
                    });
                }
            } else {
                for i in a.len()..b.len() {
                    out.push(Difference {
                        kind: DifferenceKind::Added,
                        path: join(path, &i.to_string()),
                    });
                }
            }
        }
        (left, right) => {
            if left != right {
                out.push(Difference {
                    kind: DifferenceKind::Changed,
                    path: path.to_string(),
                });
            }
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_documents_have_no_differences() {
        let doc = json!({"values": {"a": 1, "b": [1, 2, {"c": 3}]}});
        assert!(json_diff(&doc, &doc, "").is_empty());
    }

    #[test]
    fn changed_scalar_is_reported_with_path() {
        let a = json!({"values": {"total_emissions": 100}});
        let b = json!({"values": {"total_emissions": 90}});
        let differences = json_diff(&a, &b, "");
        assert_eq!(
            differences,
            vec![Difference {
                kind: DifferenceKind::Changed,
                path: "values.total_emissions".into()
            }]
        );
    }

    #[test]
    fn added_and_removed_keys_are_reported() {
        let a = json!({"values": {"kept": 1, "gone": 2}});
        let b = json!({"values": {"kept": 1, "extra": 3}});
        let differences = json_diff(&a, &b, "");
        assert!(differences.contains(&Difference {
            kind: DifferenceKind::Removed,
            path: "values.gone".into()
        }));
        assert!(differences.contains(&Difference {
            kind: DifferenceKind::Added,
            path: "values.extra".into()
        }));
    }

    #[test]
    fn array_length_differences_are_reported() {
        let a = json!({"rows": [1, 2, 3]});
        let b = json!({"rows": [1, 2]});
        let differences = json_diff(&a, &b, "");
        assert_eq!(
            differences,
            vec![Difference {
                kind: DifferenceKind::Removed,
                path: "rows.2".into()
            }]
        );
    }
}
