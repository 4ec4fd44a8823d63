//! Data quality checks and the verdict they produce.
//!
//! Evaluation is a pure function of the scanned rows: the same rows and the
//! same checks always give the same verdict.

use crate::model::Row;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// A single quality predicate over a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QualityCheck {
    /// Column has no nulls (missing counts as null)
    NotNull { column: String },
    /// Non-null values of the column are unique
    Unique { column: String },
    /// Table holds at least `min` rows
    MinRows { min: usize },
    /// Non-null values of the column are in an allowed set
    AcceptedValues { column: String, values: Vec<Value> },
    /// Every row carries the column (the value may be null)
    ColumnPresent { column: String },
}

impl QualityCheck {
    /// Shorthand for a not-null check.
    pub fn not_null(column: impl Into<String>) -> Self {
        QualityCheck::NotNull {
            column: column.into(),
        }
    }

    /// Shorthand for a uniqueness check.
    pub fn unique(column: impl Into<String>) -> Self {
        QualityCheck::Unique {
            column: column.into(),
        }
    }

    /// Columns the check needs to read.
    pub fn column(&self) -> Option<&str> {
        match self {
            QualityCheck::NotNull { column }
            | QualityCheck::Unique { column }
            | QualityCheck::AcceptedValues { column, .. }
            | QualityCheck::ColumnPresent { column } => Some(column),
            QualityCheck::MinRows { .. } => None,
        }
    }

    /// Evaluate the check against scanned rows.
    pub fn evaluate(&self, rows: &[Row]) -> CheckDiagnostic {
        let violating_rows = match self {
            QualityCheck::NotNull { column } => rows
                .iter()
                .filter(|row| row.get(column).map_or(true, Value::is_null))
                .count(),
            QualityCheck::Unique { column } => {
                let mut seen = HashSet::new();
                rows.iter()
                    .filter_map(|row| row.get(column).filter(|v| !v.is_null()))
                    .filter(|value| !seen.insert(value.to_string()))
                    .count()
            }
            QualityCheck::MinRows { min } => min.saturating_sub(rows.len()),
            QualityCheck::AcceptedValues { column, values } => rows
                .iter()
                .filter_map(|row| row.get(column).filter(|v| !v.is_null()))
                .filter(|value| !values.contains(value))
                .count(),
            QualityCheck::ColumnPresent { column } => {
                rows.iter().filter(|row| !row.contains_key(column)).count()
            }
        };

        let passed = violating_rows == 0;
        let message = match (self, passed) {
            (_, true) => format!("{} passed on {} rows", self, rows.len()),
            (QualityCheck::MinRows { min }, false) => {
                format!("expected at least {} rows, found {}", min, rows.len())
            }
            (QualityCheck::Unique { column }, false) => {
                format!("{} duplicate values in {}", violating_rows, column)
            }
            (_, false) => format!("{} of {} rows violate {}", violating_rows, rows.len(), self),
        };

        CheckDiagnostic {
            check: self.to_string(),
            passed,
            violating_rows,
            message,
        }
    }
}

impl fmt::Display for QualityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityCheck::NotNull { column } => write!(f, "not_null({})", column),
            QualityCheck::Unique { column } => write!(f, "unique({})", column),
            QualityCheck::MinRows { min } => write!(f, "min_rows({})", min),
            QualityCheck::AcceptedValues { column, values } => {
                write!(f, "accepted_values({}, {} values)", column, values.len())
            }
            QualityCheck::ColumnPresent { column } => write!(f, "column_present({})", column),
        }
    }
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDiagnostic {
    /// Check name, e.g. `not_null(order_id)`
    pub check: String,
    /// Whether the check passed
    pub passed: bool,
    /// Rows (or missing rows for `min_rows`) that violate the check
    pub violating_rows: usize,
    /// Human readable summary
    pub message: String,
}

/// Pass or fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Pass,
    Fail,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictStatus::Pass => f.write_str("PASS"),
            VerdictStatus::Fail => f.write_str("FAIL"),
        }
    }
}

/// Outcome of auditing a staging area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Overall status; FAIL if any check failed
    pub status: VerdictStatus,
    /// One diagnostic per evaluated check
    pub diagnostics: Vec<CheckDiagnostic>,
    /// Rows read by the audit
    pub rows_scanned: usize,
    /// When the audit ran
    pub evaluated_at: DateTime<Utc>,
}

impl Verdict {
    /// Build a verdict from per-check diagnostics.
    pub fn from_diagnostics(diagnostics: Vec<CheckDiagnostic>, rows_scanned: usize) -> Self {
        let status = if diagnostics.iter().all(|d| d.passed) {
            VerdictStatus::Pass
        } else {
            VerdictStatus::Fail
        };
        Self {
            status,
            diagnostics,
            rows_scanned,
            evaluated_at: Utc::now(),
        }
    }

    /// Whether every check passed.
    pub fn passed(&self) -> bool {
        self.status == VerdictStatus::Pass
    }

    /// Diagnostics of the checks that failed.
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckDiagnostic> {
        self.diagnostics.iter().filter(|d| !d.passed)
    }
}

/// Evaluate all checks against the same rows.
pub fn evaluate_all(checks: &[QualityCheck], rows: &[Row]) -> Verdict {
    let diagnostics = checks.iter().map(|check| check.evaluate(rows)).collect();
    Verdict::from_diagnostics(diagnostics, rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_not_null_counts_nulls_and_missing() {
        let rows = vec![
            row(&[("order_id", json!(1))]),
            row(&[("order_id", Value::Null)]),
            row(&[("amount", json!(3))]),
        ];

        let diagnostic = QualityCheck::not_null("order_id").evaluate(&rows);
        assert!(!diagnostic.passed);
        assert_eq!(diagnostic.violating_rows, 2);
        assert_eq!(diagnostic.check, "not_null(order_id)");
    }

    #[test]
    fn test_unique_ignores_nulls() {
        let rows = vec![
            row(&[("id", json!(1))]),
            row(&[("id", json!(1))]),
            row(&[("id", json!(2))]),
            row(&[("id", Value::Null)]),
            row(&[("id", Value::Null)]),
        ];

        let diagnostic = QualityCheck::unique("id").evaluate(&rows);
        assert_eq!(diagnostic.violating_rows, 1);
        assert!(diagnostic.message.contains("duplicate"));
    }

    #[test]
    fn test_min_rows() {
        let rows = vec![row(&[]), row(&[])];
        assert!(QualityCheck::MinRows { min: 2 }.evaluate(&rows).passed);

        let diagnostic = QualityCheck::MinRows { min: 5 }.evaluate(&rows);
        assert!(!diagnostic.passed);
        assert_eq!(diagnostic.violating_rows, 3);
    }

    #[test]
    fn test_accepted_values() {
        let check = QualityCheck::AcceptedValues {
            column: "status".into(),
            values: vec![json!("open"), json!("closed")],
        };
        let rows = vec![
            row(&[("status", json!("open"))]),
            row(&[("status", json!("lost"))]),
            row(&[("status", Value::Null)]),
        ];
        assert_eq!(check.evaluate(&rows).violating_rows, 1);
    }

    #[test]
    fn test_column_present_allows_null() {
        let check = QualityCheck::ColumnPresent {
            column: "note".into(),
        };
        let rows = vec![row(&[("note", Value::Null)]), row(&[("other", json!(1))])];
        assert_eq!(check.evaluate(&rows).violating_rows, 1);
    }

    #[test]
    fn test_verdict_names_failed_checks() {
        let rows = vec![row(&[("order_id", Value::Null)])];
        let verdict = evaluate_all(
            &[QualityCheck::not_null("order_id"), QualityCheck::MinRows { min: 1 }],
            &rows,
        );

        assert_eq!(verdict.status, VerdictStatus::Fail);
        let failed: Vec<_> = verdict.failed_checks().map(|d| d.check.as_str()).collect();
        assert_eq!(failed, vec!["not_null(order_id)"]);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let rows = vec![row(&[("id", json!(1))]), row(&[("id", json!(1))])];
        let checks = [QualityCheck::unique("id"), QualityCheck::not_null("id")];

        let a = evaluate_all(&checks, &rows);
        let b = evaluate_all(&checks, &rows);
        assert_eq!(a.status, b.status);
        assert_eq!(a.diagnostics, b.diagnostics);
    }

    #[test]
    fn test_checks_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            checks: Vec<QualityCheck>,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
            [[checks]]
            type = "not_null"
            column = "pickup_datetime"

            [[checks]]
            type = "min_rows"
            min = 10
            "#,
        )
        .unwrap();

        assert_eq!(
            parsed.checks,
            vec![
                QualityCheck::not_null("pickup_datetime"),
                QualityCheck::MinRows { min: 10 }
            ]
        );
    }
}
