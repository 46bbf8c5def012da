//! Ingestion boundary for analyzer output.
//!
//! External analyzers hand us loosely-shaped records (JSON with optional and
//! unknown fields). Everything is validated into the strict [`Issue`] shape
//! here so the rest of the engine never deals with partial data.

use crate::types::{
    FixStrategy, Id, Issue, IssueCategory, IssueContext, Resolution, RiskLevel, Severity,
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("issue {index}: missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },
    #[error("issue {index}: unknown category `{value}`")]
    UnknownCategory { index: usize, value: String },
    #[error("issue {index}: unknown severity `{value}`")]
    UnknownSeverity { index: usize, value: String },
    #[error("issue {index}: unknown risk level `{value}`")]
    UnknownRisk { index: usize, value: String },
    #[error("issue {index}: confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange { index: usize, value: f64 },
    #[error("failed to parse issue list: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Loose issue record as emitted by an analyzer adapter.
///
/// Unknown fields are ignored; missing fields surface as explicit
/// [`IngestError`]s during validation instead of silent defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawIssue {
    pub id: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub rule: Option<String>,
    pub category: Option<String>,
    pub secondary_category: Option<String>,
    pub severity: Option<String>,
    pub auto_fixable: Option<bool>,
    pub strategy: Option<String>,
    pub confidence: Option<f64>,
    pub risk: Option<String>,
    pub risk_sensitive: Option<bool>,
    pub test_file: Option<bool>,
}

/// Validate a single raw record into a strict [`Issue`].
///
/// `index` is the record's position in the input, used for error context.
pub fn validate_issue(raw: &RawIssue, index: usize) -> Result<Issue> {
    let file = raw
        .file
        .clone()
        .filter(|f| !f.is_empty())
        .ok_or(IngestError::MissingField {
            index,
            field: "file",
        })?;
    let rule = raw
        .rule
        .clone()
        .filter(|r| !r.is_empty())
        .ok_or(IngestError::MissingField {
            index,
            field: "rule",
        })?;

    let category_str = raw.category.as_deref().ok_or(IngestError::MissingField {
        index,
        field: "category",
    })?;
    let category =
        IssueCategory::parse(category_str).ok_or_else(|| IngestError::UnknownCategory {
            index,
            value: category_str.to_string(),
        })?;

    let secondary_category = match raw.secondary_category.as_deref() {
        Some(s) => Some(
            IssueCategory::parse(s).ok_or_else(|| IngestError::UnknownCategory {
                index,
                value: s.to_string(),
            })?,
        ),
        None => None,
    };

    let severity = match raw.severity.as_deref() {
        Some("error") => Severity::Error,
        Some("warning") => Severity::Warning,
        Some(other) => {
            return Err(IngestError::UnknownSeverity {
                index,
                value: other.to_string(),
            })
        }
        None => Severity::Warning,
    };

    // Strategy defaults to manual review: an unlabeled issue is never
    // auto-fixed.
    let strategy = match raw.strategy.as_deref() {
        Some("auto_fix") => FixStrategy::AutoFix,
        _ => FixStrategy::ManualReview,
    };

    let confidence = raw.confidence.unwrap_or(0.0);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(IngestError::ConfidenceOutOfRange {
            index,
            value: confidence,
        });
    }

    let risk = match raw.risk.as_deref() {
        Some(s) => RiskLevel::parse(s).ok_or_else(|| IngestError::UnknownRisk {
            index,
            value: s.to_string(),
        })?,
        None => RiskLevel::High,
    };

    Ok(Issue {
        id: raw
            .id
            .clone()
            .map_or_else(Id::new, Id::from_string),
        file,
        line: raw.line.unwrap_or(0),
        column: raw.column.unwrap_or(0),
        rule,
        category,
        secondary_category,
        severity,
        auto_fixable: raw.auto_fixable.unwrap_or(false),
        resolution: Resolution {
            strategy,
            confidence,
            risk,
        },
        context: IssueContext {
            risk_sensitive: raw.risk_sensitive.unwrap_or(false),
            test_file: raw.test_file.unwrap_or(false),
        },
    })
}

/// Parse and validate a JSON array of raw issues.
pub fn parse_issues(json: &str) -> Result<Vec<Issue>> {
    let raw: Vec<RawIssue> = serde_json::from_str(json)?;
    raw.iter()
        .enumerate()
        .map(|(i, r)| validate_issue(r, i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_ok() -> RawIssue {
        RawIssue {
            id: Some("i-1".into()),
            file: Some("src/app.ts".into()),
            line: Some(12),
            column: Some(3),
            rule: Some("no-unused-vars".into()),
            category: Some("unused_symbol".into()),
            severity: Some("warning".into()),
            auto_fixable: Some(true),
            strategy: Some("auto_fix".into()),
            confidence: Some(0.9),
            risk: Some("low".into()),
            ..RawIssue::default()
        }
    }

    #[test]
    fn valid_record_becomes_issue() {
        let issue = validate_issue(&raw_ok(), 0).unwrap();
        assert_eq!(issue.file, "src/app.ts");
        assert_eq!(issue.category, IssueCategory::UnusedSymbol);
        assert_eq!(issue.resolution.strategy, FixStrategy::AutoFix);
        assert!(issue.auto_fixable);
    }

    #[test]
    fn missing_file_is_rejected() {
        let mut raw = raw_ok();
        raw.file = None;
        let err = validate_issue(&raw, 3).unwrap_err();
        assert!(matches!(
            err,
            IngestError::MissingField { index: 3, field: "file" }
        ));
    }

    #[test]
    fn unknown_category_is_rejected() {
        let mut raw = raw_ok();
        raw.category = Some("vibes".into());
        assert!(matches!(
            validate_issue(&raw, 0).unwrap_err(),
            IngestError::UnknownCategory { .. }
        ));
    }

    #[test]
    fn confidence_outside_unit_interval_is_rejected() {
        let mut raw = raw_ok();
        raw.confidence = Some(1.5);
        assert!(matches!(
            validate_issue(&raw, 0).unwrap_err(),
            IngestError::ConfidenceOutOfRange { .. }
        ));
    }

    #[test]
    fn unlabeled_strategy_defaults_to_manual_review() {
        let mut raw = raw_ok();
        raw.strategy = None;
        raw.risk = None;
        let issue = validate_issue(&raw, 0).unwrap();
        assert_eq!(issue.resolution.strategy, FixStrategy::ManualReview);
        // Unlabeled risk is treated as high, never low.
        assert_eq!(issue.resolution.risk, RiskLevel::High);
    }

    #[test]
    fn parse_issues_ignores_unknown_fields() {
        let json = r#"[
            {"file":"a.ts","rule":"r1","category":"formatting",
             "severity":"warning","novel_analyzer_field":true}
        ]"#;
        let issues = parse_issues(json).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, IssueCategory::Formatting);
    }

    #[test]
    fn parse_issues_reports_index_of_bad_record() {
        let json = r#"[
            {"file":"a.ts","rule":"r1","category":"formatting"},
            {"file":"b.ts","rule":"r2","category":"nope"}
        ]"#;
        let err = parse_issues(json).unwrap_err();
        assert!(matches!(err, IngestError::UnknownCategory { index: 1, .. }));
    }
}
