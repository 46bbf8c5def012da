//! Quality gate: deployment-readiness verdict over a metrics snapshot.
//!
//! Pure evaluation, no side effects. Hard blockers (compiler errors,
//! blocked rules) force failure regardless of how good the aggregate
//! numbers look.

use sweep_core::config::GateThresholds;
use sweep_core::types::{
    ComprehensiveValidationResult, GateResult, QualityMetrics, RiskLevel, ThresholdViolation,
};
use tracing::info;

/// Aggregated evidence the gate evaluates, folded from the campaign's
/// validation runs and remaining backlog.
#[derive(Debug, Clone, Default)]
pub struct GateInput {
    pub total_errors: u32,
    pub total_warnings: u32,
    /// Duration of the slowest single check observed.
    pub slowest_check_ms: u64,
    /// Validation pass rate in [0, 1].
    pub success_rate: f64,
    pub compiler_errors: u32,
    /// Rule ids still present in the remaining backlog.
    pub remaining_rules: Vec<String>,
}

impl GateInput {
    /// Fold validation history and the remaining backlog into gate evidence.
    pub fn from_validations(
        validations: &[ComprehensiveValidationResult],
        remaining_rules: Vec<String>,
    ) -> Self {
        let mut input = Self {
            remaining_rules,
            success_rate: 1.0,
            ..Self::default()
        };

        let mut passed = 0u32;
        for validation in validations {
            if validation.passed {
                passed += 1;
            }
            for result in &validation.results {
                input.total_errors += result.errors.len() as u32;
                input.total_warnings += result.warnings.len() as u32;
                input.slowest_check_ms = input.slowest_check_ms.max(result.duration_ms);
                if result.kind == sweep_core::types::CheckKind::Compilation && !result.passed {
                    input.compiler_errors += result.errors.len().max(1) as u32;
                }
            }
        }
        if !validations.is_empty() {
            input.success_rate = f64::from(passed) / validations.len() as f64;
        }
        input
    }
}

/// Evaluate deployment readiness.
pub fn evaluate(
    metrics: &QualityMetrics,
    input: &GateInput,
    thresholds: &GateThresholds,
) -> GateResult {
    let mut violations = Vec::new();
    let mut blockers = Vec::new();
    let mut recommendations = Vec::new();

    // Hard blockers first. Any compiler error is non-negotiable.
    if input.compiler_errors > 0 {
        blockers.push(format!(
            "{} compiler error(s) present",
            input.compiler_errors
        ));
        recommendations.push("resolve all compiler errors before deploying".to_string());
    }
    for rule in &thresholds.blocked_rules {
        if input.remaining_rules.iter().any(|r| r == rule) {
            blockers.push(format!("blocked rule still present: {rule}"));
        }
    }

    if input.total_errors > thresholds.max_errors {
        violations.push(ThresholdViolation {
            name: "max_errors".to_string(),
            limit: f64::from(thresholds.max_errors),
            actual: f64::from(input.total_errors),
        });
    }
    if input.total_warnings > thresholds.max_warnings {
        violations.push(ThresholdViolation {
            name: "max_warnings".to_string(),
            limit: f64::from(thresholds.max_warnings),
            actual: f64::from(input.total_warnings),
        });
        recommendations.push("burn down the warning backlog below the threshold".to_string());
    }
    if input.slowest_check_ms > thresholds.max_duration_ms {
        violations.push(ThresholdViolation {
            name: "max_duration_ms".to_string(),
            limit: thresholds.max_duration_ms as f64,
            actual: input.slowest_check_ms as f64,
        });
        recommendations.push("investigate the slowest validation check".to_string());
    }
    if input.success_rate < thresholds.min_success_rate {
        violations.push(ThresholdViolation {
            name: "min_success_rate".to_string(),
            limit: thresholds.min_success_rate,
            actual: input.success_rate,
        });
        recommendations
            .push("validation pass rate is below target, reduce batch size".to_string());
    }

    let passed = blockers.is_empty() && violations.is_empty();

    let risk = if !blockers.is_empty() || violations.len() >= 3 {
        RiskLevel::High
    } else if !violations.is_empty() || !metrics.stability_target_met {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    info!(
        passed,
        risk = risk.as_str(),
        violations = violations.len(),
        blockers = blockers.len(),
        overall_score = metrics.overall_score,
        "quality gate evaluated"
    );

    GateResult {
        passed,
        deployment_approved: passed,
        risk,
        violations,
        blockers,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_core::types::{CheckKind, ValidationResult};

    fn healthy_metrics() -> QualityMetrics {
        QualityMetrics {
            timestamp: None,
            issue_reduction_pct: 95.0,
            build_stability: 100,
            domain_integrity: 100,
            overall_score: 97,
            reduction_target_met: true,
            stability_target_met: true,
            remaining_issues: 5,
        }
    }

    #[test]
    fn clean_input_passes_with_low_risk() {
        let result = evaluate(
            &healthy_metrics(),
            &GateInput {
                success_rate: 1.0,
                ..GateInput::default()
            },
            &GateThresholds::default(),
        );
        assert!(result.passed);
        assert!(result.deployment_approved);
        assert_eq!(result.risk, RiskLevel::Low);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn single_error_over_zero_threshold_fails_the_gate() {
        // Default thresholds allow zero errors.
        let input = GateInput {
            total_errors: 1,
            success_rate: 1.0,
            ..GateInput::default()
        };
        let result = evaluate(&healthy_metrics(), &input, &GateThresholds::default());
        assert!(!result.passed);
        assert!(!result.deployment_approved);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].name, "max_errors");
        assert!((result.violations[0].actual - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn compiler_errors_block_regardless_of_score() {
        let input = GateInput {
            compiler_errors: 2,
            success_rate: 1.0,
            ..GateInput::default()
        };
        let result = evaluate(&healthy_metrics(), &input, &GateThresholds::default());
        assert!(!result.passed);
        assert_eq!(result.risk, RiskLevel::High);
        assert!(result.blockers[0].contains("compiler error"));
    }

    #[test]
    fn blocked_rules_are_hard_blockers() {
        let thresholds = GateThresholds {
            blocked_rules: vec!["no-eval".to_string()],
            ..GateThresholds::default()
        };
        let input = GateInput {
            success_rate: 1.0,
            remaining_rules: vec!["no-unused-vars".to_string(), "no-eval".to_string()],
            ..GateInput::default()
        };
        let result = evaluate(&healthy_metrics(), &input, &thresholds);
        assert!(!result.passed);
        assert!(result.blockers[0].contains("no-eval"));
    }

    #[test]
    fn low_success_rate_violates_and_recommends() {
        let input = GateInput {
            success_rate: 0.5,
            ..GateInput::default()
        };
        let result = evaluate(&healthy_metrics(), &input, &GateThresholds::default());
        assert!(!result.passed);
        assert_eq!(result.risk, RiskLevel::Medium);
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("batch size")));
    }

    #[test]
    fn from_validations_aggregates_counts() {
        let validations = vec![
            ComprehensiveValidationResult {
                passed: true,
                results: vec![ValidationResult {
                    kind: CheckKind::Build,
                    passed: true,
                    skipped: false,
                    errors: vec![],
                    warnings: vec!["w1".to_string()],
                    recommendations: vec![],
                    duration_ms: 1200,
                    retries: 0,
                }],
                quality_score: 100,
                requires_rollback: false,
            },
            ComprehensiveValidationResult {
                passed: false,
                results: vec![ValidationResult {
                    kind: CheckKind::Compilation,
                    passed: false,
                    skipped: false,
                    errors: vec!["error TS2304".to_string()],
                    warnings: vec![],
                    recommendations: vec![],
                    duration_ms: 4000,
                    retries: 0,
                }],
                quality_score: 60,
                requires_rollback: true,
            },
        ];
        let input = GateInput::from_validations(&validations, vec![]);
        assert_eq!(input.total_errors, 1);
        assert_eq!(input.total_warnings, 1);
        assert_eq!(input.compiler_errors, 1);
        assert_eq!(input.slowest_check_ms, 4000);
        assert!((input.success_rate - 0.5).abs() < f64::EPSILON);
    }
}
