use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::config::VgenConfig;

use super::models::{Plan, SlotKey, VariantTarget};

/// Structural problem found in a plan. Never a judgement on content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyPlan,
    DuplicateSlot(SlotKey),
    UnrecognizedTarget(VariantTarget),
    CeilingExceeded { ceiling: usize, actual: usize },
    MissingRequiredField { platform: String, field: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPlan => f.write_str("empty plan"),
            ValidationIssue::DuplicateSlot(key) => write!(
                f,
                "duplicate variant slot {} (platform {}, slot {})",
                key, key.target, key.slot_index
            ),
            ValidationIssue::UnrecognizedTarget(target) => {
                write!(f, "unrecognized {}: {}", target.kind(), target.name())
            }
            ValidationIssue::CeilingExceeded { ceiling, actual } => write!(
                f,
                "variant count {actual} exceeds the per-job ceiling of {ceiling}"
            ),
            ValidationIssue::MissingRequiredField { platform, field } => {
                write!(f, "platform {platform} is missing required field {field}")
            }
        }
    }
}

impl Serialize for ValidationIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Validator {
    config: Arc<VgenConfig>,
}

impl Validator {
    pub fn new(config: Arc<VgenConfig>) -> Self {
        Self { config }
    }

    /// Runs every check and collects all issues.
    pub fn validate(&self, plan: &Plan) -> ValidationResult {
        let mut issues = Vec::new();

        if plan.is_empty() {
            issues.push(ValidationIssue::EmptyPlan);
        }

        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for spec in &plan.variants {
            let key = spec.key();
            if !seen.insert(key.clone()) && reported.insert(key.clone()) {
                issues.push(ValidationIssue::DuplicateSlot(key));
            }
        }

        for target in plan.targets() {
            if !self.recognizes(target) {
                issues.push(ValidationIssue::UnrecognizedTarget(target.clone()));
            }
        }

        let ceiling = self.config.pipeline.max_variants_per_job;
        if plan.len() > ceiling {
            issues.push(ValidationIssue::CeilingExceeded {
                ceiling,
                actual: plan.len(),
            });
        }

        let mut missing = HashSet::new();
        for spec in &plan.variants {
            let VariantTarget::Platform(platform) = &spec.target else {
                continue;
            };
            let Some(profile) = self.config.platform(platform) else {
                continue;
            };
            for field in &profile.required_params {
                if spec.param(field).is_none() && missing.insert((platform.clone(), field.clone())) {
                    issues.push(ValidationIssue::MissingRequiredField {
                        platform: platform.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        ValidationResult::from_issues(issues)
    }

    fn recognizes(&self, target: &VariantTarget) -> bool {
        match target {
            VariantTarget::Platform(name) => self.config.is_known_platform(name),
            VariantTarget::Bucket(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::models::{BrandIdentity, PlanRequest, SourceAsset};
    use crate::plan::Planner;

    fn config() -> Arc<VgenConfig> {
        Arc::new(VgenConfig::default())
    }

    fn request() -> PlanRequest {
        PlanRequest::new(BrandIdentity::new("Acme"), SourceAsset::new("hero.mp4"))
    }

    #[test]
    fn planned_request_is_valid() {
        let plan = Planner::new(config()).plan(&request().with_platforms(["instagram", "tiktok"]));
        let result = Validator::new(config()).validate(&plan);
        assert!(result.valid, "{:?}", result.issues);
    }

    #[test]
    fn duplicate_platform_reports_each_pair_once() {
        let plan = Planner::new(config()).plan(
            &request()
                .with_platforms(["instagram", "instagram"])
                .with_variants_per_platform(2),
        );
        let result = Validator::new(config()).validate(&plan);
        assert!(!result.valid);
        assert_eq!(
            result.issues,
            vec![
                ValidationIssue::DuplicateSlot(SlotKey::new(
                    VariantTarget::Platform("instagram".into()),
                    0
                )),
                ValidationIssue::DuplicateSlot(SlotKey::new(
                    VariantTarget::Platform("instagram".into()),
                    1
                )),
            ]
        );
        assert!(result.messages()[0].contains("instagram#0"));
    }

    #[test]
    fn ceiling_overflow_is_a_single_issue() {
        let plan = Planner::new(config()).plan(
            &request()
                .with_platforms(["instagram", "tiktok"])
                .with_variants_per_platform(40),
        );
        let result = Validator::new(config()).validate(&plan);
        assert_eq!(
            result.issues,
            vec![ValidationIssue::CeilingExceeded {
                ceiling: 50,
                actual: 80
            }]
        );
        assert!(result.messages()[0].contains("50"));
    }

    #[test]
    fn zero_variants_is_an_empty_plan() {
        let plan = Planner::new(config()).plan(&request().with_variants_per_platform(0));
        let result = Validator::new(config()).validate(&plan);
        assert_eq!(result.issues, vec![ValidationIssue::EmptyPlan]);
        assert_eq!(result.messages(), vec!["empty plan".to_string()]);
    }

    #[test]
    fn all_issues_are_collected() {
        let plan = Planner::new(config()).plan(
            &request()
                .with_platforms(["myspace", "linkedin", "myspace"])
                .with_variants_per_platform(20),
        );
        let result = Validator::new(config()).validate(&plan);
        assert!(result
            .issues
            .contains(&ValidationIssue::UnrecognizedTarget(VariantTarget::Platform(
                "myspace".into()
            ))));
        assert!(result.issues.contains(&ValidationIssue::CeilingExceeded {
            ceiling: 50,
            actual: 60
        }));
        assert!(result.issues.contains(&ValidationIssue::MissingRequiredField {
            platform: "linkedin".into(),
            field: "audience".into()
        }));
        let duplicates = result
            .issues
            .iter()
            .filter(|issue| matches!(issue, ValidationIssue::DuplicateSlot(_)))
            .count();
        assert_eq!(duplicates, 20);
    }

    #[test]
    fn issues_serialize_as_strings() {
        let result = ValidationResult::from_issues(vec![ValidationIssue::EmptyPlan]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"valid": false, "issues": ["empty plan"]}));
    }
}
