use serde_json::Value;

use crate::error::EpistemicError;
use crate::policy::PolicyConfig;

const VALID_RULE_TYPES: &[&str] = &[
    "CoverageRule",
    "InvariantRule",
    "ThresholdRule",
    "CompositeRule",
    "CustomRule",
];

const VALID_EVENT_LEVELS: &[&str] = &["info", "warning", "error", "critical"];

/// Outcome of validating a policy document: a list of hard errors (any
/// of which makes the policy unusable) and soft warnings (shape is
/// acceptable but suspicious).
#[derive(Debug, Default, Clone)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct PolicyValidator;

impl PolicyValidator {
    pub fn validate(config: &PolicyConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        if config.version.trim().is_empty() {
            result.errors.push("version must not be empty".into());
        } else if !is_valid_version(&config.version) {
            result
                .errors
                .push(format!("version '{}' is not a valid semver-style string", config.version));
        }

        if config.name.trim().is_empty() {
            result.errors.push("name must not be empty".into());
        }
        if config.description.trim().is_empty() {
            result.warnings.push("description is empty".into());
        }

        if config.rules.is_empty() {
            result.warnings.push("policy defines no rules".into());
        }
        for (index, rule) in config.rules.iter().enumerate() {
            validate_rule(rule, index, &mut result);
        }

        for key in config.metadata.keys() {
            if key.trim().is_empty() {
                result.warnings.push("metadata contains an empty key".into());
            }
        }

        result
    }

    pub fn validate_or_fail(config: &PolicyConfig) -> Result<(), EpistemicError> {
        let result = Self::validate(config);
        if result.is_valid() {
            Ok(())
        } else {
            Err(EpistemicError::PolicyMalformed(result.errors))
        }
    }
}

fn is_valid_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| p.parse::<u64>().is_ok())
}

fn validate_rule(rule: &Value, index: usize, result: &mut ValidationResult) {
    let Some(rule_type) = rule.get("type").and_then(Value::as_str) else {
        result.errors.push(format!("rule[{index}] is missing a 'type' field"));
        return;
    };

    if !VALID_RULE_TYPES.contains(&rule_type) {
        result
            .errors
            .push(format!("rule[{index}] has unknown type '{rule_type}'"));
        return;
    }

    if let Some(level) = rule.get("level").and_then(Value::as_str) {
        if !VALID_EVENT_LEVELS.contains(&level.to_lowercase().as_str()) {
            result
                .errors
                .push(format!("rule[{index}] has invalid level '{level}'"));
        }
    }

    match rule_type {
        "CoverageRule" => match rule.get("threshold").and_then(Value::as_f64) {
            Some(threshold) if (0.0..=1.0).contains(&threshold) => {}
            Some(threshold) => result.errors.push(format!(
                "rule[{index}] CoverageRule threshold {threshold} must be in [0, 1]"
            )),
            None => result
                .errors
                .push(format!("rule[{index}] CoverageRule requires a numeric 'threshold'")),
        },
        "ThresholdRule" => match rule.get("max_uncertainty").and_then(Value::as_f64) {
            Some(max_u) if max_u >= 0.0 => {}
            Some(max_u) => result.errors.push(format!(
                "rule[{index}] ThresholdRule max_uncertainty {max_u} must be non-negative"
            )),
            None => result.errors.push(format!(
                "rule[{index}] ThresholdRule requires a numeric 'max_uncertainty'"
            )),
        },
        "CompositeRule" => {
            match rule.get("mode").and_then(Value::as_str) {
                Some("all") | Some("any") => {}
                _ => result
                    .errors
                    .push(format!("rule[{index}] CompositeRule 'mode' must be 'all' or 'any'")),
            }
            match rule.get("rules").and_then(Value::as_array) {
                Some(children) => {
                    for (child_index, child) in children.iter().enumerate() {
                        validate_rule(child, child_index, result);
                    }
                }
                None => result
                    .errors
                    .push(format!("rule[{index}] CompositeRule requires a 'rules' array")),
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn config_with_rules(rules: Vec<Value>) -> PolicyConfig {
        PolicyConfig {
            version: "1.0.0".into(),
            name: "test".into(),
            description: "desc".into(),
            rules,
            escalation: Default::default(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn rejects_malformed_version() {
        let mut config = config_with_rules(vec![]);
        config.version = "not-a-version".into();
        assert!(!PolicyValidator::validate(&config).is_valid());
    }

    #[test]
    fn coverage_rule_threshold_out_of_range_is_an_error() {
        let config = config_with_rules(vec![json!({"type": "CoverageRule", "threshold": 5.0})]);
        assert!(!PolicyValidator::validate(&config).is_valid());
    }

    #[test]
    fn nested_composite_rules_validate_recursively() {
        let config = config_with_rules(vec![json!({
            "type": "CompositeRule",
            "mode": "all",
            "rules": [
                {"type": "CompositeRule", "mode": "any", "rules": [{"type": "NotARealType"}]}
            ]
        })]);
        assert!(!PolicyValidator::validate(&config).is_valid());
    }

    #[test]
    fn valid_policy_has_no_errors() {
        let config = config_with_rules(vec![json!({"type": "InvariantRule"})]);
        assert!(PolicyValidator::validate(&config).is_valid());
    }
}
