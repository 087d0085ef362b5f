use serde_json::Value;

use crate::error::EpistemicError;
use crate::guard::events::EventLevel;
use crate::guard::monitor::MonitorConfig;
use crate::guard::rules::{CompositeMode, Rule};
use crate::policy::{Policy, PolicyValidator};

/// Compiles a `Policy` into a runnable `MonitorConfig`. Unknown rule
/// types are skipped by default; in `strict` mode they are rejected
/// outright.
pub struct Compiler;

impl Compiler {
    pub fn compile(policy: &Policy, strict: bool) -> Result<MonitorConfig, EpistemicError> {
        PolicyValidator::validate_or_fail(&policy.config)?;

        let mut rules = Vec::new();
        for spec in &policy.config.rules {
            match compile_rule(spec, strict)? {
                Some(rule) => rules.push(rule),
                None => continue,
            }
        }

        Ok(MonitorConfig::new(
            rules,
            Vec::new(),
            policy.config.escalation.auto_log,
            policy.config.escalation.halt_on_critical,
        ))
    }
}

/// Compiles one rule specification. `CompositeRule` children are
/// compiled through this same function, so nesting is recursive to
/// any depth regardless of which rule types appear at each level.
fn compile_rule(spec: &Value, strict: bool) -> Result<Option<Rule>, EpistemicError> {
    let rule_type = spec
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| EpistemicError::PolicyMalformed(vec!["rule missing 'type'".into()]))?;

    let level = parse_level(spec)?;

    let rule = match rule_type {
        "InvariantRule" => Rule::Invariant,
        "CoverageRule" => {
            let threshold = spec.get("threshold").and_then(Value::as_f64).ok_or_else(|| {
                EpistemicError::PolicyMalformed(vec!["CoverageRule requires 'threshold'".into()])
            })?;
            Rule::Coverage { threshold, level: level.unwrap_or(EventLevel::Warning) }
        }
        "ThresholdRule" => {
            let max_uncertainty = spec.get("max_uncertainty").and_then(Value::as_f64).ok_or_else(|| {
                EpistemicError::PolicyMalformed(vec!["ThresholdRule requires 'max_uncertainty'".into()])
            })?;
            Rule::Threshold { max_uncertainty, level: level.unwrap_or(EventLevel::Warning) }
        }
        "CompositeRule" => {
            let mode_str = spec.get("mode").and_then(Value::as_str).ok_or_else(|| {
                EpistemicError::PolicyMalformed(vec!["CompositeRule requires 'mode'".into()])
            })?;
            let mode = match mode_str {
                "all" => CompositeMode::All,
                "any" => CompositeMode::Any,
                other => {
                    return Err(EpistemicError::PolicyMalformed(vec![format!(
                        "CompositeRule mode must be 'all' or 'any', got '{other}'"
                    )]))
                }
            };
            let child_specs = spec.get("rules").and_then(Value::as_array).ok_or_else(|| {
                EpistemicError::PolicyMalformed(vec!["CompositeRule requires a 'rules' array".into()])
            })?;
            let mut children = Vec::new();
            for child_spec in child_specs {
                if let Some(child) = compile_rule(child_spec, strict)? {
                    children.push(child);
                }
            }
            Rule::Composite { children, mode }
        }
        "CustomRule" => {
            return if strict {
                Err(EpistemicError::UnknownRuleType(
                    "CustomRule requires a predicate supplied out-of-band; cannot compile from JSON alone".into(),
                ))
            } else {
                Ok(None)
            };
        }
        unknown => {
            return if strict {
                Err(EpistemicError::UnknownRuleType(unknown.to_string()))
            } else {
                Ok(None)
            };
        }
    };

    Ok(Some(rule))
}

fn parse_level(spec: &Value) -> Result<Option<EventLevel>, EpistemicError> {
    match spec.get("level").and_then(Value::as_str) {
        None => Ok(None),
        Some(raw) => match raw.to_lowercase().as_str() {
            "info" => Ok(Some(EventLevel::Info)),
            "warning" => Ok(Some(EventLevel::Warning)),
            "error" => Ok(Some(EventLevel::Error)),
            "critical" => Ok(Some(EventLevel::Critical)),
            other => Err(EpistemicError::PolicyMalformed(vec![format!(
                "unknown event level '{other}'"
            )])),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyConfig;
    use serde_json::json;
    use std::collections::HashMap;

    fn policy_with_rules(rules: Vec<Value>) -> Policy {
        Policy::new(PolicyConfig {
            version: "1.0.0".into(),
            name: "test".into(),
            description: "desc".into(),
            rules,
            escalation: Default::default(),
            metadata: HashMap::new(),
        })
        .unwrap()
    }

    #[test]
    fn compiles_flat_rules() {
        let policy = policy_with_rules(vec![
            json!({"type": "InvariantRule"}),
            json!({"type": "CoverageRule", "threshold": 0.2, "level": "error"}),
        ]);
        let config = Compiler::compile(&policy, false).unwrap();
        assert_eq!(config.rules.len(), 2);
    }

    #[test]
    fn unknown_rule_type_ignored_by_default() {
        let policy = policy_with_rules(vec![json!({"type": "InvariantRule"}), json!({"type": "FutureRule"})]);
        let config = Compiler::compile(&policy, false).unwrap();
        assert_eq!(config.rules.len(), 1);
    }

    #[test]
    fn strict_mode_rejects_unknown_rule_type() {
        let policy = policy_with_rules(vec![json!({"type": "FutureRule"})]);
        assert!(Compiler::compile(&policy, true).is_err());
    }

    #[test]
    fn nested_composite_rules_compile_recursively() {
        let policy = policy_with_rules(vec![json!({
            "type": "CompositeRule",
            "mode": "all",
            "rules": [
                {
                    "type": "CompositeRule",
                    "mode": "any",
                    "rules": [{"type": "InvariantRule"}, {"type": "CoverageRule", "threshold": 0.1}]
                },
                {"type": "ThresholdRule", "max_uncertainty": 1.0}
            ]
        })]);
        let config = Compiler::compile(&policy, false).unwrap();
        assert_eq!(config.rules.len(), 1);
        match &config.rules[0] {
            Rule::Composite { children, .. } => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[0], Rule::Composite { .. }));
            }
            _ => panic!("expected a composite rule"),
        }
    }
}
