use std::sync::Arc;

use serde_json::json;

use crate::algebra::NuPair;
use crate::guard::events::{Event, EventLevel};

/// Everything a rule needs to decide whether to fire, threaded
/// explicitly rather than packed into an `Event`'s diagnostic map.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub operation: String,
    pub inputs: Vec<NuPair>,
    pub output: NuPair,
}

impl CheckContext {
    pub fn coverage(&self) -> f64 {
        self.output.coverage()
    }
}

/// How a `Composite` rule combines its children: `Any` fires on the
/// first child that fires; `All` fires only once every child fires,
/// folding them into a single combined event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    Any,
    All,
}

/// Closed set of built-in rule kinds plus one open extension point for
/// predicates that don't fit the closed set.
pub enum Rule {
    Invariant,
    Coverage { threshold: f64, level: EventLevel },
    Threshold { max_uncertainty: f64, level: EventLevel },
    Composite { children: Vec<Rule>, mode: CompositeMode },
    Custom {
        rule_name: String,
        predicate: Arc<dyn Fn(&CheckContext) -> Option<Event> + Send + Sync>,
    },
}

impl Rule {
    pub fn name(&self) -> &str {
        match self {
            Rule::Invariant => "InvariantRule",
            Rule::Coverage { .. } => "CoverageRule",
            Rule::Threshold { .. } => "ThresholdRule",
            Rule::Composite { .. } => "CompositeRule",
            Rule::Custom { rule_name, .. } => rule_name,
        }
    }

    /// Evaluates the rule against `ctx`, returning the event it
    /// produced, if any.
    pub fn check(&self, ctx: &CheckContext) -> Option<Event> {
        match self {
            Rule::Invariant => check_invariant(ctx),
            Rule::Coverage { threshold, level } => check_coverage(ctx, *threshold, *level),
            Rule::Threshold { max_uncertainty, level } => {
                check_threshold(ctx, *max_uncertainty, *level)
            }
            Rule::Composite { children, mode } => check_composite(ctx, children, *mode),
            Rule::Custom { predicate, .. } => predicate(ctx),
        }
    }
}

fn check_invariant(ctx: &CheckContext) -> Option<Event> {
    let output = ctx.output;
    if output.u < 0.0 {
        return Some(
            Event::new(
                EventLevel::Critical,
                ctx.operation.clone(),
                format!("negative uncertainty: {}", output.u),
            )
            .with_data("n", json!(output.n))
            .with_data("u", json!(output.u)),
        );
    }
    if output.n.is_nan() || output.u.is_nan() {
        return Some(Event::new(
            EventLevel::Critical,
            ctx.operation.clone(),
            "NaN in nominal or uncertainty",
        ));
    }
    if output.n.is_infinite() {
        return Some(Event::new(
            EventLevel::Critical,
            ctx.operation.clone(),
            format!("nominal is infinite: {}", output.n),
        ));
    }
    None
}

fn check_coverage(ctx: &CheckContext, threshold: f64, level: EventLevel) -> Option<Event> {
    let coverage = ctx.coverage();
    if coverage > threshold {
        Some(
            Event::new(
                level,
                ctx.operation.clone(),
                format!("coverage {coverage} exceeds threshold {threshold}"),
            )
            .with_data("coverage", json!(coverage))
            .with_data("threshold", json!(threshold)),
        )
    } else {
        None
    }
}

fn check_threshold(ctx: &CheckContext, max_uncertainty: f64, level: EventLevel) -> Option<Event> {
    if ctx.output.u > max_uncertainty {
        Some(
            Event::new(
                level,
                ctx.operation.clone(),
                format!("uncertainty {} exceeds max {max_uncertainty}", ctx.output.u),
            )
            .with_data("uncertainty", json!(ctx.output.u)),
        )
    } else {
        None
    }
}

fn check_composite(ctx: &CheckContext, children: &[Rule], mode: CompositeMode) -> Option<Event> {
    match mode {
        CompositeMode::Any => children.iter().find_map(|rule| rule.check(ctx)),
        CompositeMode::All => {
            let events: Vec<Event> = children.iter().filter_map(|rule| rule.check(ctx)).collect();
            if events.len() != children.len() {
                return None;
            }
            let level = events.iter().map(|e| e.level).max().unwrap_or(EventLevel::Info);
            let violations: Vec<serde_json::Value> =
                events.iter().map(|e| serde_json::to_value(e).unwrap_or(json!(null))).collect();
            Some(
                Event::new(
                    level,
                    ctx.operation.clone(),
                    format!("multiple violations: {} rules fired", events.len()),
                )
                .with_data("violations", json!(violations)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(output: NuPair) -> CheckContext {
        CheckContext {
            operation: "op".into(),
            inputs: vec![],
            output,
        }
    }

    #[test]
    fn invariant_fires_on_negative_uncertainty() {
        let rule = Rule::Invariant;
        let event = rule.check(&ctx(NuPair::new(1.0, -1.0))).unwrap();
        assert_eq!(event.level, EventLevel::Critical);
    }

    #[test]
    fn invariant_does_not_fire_on_infinite_uncertainty_alone() {
        let rule = Rule::Invariant;
        assert!(rule.check(&ctx(NuPair::new(1.0, f64::INFINITY))).is_none());
    }

    #[test]
    fn coverage_rule_fires_above_threshold() {
        let rule = Rule::Coverage { threshold: 0.1, level: EventLevel::Warning };
        assert!(rule.check(&ctx(NuPair::new(10.0, 2.0))).is_some());
        assert!(rule.check(&ctx(NuPair::new(10.0, 0.5))).is_none());
    }

    #[test]
    fn composite_any_returns_first_match() {
        let rule = Rule::Composite {
            children: vec![
                Rule::Coverage { threshold: 0.1, level: EventLevel::Warning },
                Rule::Invariant,
            ],
            mode: CompositeMode::Any,
        };
        let event = rule.check(&ctx(NuPair::new(10.0, 2.0))).unwrap();
        assert_eq!(event.operation, "op");
    }

    #[test]
    fn composite_all_requires_every_child_to_fire() {
        let rule = Rule::Composite {
            children: vec![
                Rule::Coverage { threshold: 0.1, level: EventLevel::Warning },
                Rule::Threshold { max_uncertainty: 0.05, level: EventLevel::Error },
            ],
            mode: CompositeMode::All,
        };
        assert!(rule.check(&ctx(NuPair::new(10.0, 2.0))).is_some());
        assert!(rule.check(&ctx(NuPair::new(10.0, 0.06))).is_none());
    }
}
