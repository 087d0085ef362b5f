use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::algebra::NuPair;
use crate::error::EpistemicError;
use crate::ledger::LedgerRecord;

use super::events::{Event, EventHandler, EventLevel};
use super::rules::{CheckContext, Rule};

/// Anything that can absorb an auto-logged event into durable storage.
/// `Ledger` is the production implementation; tests can supply a
/// stub.
pub trait AuditSink: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        parent_id: Option<Uuid>,
        operation: &str,
        inputs: &[NuPair],
        output: NuPair,
        coverage: f64,
        invariant_passed: bool,
    ) -> Result<LedgerRecord, EpistemicError>;
}

/// Monitor configuration. An empty `rules` list is replaced at
/// construction time by the default pair used throughout the
/// prototype this was built from: an invariant check plus a coverage
/// check at a 10% threshold.
pub struct MonitorConfig {
    pub rules: Vec<Rule>,
    pub handlers: Vec<Box<dyn EventHandler>>,
    pub auto_log: bool,
    pub halt_on_critical: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            rules: default_rules(),
            handlers: Vec::new(),
            auto_log: true,
            halt_on_critical: false,
        }
    }
}

impl MonitorConfig {
    pub fn new(
        mut rules: Vec<Rule>,
        handlers: Vec<Box<dyn EventHandler>>,
        auto_log: bool,
        halt_on_critical: bool,
    ) -> Self {
        if rules.is_empty() {
            rules = default_rules();
        }
        MonitorConfig { rules, handlers, auto_log, halt_on_critical }
    }
}

fn default_rules() -> Vec<Rule> {
    vec![
        Rule::Invariant,
        Rule::Coverage { threshold: 0.10, level: EventLevel::Warning },
    ]
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonitorStats {
    pub event_count: u64,
    pub violation_count: u64,
}

/// Evaluates rules against algebra outcomes and dispatches the
/// resulting events to handlers, with optional ledger auto-logging and
/// an optional hard halt on critical events.
pub struct Monitor {
    config: RwLock<MonitorConfig>,
    ledger: Option<Arc<dyn AuditSink>>,
    event_count: AtomicU64,
    violation_count: AtomicU64,
}

impl Monitor {
    pub fn new(config: MonitorConfig, ledger: Option<Arc<dyn AuditSink>>) -> Self {
        Monitor {
            config: RwLock::new(config),
            ledger,
            event_count: AtomicU64::new(0),
            violation_count: AtomicU64::new(0),
        }
    }

    /// Evaluates configured rules in order against `ctx`, returning the
    /// first event a rule produces. If `halt_on_critical` is set and
    /// that event is `Critical`, the event is never returned to the
    /// caller through the `Ok` path — it is carried inside
    /// `Err(CriticalHalt)` instead, after auto-logging and handler
    /// dispatch have both run.
    pub fn check(&self, ctx: &CheckContext) -> Result<Option<Event>, EpistemicError> {
        let config = self
            .config
            .read()
            .map_err(|_| EpistemicError::LedgerInconsistent("monitor config lock poisoned".into()))?;

        for rule in &config.rules {
            if let Some(event) = rule.check(ctx) {
                tracing::debug!(rule = rule.name(), operation = %ctx.operation, "rule fired");
                return self.dispatch(event, &config, Some(ctx));
            }
        }
        Ok(None)
    }

    /// Boolean convenience wrapper over `check`: `true` if a rule fired.
    pub fn monitor(&self, ctx: &CheckContext) -> Result<bool, EpistemicError> {
        Ok(self.check(ctx)?.is_some())
    }

    /// Dispatches a pre-built event without running rule evaluation,
    /// for callers that already know they have a violation to report.
    pub fn escalate(&self, event: Event) -> Result<Option<Event>, EpistemicError> {
        let config = self
            .config
            .read()
            .map_err(|_| EpistemicError::LedgerInconsistent("monitor config lock poisoned".into()))?;
        self.dispatch(event, &config, None)
    }

    fn dispatch(
        &self,
        mut event: Event,
        config: &MonitorConfig,
        ctx: Option<&CheckContext>,
    ) -> Result<Option<Event>, EpistemicError> {
        self.event_count.fetch_add(1, Ordering::SeqCst);
        if event.level >= EventLevel::Error {
            self.violation_count.fetch_add(1, Ordering::SeqCst);
        }

        if config.auto_log {
            if let Some(ledger) = &self.ledger {
                let (inputs, output, coverage): (Vec<NuPair>, NuPair, f64) = match ctx {
                    Some(ctx) => (ctx.inputs.clone(), ctx.output, ctx.coverage()),
                    None => (Vec::new(), NuPair::new(0.0, f64::INFINITY), f64::INFINITY),
                };
                let invariant_passed = event.level < EventLevel::Critical;
                let tag = format!("guard_{}", event.operation);
                match ledger.record(None, &tag, &inputs, output, coverage, invariant_passed) {
                    Ok(record) => event.op_id = Some(record.op_id),
                    Err(e) => tracing::error!(error = %e, "failed to auto-log guard event"),
                }
            }
        }

        for handler in &config.handlers {
            if !handler.should_handle(&event) {
                continue;
            }
            if let Err(e) = handler.handle(&event) {
                tracing::error!(error = %e, "event handler failed");
            }
        }

        if config.halt_on_critical && event.level == EventLevel::Critical {
            return Err(EpistemicError::CriticalHalt(Box::new(event)));
        }

        Ok(Some(event))
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            event_count: self.event_count.load(Ordering::SeqCst),
            violation_count: self.violation_count.load(Ordering::SeqCst),
        }
    }

    pub fn reset(&self) {
        self.event_count.store(0, Ordering::SeqCst);
        self.violation_count.store(0, Ordering::SeqCst);
    }

    pub fn add_rule(&self, rule: Rule) -> Result<(), EpistemicError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| EpistemicError::LedgerInconsistent("monitor config lock poisoned".into()))?;
        config.rules.push(rule);
        Ok(())
    }

    pub fn add_handler(&self, handler: Box<dyn EventHandler>) -> Result<(), EpistemicError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| EpistemicError::LedgerInconsistent("monitor config lock poisoned".into()))?;
        config.handlers.push(handler);
        Ok(())
    }

    /// Atomically replaces the entire configuration, e.g. after a
    /// policy hot-swap.
    pub fn swap_config(&self, new_config: MonitorConfig) -> Result<(), EpistemicError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| EpistemicError::LedgerInconsistent("monitor config lock poisoned".into()))?;
        *config = new_config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubSink {
        calls: Mutex<u32>,
    }

    impl AuditSink for StubSink {
        fn record(
            &self,
            _parent_id: Option<Uuid>,
            operation: &str,
            _inputs: &[NuPair],
            output: NuPair,
            _coverage: f64,
            _invariant_passed: bool,
        ) -> Result<LedgerRecord, EpistemicError> {
            *self.calls.lock().unwrap() += 1;
            Ok(LedgerRecord {
                sequence: 0,
                op_id: Uuid::new_v4(),
                parent_id: None,
                operation: operation.to_string(),
                inputs: vec![],
                output,
                coverage: 0.0,
                invariant_passed: true,
                signature: vec![],
            })
        }
    }

    #[test]
    fn no_rules_falls_back_to_default_pair() {
        let config = MonitorConfig::new(vec![], vec![], true, false);
        assert_eq!(config.rules.len(), 2);
    }

    #[test]
    fn check_returns_none_when_nothing_fires() {
        let monitor = Monitor::new(MonitorConfig::default(), None);
        let ctx = CheckContext { operation: "op".into(), inputs: vec![], output: NuPair::new(10.0, 0.01) };
        assert!(monitor.check(&ctx).unwrap().is_none());
    }

    #[test]
    fn check_auto_logs_and_increments_counters() {
        let sink = Arc::new(StubSink { calls: Mutex::new(0) });
        let monitor = Monitor::new(MonitorConfig::default(), Some(sink.clone()));
        let ctx = CheckContext { operation: "op".into(), inputs: vec![], output: NuPair::new(1.0, 5.0) };
        let event = monitor.check(&ctx).unwrap();
        assert!(event.is_some());
        assert_eq!(*sink.calls.lock().unwrap(), 1);
        assert_eq!(monitor.stats().event_count, 1);
    }

    #[test]
    fn halt_on_critical_returns_err_instead_of_event() {
        let config = MonitorConfig::new(vec![Rule::Invariant], vec![], false, true);
        let monitor = Monitor::new(config, None);
        let ctx = CheckContext { operation: "op".into(), inputs: vec![], output: NuPair::new(1.0, -1.0) };
        let result = monitor.check(&ctx);
        assert!(matches!(result, Err(EpistemicError::CriticalHalt(_))));
    }
}
