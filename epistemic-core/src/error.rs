use thiserror::Error;

use crate::guard::events::Event;

/// Errors surfaced by the epistemic kernel. Each variant corresponds to
/// exactly one failure mode named by the algebra, ledger, rule, or
/// policy contracts; there is no catch-all variant.
#[derive(Error, Debug)]
pub enum EpistemicError {
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error("merkle index {index} out of range for tree of length {len}")]
    MerkleIndexOutOfRange { index: usize, len: usize },

    #[error("ledger inconsistent: {0}")]
    LedgerInconsistent(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("no signing key configured for this ledger")]
    NoSigningKey,

    #[error("policy malformed: {0:?}")]
    PolicyMalformed(Vec<String>),

    #[error("unknown rule type: {0}")]
    UnknownRuleType(String),

    /// Raised by `Monitor::check`/`escalate` instead of returning the
    /// triggering event when `halt_on_critical` is set and the event's
    /// level is `Critical`. The event is carried for the caller to log
    /// or re-raise, but is never handed back through the normal `Ok`
    /// path in this case.
    #[error("halted on critical event: {0}")]
    CriticalHalt(Box<Event>),

    #[error("backend failure: {0}")]
    BackendFailure(String),
}
