//! Deterministic epistemic computation kernel.
//!
//! Three layers, each usable on its own:
//!
//! - [`algebra`]: nominal/uncertainty pair arithmetic (`add`, `multiply`,
//!   `compose`, `catch`, `flip`).
//! - [`ledger`]: an append-only, Merkle-chained, optionally Ed25519-signed
//!   record of algebra operations, over a pluggable [`ledger::Backend`].
//! - [`guard`]: rule evaluation and event dispatch against algebra
//!   outcomes, with optional ledger auto-logging.
//!
//! [`policy`] compiles a versioned, optionally signed policy document
//! into a [`guard::monitor::MonitorConfig`], so which rules a `Monitor`
//! runs can be data instead of code.

pub mod algebra;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod merkle;
pub mod policy;

pub use algebra::{add, catch, compose, flip, multiply, NuPair};
pub use error::EpistemicError;
pub use guard::events::{Event, EventAggregator, EventHandler, EventLevel};
pub use guard::monitor::{AuditSink, Monitor, MonitorConfig, MonitorStats};
pub use guard::rules::{CheckContext, CompositeMode, Rule};
pub use ledger::{Backend, Ledger, LedgerOptions, LedgerRecord, MemoryBackend};
pub use merkle::{MerkleProof, MerkleTree, Side};
pub use policy::{Compiler, Escalation, Policy, PolicyConfig, PolicyValidator, ValidationResult};

#[cfg(feature = "sled-backend")]
pub use ledger::SledBackend;
