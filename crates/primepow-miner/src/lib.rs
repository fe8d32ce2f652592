//! Prime-constellation miner.
//!
//! This crate builds on `primepow-core` to search for proofs of work:
//! - Offset planning: primorial, admissible remainder and multiplier range
//! - A segmented sieve over primorial multipliers
//! - An optional accelerator pre-filter behind a backend trait
//! - A worker pool with first-writer-wins result publication and cancellation
//!
//! Every proof is run through the same validation a node applies before it is
//! handed back.

pub mod accel;
pub mod config;
pub mod pipeline;
pub mod plan;
pub mod sieve;
pub mod slot;
pub mod stats;

pub use accel::{AcceleratorBackend, AcceleratorError, AcceleratorThread, SoftwareFermat};
pub use config::{AcceleratorConfig, ConfigError, MinerConfig};
pub use pipeline::{FoundProof, Miner, MinerError, MiningJob, MiningOutcome};
pub use plan::{OffsetPlan, PlanError};
pub use slot::{CancelToken, ResultSlot};
pub use stats::MiningStats;
