//! Coordinator - the service both clients talk to
//!
//! See `engine.rs` for the request lifecycle and `checkpoint.rs` for
//! save/restore.

pub mod checkpoint;
pub mod engine;

pub use checkpoint::{validate_snapshot, CheckpointError, StoreSnapshot};
pub use engine::{CounterpartFix, CounterpartPosition, WithdrawalService};
