//! Cash Courier Core - Rust Engine
//!
//! Matching and live tracking for person-to-person cash withdrawals: a
//! requester asks for cash, a nearby agent brings it, both confirm the
//! handover, and the ledger moves the money exactly once.
//!
//! # Architecture
//!
//! - **core**: Configuration and clocks
//! - **geo**: Distance, bearing and route ETA
//! - **location**: Device location subscription and accuracy gate
//! - **models**: Domain types (WithdrawalRequest, presence, events)
//! - **store**: Request store (compare-and-swap) and TTL-backed keyed store
//! - **directory**: Agent presence registry and nearby-agent search
//! - **ledger**: Ledger collaborator and withdrawal settlement
//! - **tracking**: Position smoothing and marker animation
//! - **coordinator**: The withdrawal service and checkpoints
//! - **sync**: Client-side polling loop
//!
//! # Critical Invariants
//!
//! 1. All money values are i64 (currency units)
//! 2. A request changes only through its transition methods, written back
//!    by compare-and-swap on its version
//! 3. A completed withdrawal settles the ledger exactly once

// Module declarations
pub mod coordinator;
pub mod core;
pub mod directory;
pub mod error;
pub mod geo;
pub mod ledger;
pub mod location;
pub mod models;
pub mod store;
pub mod sync;
pub mod tracking;

// Re-exports for convenience
pub use coordinator::{CounterpartFix, StoreSnapshot, WithdrawalService};
pub use core::config::{ConfigError, CoreConfig};
pub use core::time::{Clock, ManualClock, SystemClock};
pub use directory::{AgentCandidate, NearbyAgentDirectory, PresenceRegistry};
pub use error::{CoreError, ErrorClass};
pub use geo::{Coordinate, Eta, RoutingProvider, StraightLineRouting, TravelMode};
pub use ledger::{Ledger, LedgerError, MemoryLedger};
pub use location::{AccuracyGate, AccuracyTier, GateOutcome, LocationError, PositionSample};
pub use models::{
    Actor, MeetingType, NewWithdrawal, Party, RequestError, RequestStatus, WithdrawalRequest,
};
pub use sync::{BalanceRefresher, SyncEvent, SyncGateway, SyncHandle, SyncLoop};
