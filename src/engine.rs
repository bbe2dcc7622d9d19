//! Chunked validation engine
//!
//! - `cursor`: key ranges over composite natural keys
//! - `state_machine`: one table from PENDING to COMPLETED/FAILED
//! - `coordinator`: bounded concurrency across tables
//! - `gate`: run window checks against an injectable clock
//! - `retry`, `registry`, `incremental`: supporting pieces

pub mod coordinator;
pub mod cursor;
pub mod error;
pub mod gate;
pub mod incremental;
pub mod registry;
pub mod retry;
pub mod state_machine;

pub use coordinator::{EngineSettings, ValidationCoordinator};
pub use cursor::{ChunkCursor, CursorStep};
pub use error::EngineError;
pub use gate::{GateDecision, LocalClock, RunWindowGate, WallClock};
pub use registry::{RunRegistry, SlotState};
pub use retry::RetryPolicy;
pub use state_machine::{AdvanceOutcome, EngineContext, TableStateMachine};
