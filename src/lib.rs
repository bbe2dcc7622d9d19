//! Table Validator - chunked, resumable comparison of source and target tables
//!
//! Tables are compared in key-ordered chunks, progress is checkpointed after
//! every chunk, and work only proceeds inside the configured run window.

pub mod domain;
pub mod engine;
pub mod infrastructure;

pub use engine::{EngineError, EngineSettings, ValidationCoordinator};
