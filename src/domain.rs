//! Domain module - validation entities, value objects and contracts
//!
//! Everything here is free of I/O: the engine drives these types, and the
//! infrastructure layer implements the repository, gateway and notifier
//! traits.

pub mod chunk;
pub mod gateway;
pub mod mapping;
pub mod outcome;
pub mod report;
pub mod repositories;
pub mod run;
pub mod value_objects;
pub mod window;

pub use chunk::ChunkRange;
pub use gateway::{ComparatorError, ComparatorGateway};
pub use mapping::{MappingError, TableMapping};
pub use outcome::{ComparisonOutcome, MismatchDetail, MismatchKind};
pub use report::{AggregateReport, Notifier, ReportVerdict, TableReport};
pub use repositories::{ProgressRepository, ResultRepository};
pub use run::{RunStatus, RunTallies, ValidationRun};
pub use value_objects::{KeyTuple, KeyValue, RunId};
pub use window::{RunWindow, WeekdaySet};
