//! Import orchestration engine.
//!
//! Data flows one way: enumerator → dispatcher → poller → reconciler →
//! reporter. The dispatcher creates the jobs, the poller alone updates them,
//! and the reconciler reads the final snapshot once polling has stopped.

pub mod adapters;
pub mod dispatcher;
pub mod enumerator;
pub mod ledger;
pub mod model;
pub mod ops;
pub mod orchestrator;
pub mod poller;
pub mod reconciler;
pub mod reporter;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod fakes;

pub use dispatcher::{ImportDispatcher, ImportTemplate};
pub use model::{Archive, BatchResult, ImportJob, ImportStatus, ProgressSnapshot};
pub use ops::{ArchiveSource, ImportService, ProgressSink};
pub use orchestrator::{BatchSettings, MigrationOrchestrator};
pub use poller::{PollOutcome, PollSettings, StopReason};
pub use reporter::{ConsoleProgress, ElapsedReport};
