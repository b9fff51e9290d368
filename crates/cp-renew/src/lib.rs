//! Bulk renewal pipeline: per-run context, renewal workers behind a bounded
//! pool, the site registration sink, and the run controller that sequences
//! dispatch, drain and reload.

pub mod context;
pub mod controller;
pub mod pool;
pub mod reload;
pub mod render;
pub mod sink;
pub mod worker;

pub use context::{Collaborators, RunContext, RunCounters, RunSettings};
pub use controller::{CollaboratorFactory, RunController, RunPhase, RunReport};
pub use pool::DispatchSummary;
pub use reload::{CommandReloader, ReloadError, Reloader};
pub use render::RenderError;
pub use sink::SinkReport;
pub use worker::WorkerError;
