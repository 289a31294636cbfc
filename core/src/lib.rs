//! Supervision of an external model process and bookkeeping of the
//! conversation it produces.
//!
//! The flow of one dispatch turn: [`Supervisor`] writes a user message to the
//! live process, a [`decoder::StreamDecoder`] reads envelopes until the turn
//! ends, [`accounting::finalize`] prices it, and [`reconcile::reconcile`]
//! folds the resulting [`Exchange`] into the handle's [`Series`].

pub mod accounting;
pub mod args;
pub mod config;
pub mod decoder;
mod error;
#[cfg(target_os = "linux")]
mod process_death;
pub mod reconcile;
pub mod record;
mod supervisor;
mod transport;
mod util;

pub use accounting::Metrics;
pub use config::Config;
pub use config::CostRates;
pub use config::ModelConfig;
pub use config::Price;
pub use config::TaskCategory;
pub use config::ToolAllowLists;
pub use error::ConfigurationError;
pub use error::ExecutionStateError;
pub use error::Result;
pub use error::TetherErr;
pub use reconcile::Placement;
pub use record::Episode;
pub use record::Exchange;
pub use record::Series;
pub use supervisor::Executor;
pub use supervisor::ProcessInstance;
pub use supervisor::Supervisor;
pub use supervisor::Terminal;
pub use supervisor::TurnOutcome;
pub use transport::ExitInfo;
pub use transport::Mode;
pub use transport::OutputEvent;
