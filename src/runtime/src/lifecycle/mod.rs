//! Lifecycle phase execution against an assembled builder.
//!
//! - `PhaseContext`: runtime, builder and platform settings for one build
//! - `LifecyclePhase`: entry point, arguments and user of each phase
//! - `run_phase`: create, start, relay logs, wait

mod context;
mod executor;
mod phase;
mod relay;

pub use context::{PhaseContext, RunAs};
pub use executor::{run_builder_phase, run_phase, PhaseState};
pub use phase::LifecyclePhase;
pub use relay::{relay_logs, LineSplitter, LogRelay};
