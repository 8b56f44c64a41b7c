//! cnb-compose runtime - builder image assembly and lifecycle phases.
//!
//! Everything here talks to a container engine through [`ContainerRuntime`]:
//! module overlays, mount-point synthesis, image commit, and phase execution.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod builder;
pub mod disposable;
pub mod engine;
pub mod lifecycle;

pub use archive::{populate_mount_point_dirs, transfer_archive, ArchiveLocation};
pub use builder::{create_build_image, BuilderAssembler, ModuleKind};
pub use disposable::{with_container, ContainerGuard, Disposal};
#[cfg(feature = "docker")]
pub use engine::DockerRuntime;
pub use engine::{ContainerRuntime, ContainerSpec, LogChunk, LogOptions, MemoryRuntime};
pub use lifecycle::{run_builder_phase, run_phase, LifecyclePhase, PhaseContext, PhaseState};

/// cnb-compose runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
