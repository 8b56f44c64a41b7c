//! Container engine subsystem.
//!
//! - `ContainerRuntime`: operations consumed from a container engine
//! - `DockerRuntime`: Docker Engine API backend
//! - `MemoryRuntime`: in-memory backend for tests and dry runs

#[cfg(feature = "docker")]
mod docker;
pub mod memory;
mod provider;

#[cfg(feature = "docker")]
pub use docker::{DockerRuntime, EPHEMERAL_REPOSITORY};
pub use memory::{FileTree, FsEntry, MemoryRuntime, Operation, FIXED_LOG_TIMESTAMP};
pub use provider::{
    ArchiveStream, ContainerRuntime, ContainerSpec, LogChunk, LogOptions, LogStream,
};
