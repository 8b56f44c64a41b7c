//! cnb-compose core - value types shared by the runtime and the CLI.
//!
//! This crate provides image references, builder descriptors, lifecycle
//! argument lists, configuration and the error taxonomy.

pub mod config;
pub mod error;
pub mod image;
pub mod lifecycle;
pub mod log;

// Re-export commonly used types
pub use config::{BuilderConfig, ComposeConfig, PhaseVolumes, PlatformConfig};
pub use error::{ComposeError, ResourceKind, Result, TransferSide};
pub use image::{BuilderImage, ImageReference};
pub use lifecycle::{ContainerStatus, LifecycleArgs};
pub use log::{ConsoleLogSink, LogConfig, LogLevel, LogSink, LogStreamKind};

/// cnb-compose version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
