//! cnb-compose CLI - ephemeral builder assembly and lifecycle phases.

pub mod commands;
