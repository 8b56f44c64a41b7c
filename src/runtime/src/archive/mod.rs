//! In-memory archive streaming between containers.
//!
//! - `transfer_archive`: copy a subtree from one container into another
//! - `populate_mount_point_dirs`: create owned, empty directories in a container

mod mounts;
mod transfer;

pub use mounts::{
    populate_mount_point_dirs, stream_archive_into, write_mount_point_archive, PIPE_BUFFER_SIZE,
};
pub use transfer::{transfer_archive, ArchiveLocation};
