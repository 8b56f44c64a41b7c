//! Container-to-container subtree copy.
//!
//! The archive read from the source is handed to the destination unread, so
//! the payload is never held in full anywhere on the host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cnb_compose_core::error::{ComposeError, ResourceKind, Result, TransferSide};
use futures::{StreamExt, TryStreamExt};

use crate::engine::ContainerRuntime;

/// One end of an archive transfer.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLocation<'a> {
    pub container_id: &'a str,
    pub path: &'a str,
}

impl<'a> ArchiveLocation<'a> {
    pub fn new(container_id: &'a str, path: &'a str) -> Self {
        Self { container_id, path }
    }
}

/// Stream the subtree at `source` into the directory `destination`.
pub async fn transfer_archive(
    runtime: &dyn ContainerRuntime,
    source: ArchiveLocation<'_>,
    destination: ArchiveLocation<'_>,
) -> Result<()> {
    tracing::debug!(
        source = %source.container_id,
        from = source.path,
        destination = %destination.container_id,
        to = destination.path,
        "Transferring archive"
    );

    let stream = runtime
        .copy_archive_from_container(source.container_id, source.path)
        .await
        .map_err(|e| match e {
            ComposeError::NotFound {
                kind: ResourceKind::Container,
                ..
            } => ComposeError::ArchiveSourceNotFound {
                container_id: source.container_id.to_string(),
            },
            ComposeError::NotFound { .. } => e,
            other => failed(TransferSide::Source, source, other),
        })?;

    // Read errors surface through the destination call; remember that they
    // came from the source side.
    let source_failed = Arc::new(AtomicBool::new(false));
    let flag = source_failed.clone();
    let stream = stream
        .inspect_err(move |_| flag.store(true, Ordering::SeqCst))
        .boxed();

    runtime
        .copy_archive_to_container(destination.container_id, destination.path, stream)
        .await
        .map_err(|e| {
            if source_failed.load(Ordering::SeqCst) {
                failed(TransferSide::Source, source, e)
            } else if e.is_not_found() {
                e
            } else {
                failed(TransferSide::Destination, destination, e)
            }
        })
}

fn failed(side: TransferSide, at: ArchiveLocation<'_>, err: ComposeError) -> ComposeError {
    let message = match err {
        ComposeError::IoError(e) => e.to_string(),
        other => other.to_string(),
    };
    ComposeError::TransferFailed {
        side,
        container_id: at.container_id.to_string(),
        path: at.path.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ContainerSpec, FileTree, MemoryRuntime, Operation};
    use cnb_compose_core::image::ImageReference;

    async fn setup() -> (MemoryRuntime, String, String) {
        let runtime = MemoryRuntime::new();
        runtime.add_image(
            "lifecycle:1",
            FileTree::new()
                .with_file("/cnb/lifecycle/builder", b"builder-bin")
                .with_file("/cnb/lifecycle/detector", b"detector-bin"),
        );
        runtime.add_image("builder:1", FileTree::new().with_dir("/cnb"));
        let src = runtime
            .create_container(&ContainerSpec::disposable(
                ImageReference::new("lifecycle:1").unwrap(),
            ))
            .await
            .unwrap();
        let dst = runtime
            .create_container(&ContainerSpec::disposable(
                ImageReference::new("builder:1").unwrap(),
            ))
            .await
            .unwrap();
        (runtime, src, dst)
    }

    #[tokio::test]
    async fn test_transfer_copies_subtree() {
        let (runtime, src, dst) = setup().await;
        transfer_archive(
            &runtime,
            ArchiveLocation::new(&src, "/cnb/lifecycle"),
            ArchiveLocation::new(&dst, "/cnb"),
        )
        .await
        .unwrap();

        let fs = runtime.container_fs(&dst).unwrap();
        assert_eq!(
            fs.read_to_string("/cnb/lifecycle/builder").unwrap(),
            "builder-bin"
        );
        assert!(fs.contains("/cnb/lifecycle/detector"));
    }

    #[tokio::test]
    async fn test_transfer_is_idempotent() {
        let (runtime, src, dst) = setup().await;
        for _ in 0..2 {
            transfer_archive(
                &runtime,
                ArchiveLocation::new(&src, "/cnb/lifecycle"),
                ArchiveLocation::new(&dst, "/cnb"),
            )
            .await
            .unwrap();
        }
        let once = {
            let (runtime, src, dst) = setup().await;
            transfer_archive(
                &runtime,
                ArchiveLocation::new(&src, "/cnb/lifecycle"),
                ArchiveLocation::new(&dst, "/cnb"),
            )
            .await
            .unwrap();
            runtime.container_fs(&dst).unwrap()
        };
        assert_eq!(runtime.container_fs(&dst).unwrap(), once);
    }

    #[tokio::test]
    async fn test_missing_source_container() {
        let (runtime, _src, dst) = setup().await;
        let err = transfer_archive(
            &runtime,
            ArchiveLocation::new("gone", "/cnb/lifecycle"),
            ArchiveLocation::new(&dst, "/cnb"),
        )
        .await
        .unwrap_err();
        match err {
            ComposeError::ArchiveSourceNotFound { container_id } => {
                assert_eq!(container_id, "gone")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_source_path_is_not_found() {
        let (runtime, src, dst) = setup().await;
        let err = transfer_archive(
            &runtime,
            ArchiveLocation::new(&src, "/cnb/buildpacks"),
            ArchiveLocation::new(&dst, "/cnb"),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_source_read_failure_names_source() {
        let (runtime, src, dst) = setup().await;
        runtime.fail_on(Operation::ReadArchive);
        let err = transfer_archive(
            &runtime,
            ArchiveLocation::new(&src, "/cnb/lifecycle"),
            ArchiveLocation::new(&dst, "/cnb"),
        )
        .await
        .unwrap_err();
        match err {
            ComposeError::TransferFailed {
                side, container_id, ..
            } => {
                assert_eq!(side, TransferSide::Source);
                assert_eq!(container_id, src);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_destination_failure_names_destination() {
        let (runtime, src, dst) = setup().await;
        runtime.fail_on(Operation::CopyTo);
        let err = transfer_archive(
            &runtime,
            ArchiveLocation::new(&src, "/cnb/lifecycle"),
            ArchiveLocation::new(&dst, "/cnb"),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ComposeError::TransferFailed {
                side: TransferSide::Destination,
                ..
            }
        ));
    }
}
