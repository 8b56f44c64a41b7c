//! Mount-point synthesis.
//!
//! Builds a gzip tar of empty, owned directories and streams it into a
//! container while it is being written. The writer runs on a blocking worker
//! and feeds a bounded in-memory pipe; the container runtime reads the other
//! end. A full pipe blocks the writer, so memory stays bounded no matter how
//! many entries are written.

use std::io::Write;

use cnb_compose_core::error::{ComposeError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use tokio_util::io::{ReaderStream, SyncIoBridge};

use crate::engine::ContainerRuntime;

/// Capacity of the in-memory pipe between archive writer and uploader.
pub const PIPE_BUFFER_SIZE: usize = 4096;

/// Write a gzip compressed tar holding one empty directory per entry of `dirs`.
///
/// Entries are written relative to `/`, owned by `uid:gid` with mode 0755.
/// Names longer than the 100 bytes a ustar header holds are written with the
/// GNU long-name extension.
pub fn write_mount_point_archive<W: Write>(
    writer: W,
    uid: u32,
    gid: u32,
    dirs: &[String],
) -> std::io::Result<W> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for dir in dirs {
        let relative = dir.trim_start_matches('/');
        if relative.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a mount point directory: '{}'", dir),
            ));
        }

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_uid(uid as u64);
        header.set_gid(gid as u64);
        header.set_mtime(0);
        builder.append_data(&mut header, format!("{}/", relative), std::io::empty())?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()
}

/// Stream an archive produced by `producer` into `path` of a container.
///
/// `producer` runs on a blocking worker and writes into a pipe of
/// [`PIPE_BUFFER_SIZE`] bytes; the runtime's upload consumes the other end
/// concurrently. Both sides are joined before returning. The pipe's write end
/// is dropped when the producer returns, on success or failure, which ends the
/// upload stream.
///
/// A producer error is returned as `ProducerFailed` with the original cause,
/// except when it is the broken pipe left behind by a failed upload, in which
/// case the upload's error is returned.
pub async fn stream_archive_into<F>(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    path: &str,
    producer: F,
) -> Result<()>
where
    F: FnOnce(Box<dyn Write + Send>) -> std::io::Result<()> + Send + 'static,
{
    let (reader, writer) = tokio::io::duplex(PIPE_BUFFER_SIZE);

    // The bridge captures the current runtime handle, so it must be built here
    // rather than on the blocking worker.
    let bridge = SyncIoBridge::new(writer);
    let producer = tokio::task::spawn_blocking(move || producer(Box::new(bridge)));

    let body = ReaderStream::with_capacity(reader, PIPE_BUFFER_SIZE)
        .boxed();
    let uploaded = runtime
        .copy_archive_to_container(container_id, path, body)
        .await;

    let produced = producer
        .await
        .map_err(|e| ComposeError::Interrupted(format!("archive producer: {}", e)))?;

    match (produced, uploaded) {
        (Ok(()), uploaded) => uploaded,
        (Err(e), Err(upload)) if e.kind() == std::io::ErrorKind::BrokenPipe => Err(upload),
        (Err(e), _) => Err(ComposeError::ProducerFailed { source: e }),
    }
}

/// Create `dirs` in a container as empty directories owned by `uid:gid`.
pub async fn populate_mount_point_dirs(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    uid: u32,
    gid: u32,
    dirs: Vec<String>,
) -> Result<()> {
    tracing::debug!(
        container_id = %container_id,
        uid,
        gid,
        count = dirs.len(),
        "Populating mount point directories"
    );

    stream_archive_into(runtime, container_id, "/", move |out| {
        let mut out = write_mount_point_archive(out, uid, gid, &dirs)?;
        out.flush()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ContainerSpec, FileTree, MemoryRuntime, Operation};
    use cnb_compose_core::image::ImageReference;
    use flate2::read::GzDecoder;
    use std::io::Read;

    struct Listed {
        path: String,
        is_dir: bool,
        size: u64,
        uid: u64,
        gid: u64,
    }

    fn list(archive: &[u8]) -> Vec<Listed> {
        let mut tar = tar::Archive::new(GzDecoder::new(archive));
        tar.entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let header = e.header();
                Listed {
                    path: e.path().unwrap().to_string_lossy().into_owned(),
                    is_dir: header.entry_type().is_dir(),
                    size: header.size().unwrap(),
                    uid: header.uid().unwrap(),
                    gid: header.gid().unwrap(),
                }
            })
            .collect()
    }

    async fn container(runtime: &MemoryRuntime) -> String {
        runtime.add_image("builder:1", FileTree::new().with_dir("/cnb"));
        runtime
            .create_container(&ContainerSpec::disposable(
                ImageReference::new("builder:1").unwrap(),
            ))
            .await
            .unwrap()
    }

    #[test]
    fn test_archive_has_one_empty_dir_per_path() {
        let long = format!("/deep/{}", "x".repeat(150));
        let dirs = vec![
            "/workspace".to_string(),
            "/platform/env".to_string(),
            long.clone(),
        ];
        let archive = write_mount_point_archive(Vec::new(), 1000, 1001, &dirs).unwrap();

        let entries = list(&archive);
        assert_eq!(entries.len(), 3);
        for (entry, dir) in entries.iter().zip(&dirs) {
            assert_eq!(
                entry.path.trim_end_matches('/'),
                dir.trim_start_matches('/')
            );
            assert!(entry.is_dir);
            assert_eq!(entry.size, 0);
            assert_eq!(entry.uid, 1000);
            assert_eq!(entry.gid, 1001);
        }
        assert!(entries[2].path.len() > 100);
    }

    #[test]
    fn test_archive_rejects_root() {
        let err = write_mount_point_archive(Vec::new(), 0, 0, &["/".to_string()]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_archive_is_gzip() {
        let archive = write_mount_point_archive(Vec::new(), 0, 0, &["/cache".to_string()]).unwrap();
        assert_eq!(&archive[..2], &[0x1f, 0x8b]);
        let mut raw = Vec::new();
        GzDecoder::new(&archive[..]).read_to_end(&mut raw).unwrap();
        assert_eq!(raw.len() % 512, 0);
    }

    #[tokio::test]
    async fn test_populate_creates_owned_dirs() {
        let runtime = MemoryRuntime::new();
        let id = container(&runtime).await;
        let long = format!("/layers/{}", "l".repeat(120));
        populate_mount_point_dirs(
            &runtime,
            &id,
            1000,
            1000,
            vec![
                "/workspace".to_string(),
                "/platform/env".to_string(),
                long.clone(),
            ],
        )
        .await
        .unwrap();

        let fs = runtime.container_fs(&id).unwrap();
        for dir in ["/workspace", "/platform/env", long.as_str()] {
            let entry = fs.get(dir).unwrap();
            assert!(entry.is_dir, "{dir} is not a directory");
            assert_eq!((entry.uid, entry.gid), (1000, 1000));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_large_entry_list_streams_through_small_pipe() {
        let runtime = MemoryRuntime::new();
        let id = container(&runtime).await;
        let dirs: Vec<String> = (0..2000).map(|i| format!("/mnt/volume-{i:05}")).collect();
        populate_mount_point_dirs(&runtime, &id, 1, 2, dirs.clone())
            .await
            .unwrap();

        let fs = runtime.container_fs(&id).unwrap();
        assert!(dirs.iter().all(|d| fs.get(d).is_some_and(|e| e.is_dir)));
    }

    #[tokio::test]
    async fn test_producer_failure_surfaces_cause() {
        let runtime = MemoryRuntime::new();
        let id = container(&runtime).await;
        let err = stream_archive_into(&runtime, &id, "/", |mut out| {
            out.write_all(b"partial")?;
            Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "entry encoding failed",
            ))
        })
        .await
        .unwrap_err();

        match err {
            ComposeError::ProducerFailed { source } => {
                assert_eq!(source.kind(), std::io::ErrorKind::InvalidData);
                assert_eq!(source.to_string(), "entry encoding failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_mount_point_fails_as_producer_error() {
        let runtime = MemoryRuntime::new();
        let id = container(&runtime).await;
        let err = populate_mount_point_dirs(&runtime, &id, 0, 0, vec!["/".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::ProducerFailed { .. }));
    }

    #[tokio::test]
    async fn test_upload_failure_wins_over_broken_pipe() {
        let runtime = MemoryRuntime::new();
        let id = container(&runtime).await;
        runtime.fail_on(Operation::CopyTo);
        let dirs: Vec<String> = (0..5000).map(|i| format!("/mnt/{i}")).collect();
        let err = populate_mount_point_dirs(&runtime, &id, 0, 0, dirs)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ComposeError::Runtime {
                operation: "copy-to",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_producer_panic_is_interrupted() {
        let runtime = MemoryRuntime::new();
        let id = container(&runtime).await;
        let err = stream_archive_into(&runtime, &id, "/", |_out| -> std::io::Result<()> {
            panic!("writer crashed")
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ComposeError::Interrupted(_)));
    }
}
