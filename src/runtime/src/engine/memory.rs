//! In-memory container engine.
//!
//! Images and containers are plain file trees. Archives crossing the trait
//! boundary are real tar streams, so everything built on top of
//! [`ContainerRuntime`] can be exercised without a daemon. Every operation can
//! be made to fail on demand, and log output and exit codes are scripted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;

use async_trait::async_trait;
use bytes::Bytes;
use cnb_compose_core::error::{ComposeError, ResourceKind, Result};
use cnb_compose_core::image::ImageReference;
use cnb_compose_core::log::LogStreamKind;
use futures::StreamExt;
use parking_lot::Mutex;

use super::provider::{
    ArchiveStream, ContainerRuntime, ContainerSpec, LogChunk, LogOptions, LogStream,
};

/// Size of the chunks archives are streamed in.
const STREAM_CHUNK_SIZE: usize = 512;

/// Timestamp prefixed to log lines when timestamps are requested.
pub const FIXED_LOG_TIMESTAMP: &str = "2024-01-01T00:00:00.000000000Z";

/// Runtime operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Remove,
    CopyFrom,
    /// Reading an archive stream returned by `copy_archive_from_container`
    ReadArchive,
    CopyTo,
    Start,
    AttachLogs,
    Wait,
    Commit,
}

/// A file or directory in a [`FileTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub is_dir: bool,
    pub data: Vec<u8>,
    pub uid: u64,
    pub gid: u64,
    pub mode: u32,
}

impl FsEntry {
    pub fn dir(uid: u64, gid: u64) -> Self {
        Self {
            is_dir: true,
            data: Vec::new(),
            uid,
            gid,
            mode: 0o755,
        }
    }

    pub fn file(data: &[u8]) -> Self {
        Self {
            is_dir: false,
            data: data.to_vec(),
            uid: 0,
            gid: 0,
            mode: 0o644,
        }
    }
}

/// Filesystem of an image or container, keyed by normalized absolute path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    entries: BTreeMap<String, FsEntry>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root-owned directory and its missing parents.
    pub fn with_dir(mut self, path: &str) -> Self {
        self.insert(&normalize(path), FsEntry::dir(0, 0));
        self
    }

    /// Add a file and its missing parent directories.
    pub fn with_file(mut self, path: &str, data: &[u8]) -> Self {
        self.insert(&normalize(path), FsEntry::file(data));
        self
    }

    pub fn get(&self, path: &str) -> Option<&FsEntry> {
        self.entries.get(&normalize(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// File contents as UTF-8, if `path` is a file.
    pub fn read_to_string(&self, path: &str) -> Option<String> {
        self.get(path)
            .filter(|e| !e.is_dir)
            .map(|e| String::from_utf8_lossy(&e.data).into_owned())
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn insert(&mut self, path: &str, entry: FsEntry) {
        let mut parent = parent_of(path);
        while let Some(dir) = parent {
            self.entries
                .entry(dir.clone())
                .or_insert_with(|| FsEntry::dir(0, 0));
            parent = parent_of(&dir);
        }
        self.entries.insert(path.to_string(), entry);
    }

    /// Tar archive of `path`, rooted at its basename.
    fn archive(&self, path: &str) -> std::io::Result<Vec<u8>> {
        let path = normalize(path);
        let root = self.entries.get(&path).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, path.clone())
        })?;
        let base = path.rsplit('/').next().unwrap_or_default().to_string();

        let mut builder = tar::Builder::new(Vec::new());
        append_entry(&mut builder, &base, root)?;
        if root.is_dir {
            let prefix = format!("{}/", path.trim_end_matches('/'));
            for (child, entry) in self.entries.range(prefix.clone()..) {
                let Some(relative) = child.strip_prefix(&prefix) else {
                    break;
                };
                append_entry(&mut builder, &format!("{}/{}", base, relative), entry)?;
            }
        }
        builder.into_inner()
    }

    /// Extract a tar (or gzip compressed tar) archive below `dest`.
    fn extract(&mut self, dest: &str, archive: &[u8]) -> std::io::Result<()> {
        let decompressed;
        let raw = if archive.starts_with(&[0x1f, 0x8b]) {
            let mut buf = Vec::new();
            flate2::read::GzDecoder::new(archive).read_to_end(&mut buf)?;
            decompressed = buf;
            &decompressed[..]
        } else {
            archive
        };

        let dest = normalize(dest);
        let mut tar = tar::Archive::new(raw);
        for entry in tar.entries()? {
            let mut entry = entry?;
            let relative = entry.path()?.to_string_lossy().into_owned();
            let header = entry.header();
            let is_dir = header.entry_type().is_dir();
            let uid = header.uid()?;
            let gid = header.gid()?;
            let mode = header.mode()?;
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;

            let target = normalize(&format!("{}/{}", dest, relative));
            if target == "/" {
                continue;
            }
            self.insert(
                &target,
                FsEntry {
                    is_dir,
                    data,
                    uid,
                    gid,
                    mode,
                },
            );
        }
        Ok(())
    }
}

fn append_entry(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    entry: &FsEntry,
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(if entry.is_dir {
        tar::EntryType::Directory
    } else {
        tar::EntryType::Regular
    });
    header.set_size(entry.data.len() as u64);
    header.set_mode(entry.mode);
    header.set_uid(entry.uid);
    header.set_gid(entry.gid);
    header.set_mtime(0);
    builder.append_data(&mut header, path, &entry.data[..])
}

/// Collapse `.`/`..`/duplicate separators into an absolute path without trailing slash.
fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => None,
        Some(pos) => Some(path[..pos].to_string()),
        None => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerState {
    Created,
    Running,
    Exited,
}

#[derive(Debug, Clone)]
struct MemoryContainer {
    spec: ContainerSpec,
    fs: FileTree,
    state: ContainerState,
}

#[derive(Default)]
struct State {
    images: HashMap<String, FileTree>,
    containers: HashMap<String, MemoryContainer>,
    created: Vec<(String, ImageReference)>,
    removed: Vec<String>,
    calls: Vec<String>,
    failures: HashSet<Operation>,
    logs: Vec<LogChunk>,
    exit_code: i64,
    next_id: u64,
    next_commit: u64,
}

/// In-memory [`ContainerRuntime`].
#[derive(Default)]
pub struct MemoryRuntime {
    state: Mutex<State>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, reference: &str, fs: FileTree) {
        self.state.lock().images.insert(reference.to_string(), fs);
    }

    pub fn image(&self, reference: &ImageReference) -> Option<FileTree> {
        self.state.lock().images.get(reference.reference()).cloned()
    }

    /// Make every subsequent call of `operation` fail.
    pub fn fail_on(&self, operation: Operation) {
        self.state.lock().failures.insert(operation);
    }

    pub fn clear_failure(&self, operation: Operation) {
        self.state.lock().failures.remove(&operation);
    }

    /// Output replayed by `attach_logs`.
    pub fn set_logs(&self, logs: Vec<LogChunk>) {
        self.state.lock().logs = logs;
    }

    /// Exit code reported by `wait_container`.
    pub fn set_exit_code(&self, code: i64) {
        self.state.lock().exit_code = code;
    }

    /// Filesystem of a container that still exists.
    pub fn container_fs(&self, container_id: &str) -> Option<FileTree> {
        self.state
            .lock()
            .containers
            .get(container_id)
            .map(|c| c.fs.clone())
    }

    pub fn container_spec(&self, container_id: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .containers
            .get(container_id)
            .map(|c| c.spec.clone())
    }

    /// Whether a container was started and has not been waited on.
    pub fn is_running(&self, container_id: &str) -> bool {
        self.state
            .lock()
            .containers
            .get(container_id)
            .is_some_and(|c| c.state == ContainerState::Running)
    }

    /// Ids of containers that have not been removed.
    pub fn live_containers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of not yet removed containers created from `image`.
    pub fn live_containers_from(&self, image: &str) -> usize {
        self.state
            .lock()
            .containers
            .values()
            .filter(|c| c.spec.image.reference() == image)
            .count()
    }

    /// Number of containers ever created from `image`.
    pub fn created_from(&self, image: &str) -> usize {
        self.state
            .lock()
            .created
            .iter()
            .filter(|(_, i)| i.reference() == image)
            .count()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    /// Operations performed so far, as `operation:target` strings.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn enter(&self, operation: Operation, target: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("{}:{}", operation_name(operation), target));
        if state.failures.contains(&operation) {
            return Err(ComposeError::runtime(
                operation_name(operation),
                target,
                "injected failure",
            ));
        }
        Ok(())
    }
}

fn operation_name(operation: Operation) -> &'static str {
    match operation {
        Operation::Create => "create",
        Operation::Remove => "remove",
        Operation::CopyFrom => "copy-from",
        Operation::ReadArchive => "read-archive",
        Operation::CopyTo => "copy-to",
        Operation::Start => "start",
        Operation::AttachLogs => "attach-logs",
        Operation::Wait => "wait",
        Operation::Commit => "commit",
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.enter(Operation::Create, spec.image.reference())?;
        let mut state = self.state.lock();
        let fs = state
            .images
            .get(spec.image.reference())
            .cloned()
            .ok_or_else(|| ComposeError::image_not_found(spec.image.reference()))?;

        state.next_id += 1;
        let id = format!("mem-{:04}", state.next_id);
        state.containers.insert(
            id.clone(),
            MemoryContainer {
                spec: spec.clone(),
                fs,
                state: ContainerState::Created,
            },
        );
        state.created.push((id.clone(), spec.image.clone()));
        Ok(id)
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.enter(Operation::Remove, container_id)?;
        let mut state = self.state.lock();
        state
            .containers
            .remove(container_id)
            .ok_or_else(|| ComposeError::container_not_found(container_id))?;
        state.removed.push(container_id.to_string());
        Ok(())
    }

    async fn copy_archive_from_container(
        &self,
        container_id: &str,
        path: &str,
    ) -> Result<ArchiveStream> {
        self.enter(Operation::CopyFrom, container_id)?;
        let (archive, fail_midway) = {
            let state = self.state.lock();
            let container = state
                .containers
                .get(container_id)
                .ok_or_else(|| ComposeError::container_not_found(container_id))?;
            let archive = container.fs.archive(path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ComposeError::NotFound {
                        kind: ResourceKind::Path,
                        id: format!("{}:{}", container_id, path),
                    }
                } else {
                    ComposeError::IoError(e)
                }
            })?;
            (archive, state.failures.contains(&Operation::ReadArchive))
        };

        let mut chunks: Vec<std::io::Result<Bytes>> = archive
            .chunks(STREAM_CHUNK_SIZE)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if fail_midway {
            chunks.truncate(1);
            chunks.push(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "archive stream interrupted",
            )));
        }
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn copy_archive_to_container(
        &self,
        container_id: &str,
        path: &str,
        mut archive: ArchiveStream,
    ) -> Result<()> {
        self.enter(Operation::CopyTo, container_id)?;
        if !self.state.lock().containers.contains_key(container_id) {
            return Err(ComposeError::container_not_found(container_id));
        }

        let mut buf = Vec::new();
        while let Some(chunk) = archive.next().await {
            buf.extend_from_slice(&chunk?);
        }

        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| ComposeError::container_not_found(container_id))?;
        container.fs.extract(path, &buf)?;
        Ok(())
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.enter(Operation::Start, container_id)?;
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| ComposeError::container_not_found(container_id))?;
        container.state = ContainerState::Running;
        Ok(())
    }

    async fn attach_logs(&self, container_id: &str, options: LogOptions) -> Result<LogStream> {
        self.enter(Operation::AttachLogs, container_id)?;
        let state = self.state.lock();
        if !state.containers.contains_key(container_id) {
            return Err(ComposeError::container_not_found(container_id));
        }
        let chunks: Vec<Result<LogChunk>> = state
            .logs
            .iter()
            .filter(|c| match c.stream {
                LogStreamKind::Stdout => options.stdout,
                LogStreamKind::Stderr => options.stderr,
            })
            .map(|c| {
                let mut chunk = c.clone();
                if options.timestamps {
                    let mut message = format!("{} ", FIXED_LOG_TIMESTAMP).into_bytes();
                    message.extend_from_slice(&c.message);
                    chunk.message = Bytes::from(message);
                }
                Ok(chunk)
            })
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64> {
        self.enter(Operation::Wait, container_id)?;
        let mut state = self.state.lock();
        let exit_code = state.exit_code;
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| ComposeError::container_not_found(container_id))?;
        container.state = ContainerState::Exited;
        Ok(exit_code)
    }

    async fn commit_container(&self, container_id: &str) -> Result<ImageReference> {
        self.enter(Operation::Commit, container_id)?;
        let mut state = self.state.lock();
        let fs = state
            .containers
            .get(container_id)
            .map(|c| c.fs.clone())
            .ok_or_else(|| ComposeError::container_not_found(container_id))?;
        state.next_commit += 1;
        let reference = format!("memory/commit:{}", state.next_commit);
        state.images.insert(reference.clone(), fs);
        ImageReference::new(reference)
    }
}
