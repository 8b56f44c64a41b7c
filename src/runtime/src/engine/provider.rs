//! ContainerRuntime - Trait for container engine backends.

use async_trait::async_trait;
use bytes::Bytes;
use cnb_compose_core::error::Result;
use cnb_compose_core::image::ImageReference;
use cnb_compose_core::log::LogStreamKind;
use futures::stream::BoxStream;

/// Tar byte stream read from or written to a container filesystem.
pub type ArchiveStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Container output frames, in arrival order.
pub type LogStream = BoxStream<'static, Result<LogChunk>>;

/// Everything needed to create a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: ImageReference,
    pub cmd: Vec<String>,
    /// `uid` or `uid:gid` the command runs as
    pub user: Option<String>,
    pub env: Vec<String>,
    /// `source:target` bind specifications
    pub binds: Vec<String>,
}

impl ContainerSpec {
    pub fn new(image: ImageReference, cmd: Vec<String>) -> Self {
        Self {
            image,
            cmd,
            user: None,
            env: Vec::new(),
            binds: Vec::new(),
        }
    }

    /// A container that is never started and only exposes the image filesystem.
    ///
    /// The command is a single empty token: images without a default command
    /// (buildpack and extension images usually are `FROM scratch`) cannot be
    /// created with none at all.
    pub fn disposable(image: ImageReference) -> Self {
        Self::new(image, vec![String::new()])
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_binds(mut self, binds: Vec<String>) -> Self {
        self.binds = binds;
        self
    }
}

/// Which container output to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub follow: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
}

impl LogOptions {
    /// Follow both streams until the container exits.
    pub fn follow_all(timestamps: bool) -> Self {
        Self {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps,
        }
    }
}

/// One frame of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub stream: LogStreamKind,
    pub message: Bytes,
}

impl LogChunk {
    pub fn stdout(message: impl Into<Bytes>) -> Self {
        Self {
            stream: LogStreamKind::Stdout,
            message: message.into(),
        }
    }

    pub fn stderr(message: impl Into<Bytes>) -> Self {
        Self {
            stream: LogStreamKind::Stderr,
            message: message.into(),
        }
    }
}

/// Operations consumed from a container engine.
///
/// All calls block (asynchronously) until the engine answers. Missing
/// images and containers are reported as `ComposeError::NotFound`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Remove a container, stopping it first if needed.
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Read `path` out of a container as a tar stream rooted at the path's basename.
    async fn copy_archive_from_container(
        &self,
        container_id: &str,
        path: &str,
    ) -> Result<ArchiveStream>;

    /// Extract a tar stream (optionally gzip compressed) into `path`.
    async fn copy_archive_to_container(
        &self,
        container_id: &str,
        path: &str,
        archive: ArchiveStream,
    ) -> Result<()>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Attach to container output; the stream ends when the container does.
    async fn attach_logs(&self, container_id: &str, options: LogOptions) -> Result<LogStream>;

    /// Block until the container exits and return its exit code.
    async fn wait_container(&self, container_id: &str) -> Result<i64>;

    /// Commit a container's filesystem as a new image.
    async fn commit_container(&self, container_id: &str) -> Result<ImageReference>;
}
