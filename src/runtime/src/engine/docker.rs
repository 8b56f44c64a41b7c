//! Docker Engine backend.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::image::CommitContainerOptions;
use bollard::models::{ContainerWaitResponse, HostConfig};
use bollard::Docker;
use bytes::Bytes;
use cnb_compose_core::error::{ComposeError, Result};
use cnb_compose_core::image::ImageReference;
use futures::{Stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::sync::Arc;

use super::provider::{
    ArchiveStream, ContainerRuntime, ContainerSpec, LogChunk, LogOptions, LogStream,
};

/// Repository committed builder images are tagged into.
pub const EPHEMERAL_REPOSITORY: &str = "cnb-compose/ephemeral-builder";

/// [`ContainerRuntime`] talking to a Docker (or Podman) daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ComposeError::ConfigError(format!("Failed to connect to Docker: {}", e)))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Whether an archive read error wraps a 404 from the daemon.
fn is_not_found_io(err: &std::io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<bollard::errors::Error>())
        .is_some_and(is_not_found)
}

/// Map a bollard error, turning 404 responses into `NotFound`.
fn map_error(
    operation: &'static str,
    id: &str,
    not_found: fn(String) -> ComposeError,
    err: bollard::errors::Error,
) -> ComposeError {
    if is_not_found(&err) {
        not_found(id.to_string())
    } else {
        ComposeError::runtime(operation, id, err)
    }
}

/// Exit code from the first item of a wait stream.
///
/// The wait endpoint reports non-zero exits as `DockerContainerWaitError`.
fn exit_code(
    container_id: &str,
    item: Option<std::result::Result<ContainerWaitResponse, bollard::errors::Error>>,
) -> Result<i64> {
    match item {
        Some(Ok(response)) => Ok(response.status_code),
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
        Some(Err(e)) => Err(map_error("wait", container_id, container_not_found, e)),
        None => Err(ComposeError::runtime(
            "wait",
            container_id,
            "wait stream ended without a status",
        )),
    }
}

/// Upload body that ends at the first read error, parking it in `slot`.
fn until_read_error(
    archive: ArchiveStream,
    slot: Arc<Mutex<Option<std::io::Error>>>,
) -> impl Stream<Item = Bytes> + Send {
    archive
        .take_while(move |chunk| {
            let keep = match chunk {
                Ok(_) => true,
                Err(e) => {
                    *slot.lock() = Some(std::io::Error::new(e.kind(), e.to_string()));
                    false
                }
            };
            futures::future::ready(keep)
        })
        .filter_map(|chunk| futures::future::ready(chunk.ok()))
}

fn container_not_found(id: String) -> ComposeError {
    ComposeError::container_not_found(id)
}

fn image_not_found(id: String) -> ComposeError {
    ComposeError::image_not_found(id)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.reference().to_string()),
            cmd: Some(spec.cmd.clone()),
            user: spec.user.clone(),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| map_error("create", spec.image.reference(), image_not_found, e))?;

        for warning in &response.warnings {
            tracing::warn!(container_id = %response.id, "{}", warning);
        }
        tracing::debug!(
            container_id = %response.id,
            image = %spec.image,
            "Created container"
        );
        Ok(response.id)
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_error("remove", container_id, container_not_found, e))
    }

    async fn copy_archive_from_container(
        &self,
        container_id: &str,
        path: &str,
    ) -> Result<ArchiveStream> {
        let mut stream = self
            .docker
            .download_from_container(
                container_id,
                Some(DownloadFromContainerOptions {
                    path: path.to_string(),
                }),
            )
            .map_err(std::io::Error::other)
            .boxed();

        // The request is only sent once the stream is polled; pull the first
        // chunk so a missing container is reported here rather than mid-copy.
        let first = match stream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) if is_not_found_io(&e) => {
                return Err(ComposeError::container_not_found(container_id));
            }
            Some(Err(e)) => return Err(ComposeError::runtime("copy-from", container_id, e)),
            None => Bytes::new(),
        };

        Ok(futures::stream::once(async move { Ok(first) })
            .chain(stream)
            .boxed())
    }

    async fn copy_archive_to_container(
        &self,
        container_id: &str,
        path: &str,
        archive: ArchiveStream,
    ) -> Result<()> {
        // The upload body is infallible; a read error ends it early and is
        // reported after the daemon answers.
        let read_error: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));
        let body = until_read_error(archive, read_error.clone());

        let result = self
            .docker
            .upload_to_container_streaming(
                container_id,
                Some(UploadToContainerOptions {
                    path: path.to_string(),
                    ..Default::default()
                }),
                body,
            )
            .await;

        if let Some(e) = read_error.lock().take() {
            return Err(ComposeError::IoError(e));
        }
        result.map_err(|e| map_error("copy-to", container_id, container_not_found, e))
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_error("start", container_id, container_not_found, e))
    }

    async fn attach_logs(&self, container_id: &str, options: LogOptions) -> Result<LogStream> {
        let id = container_id.to_string();
        let stream = self
            .docker
            .logs(
                container_id,
                Some(LogsOptions::<String> {
                    follow: options.follow,
                    stdout: options.stdout,
                    stderr: options.stderr,
                    timestamps: options.timestamps,
                    tail: "all".to_string(),
                    ..Default::default()
                }),
            )
            .filter_map(move |frame| {
                let item = match frame {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(LogChunk::stdout(message)))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(LogChunk::stderr(message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(map_error("attach-logs", &id, container_not_found, e))),
                };
                futures::future::ready(item)
            })
            .boxed();
        Ok(stream)
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64> {
        let mut stream = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions<String>>);

        exit_code(container_id, stream.next().await)
    }

    async fn commit_container(&self, container_id: &str) -> Result<ImageReference> {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let options = CommitContainerOptions {
            container: container_id.to_string(),
            repo: EPHEMERAL_REPOSITORY.to_string(),
            tag: tag.clone(),
            pause: true,
            ..Default::default()
        };

        self.docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| map_error("commit", container_id, container_not_found, e))?;

        ImageReference::new(format!("{}:{}", EPHEMERAL_REPOSITORY, tag))
    }
}
