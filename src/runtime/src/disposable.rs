//! Scoped ownership of short-lived containers.
//!
//! Every container created only to serve one operation goes through
//! [`with_container`], which owns removal on all exit paths. If the owning
//! future is dropped before it finishes, the guard schedules removal on the
//! current tokio runtime.

use std::future::Future;
use std::sync::Arc;

use cnb_compose_core::error::Result;

use crate::engine::{ContainerRuntime, ContainerSpec};

/// When a scoped container is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// Remove once the body finishes, whatever the outcome.
    Always,
    /// Remove only if the body fails; on success the caller takes ownership.
    OnFailure,
}

/// Removes its container unless released or disarmed first.
pub struct ContainerGuard {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: Option<String>,
}

impl ContainerGuard {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, container_id: String) -> Self {
        Self {
            runtime,
            container_id: Some(container_id),
        }
    }

    pub fn id(&self) -> &str {
        self.container_id.as_deref().unwrap_or_default()
    }

    /// Remove the container now.
    pub async fn release(mut self) -> Result<()> {
        match self.container_id.take() {
            Some(id) => {
                tracing::debug!(container_id = %id, "Removing container");
                self.runtime.remove_container(&id).await
            }
            None => Ok(()),
        }
    }

    /// Keep the container; returns its id.
    pub fn disarm(mut self) -> String {
        self.container_id.take().unwrap_or_default()
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(id) = self.container_id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(container_id = %id, "Container dropped unreleased, removing");
                let runtime = self.runtime.clone();
                handle.spawn(async move {
                    if let Err(e) = runtime.remove_container(&id).await {
                        tracing::warn!(
                            container_id = %id,
                            error = %e,
                            "Failed to remove container"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::warn!(container_id = %id, "Container leaked: no runtime to remove it");
            }
        }
    }
}

/// Create a container from `spec`, run `body` with its id, and remove it
/// according to `disposal`.
///
/// Creation failures propagate as-is; nothing needs removing then. When the
/// body fails and removal fails too, the body's error is returned and the
/// removal error is logged.
pub async fn with_container<T, F, Fut>(
    runtime: &Arc<dyn ContainerRuntime>,
    spec: &ContainerSpec,
    disposal: Disposal,
    body: F,
) -> Result<T>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let id = runtime.create_container(spec).await?;
    let guard = ContainerGuard::new(runtime.clone(), id.clone());

    match body(id).await {
        Ok(value) => {
            match disposal {
                Disposal::Always => guard.release().await?,
                Disposal::OnFailure => {
                    guard.disarm();
                }
            }
            Ok(value)
        }
        Err(e) => {
            let id = guard.id().to_string();
            if let Err(cleanup) = guard.release().await {
                tracing::warn!(
                    container_id = %id,
                    error = %cleanup,
                    "Failed to remove container after error"
                );
            }
            Err(e)
        }
    }
}
