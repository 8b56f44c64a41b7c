//! Ephemeral builder assembly.
//!
//! Overlays lifecycle, extension and buildpack images onto a container of the
//! base builder, adds the mount-point directories phases expect, and commits
//! the result as a new image.

use std::sync::Arc;

use cnb_compose_core::error::Result;
use cnb_compose_core::image::{BuilderImage, ImageReference};
use cnb_compose_core::lifecycle::mount_point_dirs;

use super::overlay::{overlay_module, ModuleKind};
use crate::archive::populate_mount_point_dirs;
use crate::engine::{ContainerRuntime, ContainerSpec};

/// Composes builder images on one container runtime.
#[derive(Clone)]
pub struct BuilderAssembler {
    runtime: Arc<dyn ContainerRuntime>,
}

impl BuilderAssembler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Build an ephemeral builder image from `base` plus the given modules.
    ///
    /// Modules are applied one at a time in argument order: the lifecycle,
    /// then extensions, then buildpacks. Later modules shadow earlier ones
    /// at the same path.
    ///
    /// The base container is left in place whatever the outcome; reclaiming
    /// it is up to the caller.
    pub async fn assemble(
        &self,
        base: &BuilderImage,
        lifecycle: Option<&ImageReference>,
        extensions: Option<&[ImageReference]>,
        buildpacks: Option<&[ImageReference]>,
    ) -> Result<BuilderImage> {
        let extensions = extensions.unwrap_or_default();
        let buildpacks = buildpacks.unwrap_or_default();

        tracing::info!(
            builder = %base.image(),
            lifecycle = lifecycle.map(|l| l.reference()),
            extensions = extensions.len(),
            buildpacks = buildpacks.len(),
            "Assembling builder image"
        );

        let container_id = self
            .runtime
            .create_container(&ContainerSpec::disposable(base.image().clone()))
            .await?;
        tracing::debug!(container_id = %container_id, "Created base builder container");

        match self
            .compose(&container_id, base, lifecycle, extensions, buildpacks)
            .await
        {
            Ok(committed) => {
                tracing::info!(
                    container_id = %container_id,
                    image = %committed,
                    "Builder image committed"
                );
                Ok(BuilderImage::assembled(
                    base,
                    !extensions.is_empty(),
                    committed,
                ))
            }
            Err(e) => {
                tracing::warn!(
                    container_id = %container_id,
                    error = %e,
                    "Builder assembly failed, base container left in place"
                );
                Err(e)
            }
        }
    }

    async fn compose(
        &self,
        container_id: &str,
        base: &BuilderImage,
        lifecycle: Option<&ImageReference>,
        extensions: &[ImageReference],
        buildpacks: &[ImageReference],
    ) -> Result<ImageReference> {
        if let Some(lifecycle) = lifecycle {
            overlay_module(
                &self.runtime,
                container_id,
                ModuleKind::Lifecycle,
                lifecycle,
            )
            .await?;
        }
        for extension in extensions {
            overlay_module(
                &self.runtime,
                container_id,
                ModuleKind::Extension,
                extension,
            )
            .await?;
        }
        for buildpack in buildpacks {
            overlay_module(
                &self.runtime,
                container_id,
                ModuleKind::Buildpack,
                buildpack,
            )
            .await?;
        }

        populate_mount_point_dirs(
            self.runtime.as_ref(),
            container_id,
            base.user_id(),
            base.group_id(),
            mount_point_dirs(),
        )
        .await?;

        self.runtime.commit_container(container_id).await
    }
}

/// Assemble an ephemeral builder image in one call.
///
/// See [`BuilderAssembler::assemble`].
pub async fn create_build_image(
    runtime: &Arc<dyn ContainerRuntime>,
    base: &BuilderImage,
    lifecycle: Option<&ImageReference>,
    extensions: Option<&[ImageReference]>,
    buildpacks: Option<&[ImageReference]>,
) -> Result<BuilderImage> {
    BuilderAssembler::new(runtime.clone())
        .assemble(base, lifecycle, extensions, buildpacks)
        .await
}
