//! Module overlays.
//!
//! A module image (lifecycle, extension or buildpack) is never started. A
//! disposable container exposes its filesystem long enough to stream one
//! subtree into the builder container.

use std::sync::Arc;

use cnb_compose_core::error::Result;
use cnb_compose_core::image::ImageReference;
use cnb_compose_core::lifecycle::{BUILDPACKS_PATH, CNB_PATH, EXTENSIONS_PATH, LIFECYCLE_PATH};

use crate::archive::{transfer_archive, ArchiveLocation};
use crate::disposable::{with_container, Disposal};
use crate::engine::{ContainerRuntime, ContainerSpec};

/// Kind of module image overlaid onto a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Lifecycle,
    Extension,
    Buildpack,
}

impl ModuleKind {
    /// Directory copied out of the module image.
    pub fn source_path(&self) -> &'static str {
        match self {
            Self::Lifecycle => LIFECYCLE_PATH,
            Self::Extension => EXTENSIONS_PATH,
            Self::Buildpack => BUILDPACKS_PATH,
        }
    }

    /// Directory the subtree lands in. The archive is rooted at the source's
    /// basename, so this is the parent of the source path.
    pub fn destination_path(&self) -> &'static str {
        CNB_PATH
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lifecycle => write!(f, "lifecycle"),
            Self::Extension => write!(f, "extension"),
            Self::Buildpack => write!(f, "buildpack"),
        }
    }
}

/// Copy `from` out of `module` into `to` of the target container.
///
/// The module's container is removed on every path. If the copy fails and
/// removal fails as well, the copy error wins.
pub async fn apply_module(
    runtime: &Arc<dyn ContainerRuntime>,
    target_container_id: &str,
    module: &ImageReference,
    from: &str,
    to: &str,
) -> Result<()> {
    tracing::debug!(
        module = %module,
        container_id = %target_container_id,
        from,
        to,
        "Applying module"
    );

    let spec = ContainerSpec::disposable(module.clone());
    with_container(
        runtime,
        &spec,
        Disposal::Always,
        |module_container| async move {
            transfer_archive(
                runtime.as_ref(),
                ArchiveLocation::new(&module_container, from),
                ArchiveLocation::new(target_container_id, to),
            )
            .await
        },
    )
    .await
}

/// Overlay a module of the given kind at its well-known paths.
pub async fn overlay_module(
    runtime: &Arc<dyn ContainerRuntime>,
    target_container_id: &str,
    kind: ModuleKind,
    module: &ImageReference,
) -> Result<()> {
    tracing::info!(kind = %kind, module = %module, "Overlaying module");
    apply_module(
        runtime,
        target_container_id,
        module,
        kind.source_path(),
        kind.destination_path(),
    )
    .await
}
