//! Settings shared by every lifecycle phase of one build.

use std::sync::Arc;

use cnb_compose_core::config::{ComposeConfig, PhaseVolumes, PlatformConfig};
use cnb_compose_core::image::{BuilderImage, ImageReference};
use cnb_compose_core::lifecycle::LifecycleArgs;
use cnb_compose_core::log::LogConfig;

use crate::engine::{ContainerRuntime, ContainerSpec};

/// User a phase container runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAs {
    /// The builder image's own uid and gid.
    Builder,
    Root,
}

impl RunAs {
    pub fn uid(&self, builder: &BuilderImage) -> u32 {
        match self {
            Self::Builder => builder.user_id(),
            Self::Root => 0,
        }
    }

    /// Docker `user` value.
    pub fn user_spec(&self, builder: &BuilderImage) -> String {
        match self {
            Self::Builder => format!("{}:{}", builder.user_id(), builder.group_id()),
            Self::Root => "0".to_string(),
        }
    }
}

/// Everything a phase needs besides its own arguments.
#[derive(Clone)]
pub struct PhaseContext {
    runtime: Arc<dyn ContainerRuntime>,
    builder: BuilderImage,
    log: LogConfig,
    platform: PlatformConfig,
    volumes: PhaseVolumes,
    output_image: Option<ImageReference>,
    run_image: Option<ImageReference>,
}

impl PhaseContext {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, builder: BuilderImage) -> Self {
        Self {
            runtime,
            builder,
            log: LogConfig::default(),
            platform: PlatformConfig::default(),
            volumes: PhaseVolumes::default(),
            output_image: None,
            run_image: None,
        }
    }

    /// Context for `builder` with settings taken from a config file.
    pub fn from_config(
        runtime: Arc<dyn ContainerRuntime>,
        builder: BuilderImage,
        config: &ComposeConfig,
    ) -> Self {
        let mut context = Self::new(runtime, builder)
            .with_log_config(config.log.clone())
            .with_platform(config.platform.clone());
        if let Some(volumes) = &config.volumes {
            context.volumes = volumes.clone();
        }
        context.output_image = config.output_image.clone();
        context.run_image = config.run_image.clone();
        context
    }

    pub fn with_log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn with_platform(mut self, platform: PlatformConfig) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_volumes(mut self, volumes: PhaseVolumes) -> Self {
        self.volumes = volumes;
        self
    }

    pub fn with_output_image(mut self, image: ImageReference) -> Self {
        self.output_image = Some(image);
        self
    }

    pub fn with_run_image(mut self, image: ImageReference) -> Self {
        self.run_image = Some(image);
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn builder(&self) -> &BuilderImage {
        &self.builder
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.log
    }

    pub fn platform(&self) -> &PlatformConfig {
        &self.platform
    }

    pub fn volumes(&self) -> &PhaseVolumes {
        &self.volumes
    }

    pub fn output_image(&self) -> Option<&ImageReference> {
        self.output_image.as_ref()
    }

    /// Explicit run image, else the builder's first one.
    pub fn run_image(&self) -> Option<&ImageReference> {
        self.run_image
            .as_ref()
            .or_else(|| self.builder.run_images().first())
    }

    /// Container spec for one phase invocation.
    pub fn phase_container_spec(
        &self,
        args: &LifecycleArgs,
        run_as: RunAs,
        with_docker_socket: bool,
    ) -> ContainerSpec {
        ContainerSpec::new(
            self.builder.image_for_phases().clone(),
            args.as_slice().to_vec(),
        )
        .with_user(run_as.user_spec(&self.builder))
        .with_env(self.platform.container_env())
        .with_binds(self.volumes.binds(with_docker_socket))
    }
}
