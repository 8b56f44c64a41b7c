use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ComposeError, Result};
use crate::image::{BuilderImage, ImageReference};
use crate::lifecycle::{
    CACHE_VOL_PATH, DOCKER_SOCKET_PATH, KANIKO_VOL_PATH, LAUNCH_CACHE_VOL_PATH, LAYERS_VOL_PATH,
    PLATFORM_VOL_PATH, WORKSPACE_VOL_PATH,
};
use crate::log::LogConfig;

/// Platform API level used when none is configured.
pub const DEFAULT_PLATFORM_LEVEL: &str = "0.10";

/// Buildpack platform settings shared by every phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Platform API level (exported to phases as CNB_PLATFORM_API)
    #[serde(default = "default_platform_level")]
    pub platform_level: String,

    /// Lifecycle image overriding the builder's own lifecycle
    #[serde(default)]
    pub lifecycle_image: Option<ImageReference>,

    /// Environment passed to every phase container
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Whether the builder is trusted with registry/daemon credentials
    #[serde(default)]
    pub trust_builder: Option<bool>,
}

fn default_platform_level() -> String {
    DEFAULT_PLATFORM_LEVEL.to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::new(None, None, None, None)
    }
}

impl PlatformConfig {
    pub fn new(
        platform_level: Option<String>,
        lifecycle_image: Option<ImageReference>,
        environment: Option<BTreeMap<String, String>>,
        trust_builder: Option<bool>,
    ) -> Self {
        Self {
            platform_level: platform_level.unwrap_or_else(default_platform_level),
            lifecycle_image,
            environment: environment.unwrap_or_default(),
            trust_builder,
        }
    }

    /// `KEY=VALUE` pairs for a container spec, platform level first.
    pub fn container_env(&self) -> Vec<String> {
        let mut env = vec![format!("CNB_PLATFORM_API={}", self.platform_level)];
        env.extend(
            self.environment
                .iter()
                .map(|(key, value)| format!("{}={}", key, value)),
        );
        env
    }
}

/// Names of the runtime volumes bound into phase containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseVolumes {
    pub application: String,
    pub layers: String,
    pub cache: String,
    pub launch_cache: String,
    pub platform: String,
    pub kaniko: String,

    /// Host docker socket, bound for phases that talk to the daemon
    #[serde(default)]
    pub docker_socket: Option<String>,
}

impl PhaseVolumes {
    /// Volume names scoped to one build.
    pub fn for_build(build_id: &str) -> Self {
        let name = |kind: &str| format!("cnb-compose-{}-{}", kind, build_id);
        Self {
            application: name("app"),
            layers: name("layers"),
            cache: name("cache"),
            launch_cache: name("launch-cache"),
            platform: name("platform"),
            kaniko: name("kaniko"),
            docker_socket: None,
        }
    }

    pub fn with_docker_socket(mut self, host_path: impl Into<String>) -> Self {
        self.docker_socket = Some(host_path.into());
        self
    }

    /// Bind specifications (`source:target`) for a phase container.
    pub fn binds(&self, include_docker_socket: bool) -> Vec<String> {
        let mut binds = vec![
            format!("{}:{}", self.application, WORKSPACE_VOL_PATH),
            format!("{}:{}", self.layers, LAYERS_VOL_PATH),
            format!("{}:{}", self.cache, CACHE_VOL_PATH),
            format!("{}:{}", self.launch_cache, LAUNCH_CACHE_VOL_PATH),
            format!("{}:{}", self.platform, PLATFORM_VOL_PATH),
            format!("{}:{}", self.kaniko, KANIKO_VOL_PATH),
        ];
        if include_docker_socket {
            if let Some(socket) = &self.docker_socket {
                binds.push(format!("{}:{}", socket, DOCKER_SOCKET_PATH));
            }
        }
        binds
    }
}

impl Default for PhaseVolumes {
    fn default() -> Self {
        Self::for_build(&uuid::Uuid::new_v4().simple().to_string())
    }
}

/// Base builder settings as written in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
    pub image: ImageReference,
    #[serde(default)]
    pub user_id: u32,
    #[serde(default)]
    pub group_id: u32,
    #[serde(default)]
    pub run_images: Vec<ImageReference>,
}

impl BuilderConfig {
    pub fn to_builder_image(&self) -> BuilderImage {
        BuilderImage::new(self.image.clone(), self.user_id, self.group_id)
            .with_run_images(self.run_images.clone())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeConfig {
    #[serde(default)]
    pub builder: Option<BuilderConfig>,

    #[serde(default)]
    pub lifecycle: Option<ImageReference>,

    #[serde(default)]
    pub extensions: Vec<ImageReference>,

    #[serde(default)]
    pub buildpacks: Vec<ImageReference>,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub volumes: Option<PhaseVolumes>,

    /// Image the export phase writes
    #[serde(default)]
    pub output_image: Option<ImageReference>,

    /// Run image for analyze/export
    #[serde(default)]
    pub run_image: Option<ImageReference>,
}

impl ComposeConfig {
    /// Load a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ComposeError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Lifecycle image to overlay: explicit setting first, then the platform override.
    pub fn lifecycle_image(&self) -> Option<&ImageReference> {
        self.lifecycle
            .as_ref()
            .or(self.platform.lifecycle_image.as_ref())
    }
}
