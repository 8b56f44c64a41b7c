//! Lifecycle paths, argument lists and phase results.

use serde::{Deserialize, Serialize};

/// Root of the buildpack directory tree inside a builder image.
pub const CNB_PATH: &str = "/cnb";
/// Lifecycle binaries.
pub const LIFECYCLE_PATH: &str = "/cnb/lifecycle";
/// Image extensions.
pub const EXTENSIONS_PATH: &str = "/cnb/extensions";
/// Buildpacks.
pub const BUILDPACKS_PATH: &str = "/cnb/buildpacks";

pub const KANIKO_VOL_PATH: &str = "/kaniko";
pub const WORKSPACE_VOL_PATH: &str = "/workspace";
pub const LAYERS_VOL_PATH: &str = "/layers";
pub const CACHE_VOL_PATH: &str = "/cache";
pub const LAUNCH_CACHE_VOL_PATH: &str = "/launch-cache";
pub const PLATFORM_VOL_PATH: &str = "/platform";
pub const DOCKER_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Application sources, relative to the workspace volume.
pub const APP_PATH_PREFIX: &str = "/app";
/// Platform environment, relative to the platform volume.
pub const ENV_PATH_PREFIX: &str = "/env";

/// Directories that must exist in an assembled builder before any phase runs.
pub fn mount_point_dirs() -> Vec<String> {
    vec![
        KANIKO_VOL_PATH.to_string(),
        WORKSPACE_VOL_PATH.to_string(),
        LAYERS_VOL_PATH.to_string(),
        CACHE_VOL_PATH.to_string(),
        LAUNCH_CACHE_VOL_PATH.to_string(),
        PLATFORM_VOL_PATH.to_string(),
        format!("{}{}", PLATFORM_VOL_PATH, ENV_PATH_PREFIX),
    ]
}

/// Ordered command line for a lifecycle binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleArgs {
    tokens: Vec<String>,
    platform_level: Option<String>,
}

impl LifecycleArgs {
    pub fn new(entry_point: impl Into<String>, platform_level: Option<&str>) -> Self {
        Self {
            tokens: vec![entry_point.into()],
            platform_level: platform_level.map(str::to_string),
        }
    }

    /// Append `flag value`.
    pub fn add_arg(&mut self, flag: &str, value: impl Into<String>) -> &mut Self {
        self.tokens.push(flag.to_string());
        self.tokens.push(value.into());
        self
    }

    /// Append a flag that takes no value.
    pub fn add_flag(&mut self, flag: &str) -> &mut Self {
        self.tokens.push(flag.to_string());
        self
    }

    pub fn add_positional(&mut self, value: impl Into<String>) -> &mut Self {
        self.tokens.push(value.into());
        self
    }

    pub fn entry_point(&self) -> &str {
        &self.tokens[0]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.tokens
    }

    /// True when no platform level is set or the set level is at least `min`.
    pub fn platform_at_least(&self, min: &str) -> bool {
        match &self.platform_level {
            None => true,
            Some(level) => platform_level_at_least(level, min),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        self.tokens
    }
}

/// Compare two `major.minor` platform API levels.
///
/// Unparseable components compare as zero.
pub fn platform_level_at_least(level: &str, min: &str) -> bool {
    parse_level(level) >= parse_level(min)
}

fn parse_level(level: &str) -> (u32, u32) {
    let mut parts = level.trim().splitn(2, '.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor)
}

/// Exit code of a finished phase container, with the container that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub rc: i64,
    pub container_id: String,
}

impl ContainerStatus {
    pub fn of(rc: i64, container_id: impl Into<String>) -> Self {
        Self {
            rc,
            container_id: container_id.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.rc == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_keep_insertion_order() {
        let mut args = LifecycleArgs::new("/cnb/lifecycle/builder", None);
        args.add_arg("-app", "/workspace/app")
            .add_arg("-layers", LAYERS_VOL_PATH)
            .add_flag("-daemon")
            .add_positional("out:latest");

        assert_eq!(args.entry_point(), "/cnb/lifecycle/builder");
        assert_eq!(
            args.into_vec(),
            vec![
                "/cnb/lifecycle/builder",
                "-app",
                "/workspace/app",
                "-layers",
                "/layers",
                "-daemon",
                "out:latest"
            ]
        );
    }

    #[test]
    fn test_platform_level_comparison() {
        assert!(platform_level_at_least("0.10", "0.9"));
        assert!(platform_level_at_least("0.12", "0.12"));
        assert!(!platform_level_at_least("0.8", "0.10"));
        assert!(platform_level_at_least("1.0", "0.13"));
    }

    #[test]
    fn test_args_without_level_allow_everything() {
        let args = LifecycleArgs::new("/cnb/lifecycle/extender", None);
        assert!(args.platform_at_least("0.13"));
        let args = LifecycleArgs::new("/cnb/lifecycle/extender", Some("0.9"));
        assert!(!args.platform_at_least("0.10"));
    }

    #[test]
    fn test_mount_point_dirs() {
        let dirs = mount_point_dirs();
        assert_eq!(dirs.len(), 7);
        assert_eq!(dirs[0], "/kaniko");
        assert!(dirs.contains(&"/platform/env".to_string()));
        assert!(dirs.iter().all(|d| d.starts_with('/')));
    }

    #[test]
    fn test_container_status() {
        assert!(ContainerStatus::of(0, "c1").is_success());
        let failed = ContainerStatus::of(51, "c2");
        assert!(!failed.is_success());
        assert_eq!(failed.container_id, "c2");
    }
}
