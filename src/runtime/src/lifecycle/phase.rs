//! Lifecycle phases and their command lines.

use cnb_compose_core::error::{ComposeError, Result};
use cnb_compose_core::lifecycle::{
    LifecycleArgs, APP_PATH_PREFIX, CACHE_VOL_PATH, LAUNCH_CACHE_VOL_PATH, LAYERS_VOL_PATH,
    PLATFORM_VOL_PATH, WORKSPACE_VOL_PATH,
};

use super::context::{PhaseContext, RunAs};

/// One lifecycle binary invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Detect,
    Analyze,
    Restore,
    Build,
    Extend,
    Export,
}

impl LifecyclePhase {
    pub const ALL: [LifecyclePhase; 6] = [
        Self::Detect,
        Self::Analyze,
        Self::Restore,
        Self::Build,
        Self::Extend,
        Self::Export,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Detect => "detect",
            Self::Analyze => "analyze",
            Self::Restore => "restore",
            Self::Build => "build",
            Self::Extend => "extend",
            Self::Export => "export",
        }
    }

    /// Path of the lifecycle binary inside the builder.
    pub fn entry_point(&self) -> &'static str {
        match self {
            Self::Detect => "/cnb/lifecycle/detector",
            Self::Analyze => "/cnb/lifecycle/analyzer",
            Self::Restore => "/cnb/lifecycle/restorer",
            Self::Build => "/cnb/lifecycle/builder",
            Self::Extend => "/cnb/lifecycle/extender",
            Self::Export => "/cnb/lifecycle/exporter",
        }
    }

    /// Phases that talk to the Docker daemon get its socket bound in.
    pub fn needs_docker_socket(&self) -> bool {
        matches!(self, Self::Analyze | Self::Export)
    }

    pub fn run_as(&self, context: &PhaseContext) -> RunAs {
        match self {
            Self::Detect | Self::Build => RunAs::Builder,
            Self::Restore if context.builder().has_extensions() => RunAs::Root,
            Self::Restore => RunAs::Builder,
            Self::Analyze | Self::Extend | Self::Export => RunAs::Root,
        }
    }

    /// Command line for this phase.
    ///
    /// Analyze and export fail with `ConfigError` when no output image is set.
    pub fn args(&self, context: &PhaseContext) -> Result<LifecycleArgs> {
        let level = context.platform().platform_level.as_str();
        let log_level = context.log_config().level.as_str();
        let app = format!("{}{}", WORKSPACE_VOL_PATH, APP_PATH_PREFIX);
        let mut args = LifecycleArgs::new(self.entry_point(), Some(level));

        match self {
            Self::Detect | Self::Build => {
                args.add_arg("-app", app)
                    .add_arg("-layers", LAYERS_VOL_PATH)
                    .add_arg("-platform", PLATFORM_VOL_PATH)
                    .add_arg("-log-level", log_level);
            }
            Self::Analyze => {
                let output = self.required_output(context)?;
                args.add_flag("-daemon")
                    .add_arg("-layers", LAYERS_VOL_PATH)
                    .add_arg("-cache-dir", CACHE_VOL_PATH)
                    .add_arg("-launch-cache", LAUNCH_CACHE_VOL_PATH);
                if let Some(run_image) = context.run_image() {
                    if args.platform_at_least("0.7") {
                        args.add_arg("-run-image", run_image.reference());
                    }
                }
                args.add_arg("-log-level", log_level)
                    .add_positional(output);
            }
            Self::Restore => {
                args.add_arg("-cache-dir", CACHE_VOL_PATH)
                    .add_arg("-layers", LAYERS_VOL_PATH)
                    .add_arg("-log-level", log_level);
                if context.builder().has_extensions() {
                    args.add_arg(
                        "-build-image",
                        context.builder().image_for_phases().reference(),
                    );
                }
            }
            Self::Extend => {
                args.add_arg("-app", app)
                    .add_arg("-layers", LAYERS_VOL_PATH)
                    .add_arg("-platform", PLATFORM_VOL_PATH)
                    .add_arg("-kind", "build")
                    .add_arg("-log-level", log_level);
            }
            Self::Export => {
                let output = self.required_output(context)?;
                args.add_flag("-daemon")
                    .add_arg("-app", app)
                    .add_arg("-layers", LAYERS_VOL_PATH)
                    .add_arg("-cache-dir", CACHE_VOL_PATH)
                    .add_arg("-launch-cache", LAUNCH_CACHE_VOL_PATH)
                    .add_arg("-log-level", log_level)
                    .add_positional(output);
            }
        }
        Ok(args)
    }

    fn required_output(&self, context: &PhaseContext) -> Result<String> {
        context
            .output_image()
            .map(|image| image.reference().to_string())
            .ok_or_else(|| {
                ComposeError::ConfigError(format!("{} phase requires an output image", self))
            })
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for LifecyclePhase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown phase: '{}' (supported: detect, analyze, restore, build, extend, export)",
                    s
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryRuntime;
    use cnb_compose_core::config::PlatformConfig;
    use cnb_compose_core::image::{BuilderImage, ImageReference};
    use cnb_compose_core::log::{LogConfig, LogLevel};
    use std::sync::Arc;

    fn reference(r: &str) -> ImageReference {
        ImageReference::new(r).unwrap()
    }

    fn context(has_extensions: bool) -> PhaseContext {
        let base = BuilderImage::new(reference("builder:base"), 1000, 1000)
            .with_run_images(vec![reference("run:base")]);
        let builder = BuilderImage::assembled(&base, has_extensions, reference("eph:1"));
        PhaseContext::new(Arc::new(MemoryRuntime::new()), builder).with_log_config(LogConfig {
            level: LogLevel::Debug,
            use_timestamps: false,
        })
    }

    #[test]
    fn test_build_args() {
        let args = LifecyclePhase::Build.args(&context(false)).unwrap();
        assert_eq!(
            args.into_vec(),
            vec![
                "/cnb/lifecycle/builder",
                "-app",
                "/workspace/app",
                "-layers",
                "/layers",
                "-platform",
                "/platform",
                "-log-level",
                "debug",
            ]
        );
    }

    #[test]
    fn test_run_as_policy() {
        let plain = context(false);
        let extended = context(true);
        assert_eq!(LifecyclePhase::Build.run_as(&extended), RunAs::Builder);
        assert_eq!(LifecyclePhase::Detect.run_as(&plain), RunAs::Builder);
        assert_eq!(LifecyclePhase::Restore.run_as(&plain), RunAs::Builder);
        assert_eq!(LifecyclePhase::Restore.run_as(&extended), RunAs::Root);
        assert_eq!(LifecyclePhase::Analyze.run_as(&plain), RunAs::Root);
        assert_eq!(LifecyclePhase::Extend.run_as(&plain), RunAs::Root);
        assert_eq!(LifecyclePhase::Export.run_as(&plain), RunAs::Root);
    }

    #[test]
    fn test_analyze_args_end_with_output_image() {
        let ctx = context(false).with_output_image(reference("app:latest"));
        let args = LifecyclePhase::Analyze.args(&ctx).unwrap().into_vec();
        assert_eq!(args[1], "-daemon");
        assert!(args.windows(2).any(|w| w == ["-run-image", "run:base"]));
        assert_eq!(args.last().unwrap(), "app:latest");
    }

    #[test]
    fn test_analyze_skips_run_image_on_old_platform() {
        let ctx = context(false)
            .with_output_image(reference("app:latest"))
            .with_platform(PlatformConfig::new(Some("0.6".to_string()), None, None, None));
        let args = LifecyclePhase::Analyze.args(&ctx).unwrap().into_vec();
        assert!(!args.iter().any(|a| a == "-run-image"));
    }

    #[test]
    fn test_output_image_required() {
        for phase in [LifecyclePhase::Analyze, LifecyclePhase::Export] {
            let err = phase.args(&context(false)).unwrap_err();
            assert!(matches!(err, ComposeError::ConfigError(_)));
        }
    }

    #[test]
    fn test_restore_adds_build_image_when_extended() {
        let args = LifecyclePhase::Restore.args(&context(true)).unwrap().into_vec();
        assert!(args.windows(2).any(|w| w == ["-build-image", "eph:1"]));
        let args = LifecyclePhase::Restore.args(&context(false)).unwrap().into_vec();
        assert!(!args.iter().any(|a| a == "-build-image"));
    }

    #[test]
    fn test_extend_kind_build() {
        let args = LifecyclePhase::Extend.args(&context(true)).unwrap().into_vec();
        assert!(args.windows(2).any(|w| w == ["-kind", "build"]));
    }

    #[test]
    fn test_parse_and_display() {
        for phase in LifecyclePhase::ALL {
            assert_eq!(phase.to_string().parse::<LifecyclePhase>().unwrap(), phase);
        }
        assert_eq!("BUILD".parse::<LifecyclePhase>().unwrap(), LifecyclePhase::Build);
        assert!("launch".parse::<LifecyclePhase>().is_err());
        assert!(LifecyclePhase::Export.needs_docker_socket());
        assert!(!LifecyclePhase::Build.needs_docker_socket());
    }
}
