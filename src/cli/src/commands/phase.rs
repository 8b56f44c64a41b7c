//! `cnb-compose phase` command - Run one lifecycle phase.
//!
//! Container output is relayed to the terminal and the process exits with
//! the phase container's exit code.

use std::sync::Arc;

use clap::Args;
use cnb_compose_core::config::{ComposeConfig, PhaseVolumes};
use cnb_compose_core::image::{BuilderImage, ImageReference};
use cnb_compose_core::lifecycle::DOCKER_SOCKET_PATH;
use cnb_compose_core::log::{ConsoleLogSink, LogLevel};
use cnb_compose_runtime::engine::ContainerRuntime;
use cnb_compose_runtime::lifecycle::{run_phase, LifecyclePhase, PhaseContext};

use super::BuilderOpts;

#[derive(Args, Debug)]
pub struct PhaseArgs {
    /// Phase to run (detect, analyze, restore, build, extend, export)
    pub phase: LifecyclePhase,

    #[command(flatten)]
    pub builder: BuilderOpts,

    /// Assembled builder image to run the phase in (defaults to --builder)
    #[arg(long)]
    pub ephemeral: Option<String>,

    /// The assembled builder had image extensions applied
    #[arg(long)]
    pub extended: bool,

    /// Image written by analyze and export
    #[arg(long)]
    pub output_image: Option<String>,

    /// Run image for analyze
    #[arg(long)]
    pub run_image: Option<String>,

    /// Lifecycle log level
    #[arg(long)]
    pub log_level: Option<LogLevel>,

    /// Prefix container log lines with timestamps
    #[arg(long)]
    pub timestamps: bool,

    /// Identifier scoping the build's volume names
    #[arg(long)]
    pub build_id: Option<String>,

    /// Host docker socket bound into analyze and export
    #[arg(long, default_value = DOCKER_SOCKET_PATH)]
    pub docker_socket: String,
}

/// Volumes named by `--build-id` or the config file, which successive
/// `phase` invocations can share.
fn shared_volumes(args: &PhaseArgs, config: &ComposeConfig) -> Option<PhaseVolumes> {
    match (&args.build_id, &config.volumes) {
        (Some(id), _) => Some(PhaseVolumes::for_build(id)),
        (None, Some(volumes)) => Some(volumes.clone()),
        (None, None) => None,
    }
}

fn phase_context(
    args: &PhaseArgs,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<PhaseContext, Box<dyn std::error::Error>> {
    let config = args.builder.load_config()?;
    let base = args.builder.builder_image(&config)?;
    let builder = match &args.ephemeral {
        Some(image) => {
            BuilderImage::assembled(&base, args.extended, ImageReference::new(image.as_str())?)
        }
        None => base,
    };

    let mut context = PhaseContext::from_config(runtime, builder, &config);

    let mut log = context.log_config().clone();
    if let Some(level) = args.log_level {
        log.level = level;
    }
    log.use_timestamps |= args.timestamps;
    context = context.with_log_config(log);

    let volumes = shared_volumes(args, &config).unwrap_or_else(|| {
        tracing::warn!(
            phase = %args.phase,
            "No --build-id or configured volumes; this phase gets fresh volumes \
             that later phases will not see"
        );
        PhaseVolumes::default()
    });
    context = context.with_volumes(volumes.with_docker_socket(args.docker_socket.as_str()));

    if let Some(image) = &args.output_image {
        context = context.with_output_image(ImageReference::new(image.as_str())?);
    }
    if let Some(image) = &args.run_image {
        context = context.with_run_image(ImageReference::new(image.as_str())?);
    }
    Ok(context)
}

pub async fn execute(args: PhaseArgs) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::connect()?;
    let context = phase_context(&args, runtime)?;
    let use_timestamps = context.log_config().use_timestamps;

    let sink = Arc::new(ConsoleLogSink);
    let status = run_phase(&context, args.phase, sink, use_timestamps).await?;
    tracing::info!(
        phase = %args.phase,
        container_id = %status.container_id,
        rc = status.rc,
        "Phase finished"
    );

    if !status.is_success() {
        std::process::exit(i32::try_from(status.rc).unwrap_or(1));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Command};
    use clap::Parser;
    use cnb_compose_runtime::engine::MemoryRuntime;
    use std::io::Write;

    fn parse(args: &[&str]) -> PhaseArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Phase(args) => args,
            _ => panic!("Expected phase command"),
        }
    }

    fn runtime() -> Arc<dyn ContainerRuntime> {
        Arc::new(MemoryRuntime::new())
    }

    #[test]
    fn test_parse_phase_and_flags() {
        let args = parse(&[
            "cnb-compose",
            "phase",
            "build",
            "--builder",
            "builder:1",
            "--uid",
            "1000",
            "--gid",
            "1000",
            "--log-level",
            "debug",
            "--timestamps",
        ]);
        assert_eq!(args.phase, LifecyclePhase::Build);
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(args.timestamps);
        assert_eq!(args.docker_socket, "/var/run/docker.sock");
    }

    #[test]
    fn test_unknown_phase_rejected() {
        let parsed = Cli::try_parse_from(["cnb-compose", "phase", "launch", "--builder", "b:1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_context_from_flags() {
        let args = parse(&[
            "cnb-compose",
            "phase",
            "export",
            "--builder",
            "builder:1",
            "--uid",
            "1000",
            "--ephemeral",
            "cnb-compose/ephemeral-builder:abc",
            "--extended",
            "--output-image",
            "app:1",
            "--build-id",
            "b42",
        ]);
        let context = phase_context(&args, runtime()).unwrap();

        assert_eq!(
            context.builder().image_for_phases().reference(),
            "cnb-compose/ephemeral-builder:abc"
        );
        assert!(context.builder().has_extensions());
        assert_eq!(context.output_image().unwrap().reference(), "app:1");
        assert_eq!(context.volumes().application, "cnb-compose-app-b42");
        assert_eq!(
            context.volumes().docker_socket.as_deref(),
            Some("/var/run/docker.sock")
        );
        assert!(!context.log_config().use_timestamps);
    }

    #[test]
    fn test_without_ephemeral_runs_in_base_builder() {
        let args = parse(&["cnb-compose", "phase", "detect", "--builder", "builder:1"]);
        let context = phase_context(&args, runtime()).unwrap();
        assert!(!context.builder().is_ephemeral());
        assert_eq!(
            context.builder().image_for_phases().reference(),
            "builder:1"
        );
    }

    #[test]
    fn test_volumes_without_build_id_are_not_shared() {
        let args = parse(&["cnb-compose", "phase", "detect", "--builder", "builder:1"]);
        let config = args.builder.load_config().unwrap();
        assert!(shared_volumes(&args, &config).is_none());

        let first = phase_context(&args, runtime()).unwrap();
        let second = phase_context(&args, runtime()).unwrap();
        assert_ne!(first.volumes().layers, second.volumes().layers);
    }

    #[test]
    fn test_build_id_volumes_are_shared_across_phases() {
        let detect = parse(&[
            "cnb-compose",
            "phase",
            "detect",
            "--builder",
            "builder:1",
            "--build-id",
            "b7",
        ]);
        let build = parse(&[
            "cnb-compose",
            "phase",
            "build",
            "--builder",
            "builder:1",
            "--build-id",
            "b7",
        ]);
        let config = detect.builder.load_config().unwrap();
        let detect_volumes = shared_volumes(&detect, &config).unwrap();
        assert_eq!(detect_volumes, shared_volumes(&build, &config).unwrap());
        assert_eq!(detect_volumes.layers, "cnb-compose-layers-b7");
    }

    #[test]
    fn test_configured_volumes_are_shared() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "volumes:\n  application: my-app\n  layers: my-layers\n  cache: my-cache\n  \
             launch_cache: my-launch-cache\n  platform: my-platform\n  kaniko: my-kaniko"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = parse(&[
            "cnb-compose",
            "phase",
            "build",
            "--builder",
            "builder:1",
            "--config",
            path.as_str(),
        ]);
        let config = args.builder.load_config().unwrap();
        let volumes = shared_volumes(&args, &config).unwrap();
        assert_eq!(volumes.layers, "my-layers");
    }
}
