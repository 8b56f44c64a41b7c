//! CLI command definitions and dispatch.

mod assemble;
mod phase;
mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use cnb_compose_core::config::ComposeConfig;
use cnb_compose_core::image::{BuilderImage, ImageReference};
use cnb_compose_runtime::engine::ContainerRuntime;

/// cnb-compose - assemble ephemeral buildpack builders and run lifecycle phases.
#[derive(Parser)]
#[command(name = "cnb-compose", version, about)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Overlay lifecycle, extension and buildpack images onto a builder and commit it
    Assemble(assemble::AssembleArgs),
    /// Run one lifecycle phase in a builder image
    Phase(phase::PhaseArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Options naming the base builder, shared by all builder commands.
#[derive(Args, Debug, Clone)]
pub struct BuilderOpts {
    /// Base builder image
    #[arg(long)]
    pub builder: Option<String>,

    /// User id the builder's processes run as
    #[arg(long)]
    pub uid: Option<u32>,

    /// Group id the builder's processes run as
    #[arg(long)]
    pub gid: Option<u32>,

    /// YAML configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl BuilderOpts {
    pub(crate) fn load_config(&self) -> Result<ComposeConfig, Box<dyn std::error::Error>> {
        Ok(load_config(self.config.as_deref())?)
    }

    /// Builder descriptor from flags, falling back to the config file.
    pub(crate) fn builder_image(
        &self,
        config: &ComposeConfig,
    ) -> Result<BuilderImage, Box<dyn std::error::Error>> {
        let from_config = config.builder.as_ref().map(|b| b.to_builder_image());
        let image = match (&self.builder, &from_config) {
            (Some(image), _) => ImageReference::new(image.as_str())?,
            (None, Some(builder)) => builder.image().clone(),
            (None, None) => {
                return Err("no builder image given (use --builder or a config file)".into())
            }
        };
        let uid = self
            .uid
            .or(from_config.as_ref().map(|b| b.user_id()))
            .unwrap_or(0);
        let gid = self
            .gid
            .or(from_config.as_ref().map(|b| b.group_id()))
            .unwrap_or(0);
        let run_images = from_config
            .map(|b| b.run_images().to_vec())
            .unwrap_or_default();
        Ok(BuilderImage::new(image, uid, gid).with_run_images(run_images))
    }
}

fn load_config(path: Option<&Path>) -> cnb_compose_core::error::Result<ComposeConfig> {
    match path {
        Some(path) => ComposeConfig::from_file(path),
        None => Ok(ComposeConfig::default()),
    }
}

/// Parse a list of image references given on the command line.
pub(crate) fn parse_references(
    values: &[String],
) -> Result<Vec<ImageReference>, Box<dyn std::error::Error>> {
    Ok(values
        .iter()
        .map(|v| ImageReference::new(v.as_str()))
        .collect::<Result<Vec<_>, _>>()?)
}

/// Connect to the local container engine.
pub(crate) fn connect() -> Result<Arc<dyn ContainerRuntime>, Box<dyn std::error::Error>> {
    let runtime = cnb_compose_runtime::engine::DockerRuntime::connect()?;
    Ok(Arc::new(runtime))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Assemble(args) => assemble::execute(args).await,
        Command::Phase(args) => phase::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
