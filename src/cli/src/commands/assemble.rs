//! `cnb-compose assemble` command - Compose an ephemeral builder image.
//!
//! Prints the committed image reference on stdout, so it can be captured and
//! handed to `cnb-compose phase --ephemeral`.

use clap::Args;
use cnb_compose_core::image::ImageReference;
use cnb_compose_runtime::builder::create_build_image;

use super::BuilderOpts;

#[derive(Args, Debug)]
pub struct AssembleArgs {
    #[command(flatten)]
    pub builder: BuilderOpts,

    /// Lifecycle image to overlay
    #[arg(long)]
    pub lifecycle: Option<String>,

    /// Image extension to overlay (repeatable, applied in order)
    #[arg(long = "extension")]
    pub extensions: Vec<String>,

    /// Buildpack image to overlay (repeatable, applied in order)
    #[arg(long = "buildpack")]
    pub buildpacks: Vec<String>,
}

/// Modules to overlay: flags when given, else the config file's lists.
struct Modules {
    lifecycle: Option<ImageReference>,
    extensions: Vec<ImageReference>,
    buildpacks: Vec<ImageReference>,
}

fn resolve_modules(
    args: &AssembleArgs,
    config: &cnb_compose_core::config::ComposeConfig,
) -> Result<Modules, Box<dyn std::error::Error>> {
    let lifecycle = match &args.lifecycle {
        Some(image) => Some(ImageReference::new(image.as_str())?),
        None => config.lifecycle_image().cloned(),
    };
    let extensions = if args.extensions.is_empty() {
        config.extensions.clone()
    } else {
        super::parse_references(&args.extensions)?
    };
    let buildpacks = if args.buildpacks.is_empty() {
        config.buildpacks.clone()
    } else {
        super::parse_references(&args.buildpacks)?
    };
    Ok(Modules {
        lifecycle,
        extensions,
        buildpacks,
    })
}

pub async fn execute(args: AssembleArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.builder.load_config()?;
    let base = args.builder.builder_image(&config)?;
    let modules = resolve_modules(&args, &config)?;

    let runtime = super::connect()?;
    let assembled = create_build_image(
        &runtime,
        &base,
        modules.lifecycle.as_ref(),
        Some(modules.extensions.as_slice()),
        Some(modules.buildpacks.as_slice()),
    )
    .await?;

    println!("{}", assembled.image_for_phases());
    Ok(())
}
