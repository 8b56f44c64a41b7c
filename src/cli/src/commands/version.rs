//! `cnb-compose version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("cnb-compose version {}", cnb_compose_core::VERSION);
    Ok(())
}
