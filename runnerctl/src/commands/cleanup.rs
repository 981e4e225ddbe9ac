use anyhow::{Context, Result};
use clap::Args;

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Name of the container to stop and remove
    #[arg(long)]
    pub name: String,
}

/// Stops and removes `name`; a container that is already gone is not an error.
pub async fn run(args: CleanupArgs) -> Result<i32> {
    let settings = super::load_settings()?;
    let supervisor = super::supervisor(&settings);

    supervisor
        .cleanup(&args.name)
        .await
        .with_context(|| format!("cleanup of '{}' failed", args.name))?;
    println!("{}: removed", args.name);
    Ok(0)
}
