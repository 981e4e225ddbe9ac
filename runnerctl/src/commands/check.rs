use anyhow::Result;
use clap::Args;
use job_runner::JobError;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Image to look up (default: `defaultImage` from runner settings)
    #[arg(long)]
    pub image: Option<String>,
}

pub async fn run(args: CheckArgs) -> Result<i32> {
    let settings = super::load_settings()?;
    let image = args.image.unwrap_or_else(|| settings.default_image.clone());
    let supervisor = super::supervisor(&settings);

    match supervisor.check_image(&image).await {
        Ok(()) => {
            println!("{image}: available");
            Ok(0)
        }
        Err(err @ JobError::ImageNotFound { .. }) => {
            eprintln!("Error [{}]: {}", err.code(), err);
            eprintln!(
                "Pull it first, e.g. `{} pull {}`",
                settings.runtime, image
            );
            Ok(1)
        }
        Err(err) => Err(err.into()),
    }
}
