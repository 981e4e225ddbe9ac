use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "runnerctl", version, about = "Run payload programs inside container images")]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage a payload into the workspace and run it in a container
    Run(commands::run::RunArgs),
    /// Verify that an image is available locally
    Check(commands::check::CheckArgs),
    /// Stop and remove a leftover container
    Cleanup(commands::cleanup::CleanupArgs),
    /// Print version and exit
    Version,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let code = match cli.cmd {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Check(args) => commands::check::run(args).await?,
        Commands::Cleanup(args) => commands::cleanup::run(args).await?,
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
