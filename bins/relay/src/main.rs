mod cmd;
mod config;
mod error;

use clap::Parser;
use config::{Cli, Commands, RelayConfig};
use error::AppError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut cfg = RelayConfig::load(&cli.global.config)?;
    cfg.apply_global(&cli.global);

    match cli.command {
        Commands::Publish(args) => {
            cfg.apply_source(&args);
            cmd::publish::run(&cfg).await
        }
        Commands::Subscribe(args) => {
            cfg.apply_subscribe(&args);
            cmd::subscribe::run(&cfg).await
        }
        Commands::Serve(args) => {
            cfg.apply_listen(args.listen.as_ref());
            cmd::serve::run(&cfg).await
        }
        Commands::Run(args) => {
            cfg.apply_source(&args.source);
            cfg.apply_listen(args.listen.as_ref());
            cmd::run::run(&cfg).await
        }
    }
}
