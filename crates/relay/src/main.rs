use clap::Parser;
use tracing_subscriber::EnvFilter;

use cr_domain::config::ConfigSeverity;
use cr_relay::cli::{load_config, Cli, Command};
use cr_relay::bootstrap;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            let state = bootstrap::build_state(config, cli.config.clone())?;
            bootstrap::start(&state).await?;

            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
                _ = state.shutdown.notified() => tracing::info!("terminal closed"),
            }

            bootstrap::shutdown(&state).await;
            Ok(())
        }
        Some(Command::Validate) => {
            let config = load_config(&cli.config)?;
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("Config OK: {} repo(s)", config.repos.len());
            Ok(())
        }
        Some(Command::Version) => {
            println!("coderelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
