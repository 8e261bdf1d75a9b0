use clap::Parser;
use tradehook::cli::{check, Cli, Command};
use tradehook::infrastructure::config::settings::Config;
use tradehook::infrastructure::runtime;
use tracing::error;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Check => {
            if let Err(e) = check(&config) {
                eprintln!("Check failed: {e}");
                std::process::exit(1);
            }
        }
        Command::Run => {
            config.init_logging();
            if let Err(e) = runtime::run(config).await {
                error!(error = %e, "Fatal error");
                std::process::exit(1);
            }
        }
    }
}
