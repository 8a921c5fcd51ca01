use clap::Parser;

use debrief_capture::commands::{self, Cli, Context};
use debrief_capture::errors::AppError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Configuration problems are fatal; nothing runs without a valid config.
    let mut ctx = match Context::load(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            env_logger::Builder::from_default_env()
                .filter_level(log::LevelFilter::Info)
                .init();
            log::error!("Failed to load configuration: {}", e);
            eprintln!("❌ {}", e);
            std::process::exit(2);
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(ctx.config.log_filter())
        .init();

    log::info!("Starting Debrief Capture");

    if let Err(e) = commands::run(cli.command, &mut ctx).await {
        log::error!("{}", e);
        eprintln!("❌ {}", e);
        let code = match e {
            AppError::Config(_) => 2,
            AppError::UploadCancelled { .. } => 130,
            _ => 1,
        };
        std::process::exit(code);
    }
}
