use habit_bot::BotConfig;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = BotConfig::from_env();

    // RUST_LOG wins over LOG_LEVEL, which defaults to info.
    let level = config
        .as_ref()
        .map(|c| c.log_level.as_str())
        .unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = habit_bot::bot::run(config).await {
        error!(error = %e, "bot stopped with an error");
        std::process::exit(1);
    }
}
