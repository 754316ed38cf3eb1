use std::path::PathBuf;

use clap::Parser;
use miette::Result;
use threadkeep_core::config;
use threadkeep_discord::{DiscordBotConfig, DiscordError, ThreadkeepBot};
use tracing::info;

#[derive(Parser)]
#[command(name = "threadkeep")]
#[command(about = "Keeps local JSON documents mirrored into Discord threads")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    use tracing_appender::rolling;
    use tracing_subscriber::{
        EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt,
    };

    // Create log directory in user's data directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("threadkeep")
        .join("logs");
    std::fs::create_dir_all(&log_dir).ok();

    // Rotates daily
    let file_appender = rolling::daily(&log_dir, "threadkeep.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = if cli.debug {
        EnvFilter::new("threadkeep_core=debug,threadkeep_discord=debug,threadkeep=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("threadkeep_core=info,threadkeep_discord=info,threadkeep=info,warn")
        })
    };

    let terminal_layer = if cli.debug {
        fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .pretty()
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .compact()
            .boxed()
    };

    let file_env_filter =
        EnvFilter::new("threadkeep_core=debug,threadkeep_discord=debug,threadkeep=debug,info");

    let file_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(terminal_layer.with_filter(env_filter))
        .with(file_layer.with_filter(file_env_filter))
        .init();

    info!(
        "Logging initialized. Logs are being written to: {:?}",
        log_dir.join("threadkeep.log")
    );

    let config = if let Some(config_path) = &cli.config {
        info!("Loading config from: {:?}", config_path);
        config::load_config(config_path).await?
    } else {
        info!("Loading config from standard locations");
        config::load_config_from_standard_locations().await?
    };

    let bot_config = DiscordBotConfig::from_env().ok_or_else(|| {
        DiscordError::missing_config(
            "DISCORD_TOKEN",
            "Set DISCORD_TOKEN in the environment or in a .env file",
        )
    })?;

    let bot = ThreadkeepBot::new(&config, bot_config)?;
    bot.run().await?;

    Ok(())
}
