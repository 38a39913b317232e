//! Subnet price alert bot
//!
//! Long-running alert engine plus a few one-shot subcommands for poking at
//! prices and history from the terminal.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use subnet_alerter::{
    config::Config,
    engine::AlertEngine,
    notify::Notifier,
    source::{HttpPriceSource, PriceSource},
    storage::Persister,
    telegram::{TelegramBot, TelegramNotifier},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "subnet-alerter")]
#[command(about = "Price alert bot for subnets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the alert engine and the Telegram command listener
    Run,
    /// Print the current price of a subnet
    Price { netuid: u16 },
    /// Print persisted trigger history
    History {
        /// Restrict to one subnet
        netuid: Option<u16>,
    },
    /// Send a test message to a chat
    TestNotify { chat_id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run => run_bot(config).await,
        Commands::Price { netuid } => show_price(config, netuid).await,
        Commands::History { netuid } => show_history(config, netuid).await,
        Commands::TestNotify { chat_id } => test_notify(config, chat_id).await,
    }
}

async fn run_bot(config: Config) -> anyhow::Result<()> {
    tracing::info!("starting subnet alert bot");

    let source: Arc<dyn PriceSource> = Arc::new(HttpPriceSource::new(&config.source)?);

    let Some(tg) = config.telegram.clone() else {
        anyhow::bail!("telegram is not configured; the engine has no way to deliver alerts");
    };
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(tg.bot_token.clone()));

    let engine = Arc::new(AlertEngine::new(
        source,
        notifier,
        Persister::new(&config.storage),
        config.engine.clone(),
    ));
    engine.load_state().await;

    let bot = Arc::new(TelegramBot::new(tg.bot_token, tg.chat_id, engine.clone()));
    tokio::spawn(bot.start_polling());

    engine.run().await;
    Ok(())
}

async fn show_price(config: Config, netuid: u16) -> anyhow::Result<()> {
    let source = HttpPriceSource::new(&config.source)?;
    let quote = source.get_price(netuid).await?;
    println!("Subnet {} ({}): {:.4} τ", quote.netuid, quote.name, quote.price);
    Ok(())
}

async fn show_history(config: Config, netuid: Option<u16>) -> anyhow::Result<()> {
    let persister = Persister::new(&config.storage);
    let (_, history) = persister.load().await;

    let mut subnets: Vec<u16> = history.keys().copied().collect();
    subnets.sort_unstable();

    let mut printed = false;
    for subnet in subnets {
        if netuid.is_some_and(|wanted| wanted != subnet) {
            continue;
        }
        println!("Subnet {subnet}");
        for entry in &history[&subnet] {
            println!(
                "  {} user {} target {:.4} initial {:.4} triggered {:.4} ({})",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.owner_id,
                entry.target_price,
                entry.initial_price,
                entry.triggered_price,
                entry.direction,
            );
        }
        printed = true;
    }
    if !printed {
        println!("no alert history");
    }
    Ok(())
}

async fn test_notify(config: Config, chat_id: i64) -> anyhow::Result<()> {
    let Some(tg) = config.telegram else {
        anyhow::bail!("telegram is not configured");
    };
    let notifier = TelegramNotifier::new(tg.bot_token);
    notifier
        .notify(chat_id as u64, "🔔 Test notification from subnet-alerter")
        .await?;
    println!("sent");
    Ok(())
}
