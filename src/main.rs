use clap::{Parser, Subcommand};
use spotbot::api::PredictionFeedClient;
use spotbot::config::{AppConfig, ExchangeKind, DEFAULT_CONFIG_PATH};
use spotbot::db::{PositionStore, PostgresPersistence};
use spotbot::exchange::{Exchange, PaperExchange, RetryingExchange};
use spotbot::execution::{CycleScheduler, EngineContext};
use spotbot::persistence::{LogObserver, ObserverSet, PositionObserver, RedisPersistence};
use spotbot::retry::RetryPolicy;
use spotbot::Result;
use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spotbot", about = "Spot trading bot driven by a prediction feed")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the position lifecycle engine
    Run,
    /// Download the prediction feed into the database
    Collect {
        /// Keep collecting every `feed.interval_secs`
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
    /// Print the most recent positions
    Positions {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    setup_logging(config.settings.debug);

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Collect { watch } => collect(config, watch).await,
        Commands::Positions { limit } => positions(config, limit).await,
    }
}

fn setup_logging(debug: bool) {
    let default_filter = if debug { "spotbot=debug" } else { "spotbot=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_to_postgres(config: &AppConfig) -> Result<PostgresPersistence> {
    let database_url = config
        .database
        .url
        .as_deref()
        .ok_or("database.url is not configured (SPOTBOT__DATABASE__URL)")?;
    Ok(PostgresPersistence::new(database_url).await?)
}

fn build_exchange(config: &AppConfig) -> Arc<dyn Exchange> {
    let trading = &config.trading;
    match config.exchange.kind {
        ExchangeKind::Paper => Arc::new(RetryingExchange::new(
            PaperExchange::new(
                config.exchange.paper.clone(),
                &trading.trading_pair,
                &trading.base_asset,
                &trading.quote_asset,
            ),
            RetryPolicy::default(),
        )),
    }
}

async fn build_observers(config: &AppConfig) -> Arc<dyn PositionObserver> {
    let mut observers = ObserverSet::new().with(Arc::new(LogObserver));

    if let Some(redis_url) = &config.redis.url {
        match RedisPersistence::new(redis_url, config.redis.history).await {
            Ok(redis) => observers = observers.with(Arc::new(redis)),
            Err(e) => tracing::warn!(
                "Failed to connect to Redis ({}), continuing without snapshot publication",
                e
            ),
        }
    }

    Arc::new(observers)
}

async fn run(config: AppConfig) -> Result<()> {
    tracing::info!("🚀 spotbot starting");

    let engine = Arc::new(config.engine()?);
    let postgres = Arc::new(connect_to_postgres(&config).await?);
    let exchange = build_exchange(&config);
    let observer = build_observers(&config).await;

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Pair: {} (feed symbol {})", engine.trading_pair, engine.symbol);
    tracing::info!("  Amount: {}", engine.amount);
    tracing::info!(
        "  Retries: bid {} / sell {} / sell index {}",
        engine.bid_retry,
        engine.sell_retry,
        engine.sell_index
    );
    tracing::info!(
        "  Buy delay: {} min, expiry: {} min",
        engine.buy_delay,
        engine.elapsed_time_exp
    );

    let ctx = EngineContext::new(engine, exchange, postgres.clone(), postgres, observer).await?;
    let mut scheduler = CycleScheduler::new(Arc::new(ctx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down (open positions resume on next start)");
        }
        result = scheduler.run() => {
            result?;
        }
    }

    tracing::info!("👋 spotbot stopped");
    Ok(())
}

async fn collect(config: AppConfig, watch: bool) -> Result<()> {
    let postgres = connect_to_postgres(&config).await?;
    let feed = PredictionFeedClient::new(&config.feed.url, config.feed.requests_per_minute)?;
    let interval = Duration::from_secs(config.feed.interval_secs.max(1));

    loop {
        match feed.fetch().await {
            Ok(signals) => {
                let saved = postgres.upsert_signals(&signals).await?;
                tracing::info!("✅ Stored {} predictions", saved);

                if let Some(signal) = signals.iter().find(|s| s.symbol == config.trading.symbol) {
                    tracing::info!(
                        "  {}: {} elapsed {:?} entry {:?} target {:?}",
                        signal.symbol,
                        signal.direction.as_str(),
                        signal.elapsed_minutes,
                        signal.entry_price,
                        signal.target_price
                    );
                }
            }
            Err(e) if watch => tracing::error!("Prediction download failed: {:#}", e),
            Err(e) => return Err(e.into()),
        }

        if !watch {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

async fn positions(config: AppConfig, limit: i64) -> Result<()> {
    let postgres = connect_to_postgres(&config).await?;
    let positions = postgres.recent(limit).await?;

    if positions.is_empty() {
        println!("No positions recorded");
        return Ok(());
    }

    println!(
        "{:<36}  {:<8}  {:<10}  {:<16}  {:>12}  {:>12}  {:>12}  {:>12}",
        "transaction", "pair", "side", "status", "amount", "buy", "sell", "profit"
    );
    for p in positions {
        println!(
            "{:<36}  {:<8}  {:<10}  {:<16}  {:>12}  {:>12}  {:>12}  {:>12}",
            p.transaction_id,
            p.symbol,
            p.side,
            p.status,
            p.amount,
            p.buy_price.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            p.sell_price.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            p.realized_profit
                .or(p.unrealized_profit)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".into()),
        );
    }

    Ok(())
}
