use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spotbot::config::{load_config, AppConfig, Environment};
use spotbot::db::{MemoryRepository, PostgresRepository, Repository};
use spotbot::exchange::synthetic::MarketScenario;
use spotbot::exchange::{BinanceExchange, ExchangeGateway, ReplayExchange};
use spotbot::ledger::LedgerService;
use spotbot::lifecycle::ExecutionService;
use spotbot::models::StrategyType;
use spotbot::persistence::{RedisPersistence, TickLog};
use spotbot::TradingBot;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "spotbot", version, about = "Spot trading bot for a single exchange account")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "SPOTBOT_CONFIG")]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Restore or start the execution and trade until Ctrl+C
    Run,
    /// Print the active execution and its balances
    Status,
    /// Terminate an execution
    Terminate { exe_id: Uuid },
    /// Replay synthetic prices against an in-memory store
    Simulate {
        #[arg(long, default_value = "sideways")]
        scenario: String,
        /// Ticks per asset, overrides the configured value
        #[arg(long)]
        ticks: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_json);

    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::info!(env = ?config.env, quote = %config.quote_currency, "spotbot starting");

    match cli.command {
        Command::Run => run(&config).await,
        Command::Status => status(&config).await,
        Command::Terminate { exe_id } => terminate(&config, exe_id).await,
        Command::Simulate {
            scenario,
            ticks,
            seed,
        } => simulate(&config, &scenario, ticks, seed).await,
    }
}

fn setup_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spotbot=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: &AppConfig) -> Result<()> {
    let repo = connect_repository(config).await?;
    let tick_log = connect_tick_log(config).await;
    let gateway = build_gateway(config, None)?;

    let bot = TradingBot::new(
        &config.quote_currency,
        gateway,
        repo,
        tick_log,
        &config.pipeline,
    )
    .await?;

    let strategy_type: StrategyType = config.strategy.strategy_type.parse()?;
    let exe = bot
        .create_or_restore_execution(strategy_type, config.strategy.props.clone())
        .await?;
    tracing::info!(exe_id = %exe.exe_id, strategy = %exe.strategy_type, "Execution ready");

    let metrics = bot
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!(metrics = ?metrics, "spotbot stopped");
    Ok(())
}

async fn status(config: &AppConfig) -> Result<()> {
    let repo = connect_repository(config).await?;
    let executions = ExecutionService::new(repo.clone(), config.quote_currency.as_str());

    let Some(exe) = executions.get_currently_active().await? else {
        println!("No active execution");
        return Ok(());
    };

    let ledger = LedgerService::new(repo);
    let account = ledger.latest(exe.exe_id).await?;
    let operations = ledger.operations(exe.exe_id).await?;

    println!("{}", serde_json::to_string_pretty(&exe)?);
    println!("{}", serde_json::to_string_pretty(&account.get_asset_amounts())?);
    println!("{} operations", operations.len());
    Ok(())
}

async fn terminate(config: &AppConfig, exe_id: Uuid) -> Result<()> {
    let repo = connect_repository(config).await?;
    let executions = ExecutionService::new(repo, config.quote_currency.as_str());
    let exe = executions.terminate(exe_id).await?;
    println!("Execution {} is {}", exe.exe_id, exe.status.as_str());
    Ok(())
}

async fn simulate(
    config: &AppConfig,
    scenario: &str,
    ticks: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    let scenario: MarketScenario = scenario.parse()?;
    let mut config = config.clone();
    config.env = Environment::Simulation;
    config.replay.price_files.clear();
    if let Some(ticks) = ticks {
        config.replay.synthetic_ticks = ticks;
    }
    if seed.is_some() {
        config.replay.seed = seed;
    }

    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let gateway = build_gateway(&config, Some(scenario))?;
    let bot = TradingBot::new(
        &config.quote_currency,
        gateway,
        repo,
        None,
        &config.pipeline,
    )
    .await?;

    let strategy_type: StrategyType = config.strategy.strategy_type.parse()?;
    let exe = bot
        .create_or_restore_execution(strategy_type, config.strategy.props.clone())
        .await?;
    let start = bot.get_asset_amounts(exe.exe_id).await?;

    let metrics = bot.run(std::future::pending()).await?;
    let end = bot.get_asset_amounts(exe.exe_id).await?;
    let operations = bot.get_operations(exe.exe_id).await?;

    println!("Scenario: {:?}", scenario);
    println!("Operations: {}", operations.len());
    println!("Start balances: {}", serde_json::to_string_pretty(&start)?);
    println!("End balances: {}", serde_json::to_string_pretty(&end)?);
    println!("Pipeline: {}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

async fn connect_repository(config: &AppConfig) -> Result<Arc<dyn Repository>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(
            PostgresRepository::new(url)
                .await
                .context("failed to connect to Postgres")?,
        )),
        None => {
            tracing::warn!("No database_url configured, state will not survive a restart");
            Ok(Arc::new(MemoryRepository::new()))
        }
    }
}

async fn connect_tick_log(config: &AppConfig) -> Option<Arc<dyn TickLog>> {
    let url = config.redis_url.as_ref()?;
    match RedisPersistence::new(url).await {
        Ok(redis) => Some(Arc::new(redis)),
        Err(e) => {
            tracing::warn!("Redis unavailable, ticks will not be stored: {}", e);
            None
        }
    }
}

fn build_gateway(
    config: &AppConfig,
    scenario: Option<MarketScenario>,
) -> Result<Arc<dyn ExchangeGateway>> {
    let quote = config.quote_currency.as_str();

    if config.env != Environment::Simulation {
        tracing::info!(rest = %config.binance.rest_url, "Using Binance gateway");
        return Ok(Arc::new(BinanceExchange::new(&config.binance, quote)?));
    }

    let replay = &config.replay;
    let exchange = if replay.price_files.is_empty() {
        let seed = replay.seed.unwrap_or_else(rand::random);
        tracing::info!(seed, ticks = replay.synthetic_ticks, "Using synthetic replay");
        ReplayExchange::synthetic(
            quote,
            replay.balances(),
            &replay.opening_prices(),
            scenario.unwrap_or(MarketScenario::Sideways),
            replay.synthetic_ticks,
            seed,
        )?
    } else {
        tracing::info!(files = replay.price_files.len(), "Using price file replay");
        ReplayExchange::from_csv_files(quote, replay.balances(), &replay.price_files)?
    };
    Ok(Arc::new(exchange))
}
