mod bar;
mod cli;
mod equity_files;
mod error;
mod klines;
mod normalize;
mod pipeline;
mod reconcile;
mod report;
mod screener;
mod storage_utils;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::bar::Interval;
use crate::cli::{Cli, Command, ConfigCommand, CryptoArgs, EquityArgs, Market, ScreenArgs};
use crate::normalize::Grid;
use crate::storage_utils::{AppConfig, AsyncStorageManager};

async fn run_equity(config: &AppConfig, args: EquityArgs, json: bool) -> Result<()> {
    let reconciled = pipeline::reconciled_equities(&config.equities).await?;

    let instrument = match args.instrument {
        Some(code) => code.to_uppercase(),
        None => reconciled
            .table
            .instruments()
            .into_iter()
            .next()
            .context("reconciled table has no instruments")?,
    };
    tracing::info!(%instrument, "building equity series");

    let report = pipeline::series_report(
        &reconciled.table,
        &reconciled.warnings,
        &instrument,
        Grid::Calendar,
        Interval::OneDay,
        "IDX",
        (args.range.from, args.range.to),
    )?;
    report::print_series(&report, json)
}

async fn run_crypto(config: &AppConfig, args: CryptoArgs, json: bool) -> Result<()> {
    let symbol = match args.symbol {
        Some(symbol) => symbol.to_uppercase(),
        None => config
            .klines
            .symbols
            .first()
            .cloned()
            .context("no crypto symbols configured")?,
    };
    let interval = args.interval.unwrap_or(config.klines.interval);
    let limit = args.limit.unwrap_or(config.klines.limit);

    let table =
        pipeline::crypto_table(&config.klines, std::slice::from_ref(&symbol), interval, limit)
            .await?;
    let report = pipeline::series_report(
        &table,
        &[],
        &symbol,
        Grid::Observed,
        interval,
        "BINANCE",
        (args.range.from, args.range.to),
    )?;
    report::print_series(&report, json)
}

async fn run_screen(config: &AppConfig, args: ScreenArgs, json: bool) -> Result<()> {
    let lookback = args.lookback.unwrap_or(config.screener.lookback_days);
    let top = args.top.unwrap_or(config.screener.top);

    let report = match args.market {
        Market::Equities => {
            let reconciled = pipeline::reconciled_equities(&config.equities).await?;
            pipeline::screen_report(&reconciled.table, &reconciled.warnings, lookback)
        }
        Market::Crypto => {
            let klines = &config.klines;
            let table =
                pipeline::crypto_table(klines, &klines.symbols, klines.interval, klines.limit)
                    .await?;
            pipeline::screen_report(&table, &[], lookback)
        }
    };
    report::print_screen(&report, top, json)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let storage = AsyncStorageManager::new_relative("storage").await?;

    if let Command::Config(ConfigCommand::Init) = cli.command {
        storage.save("config", &AppConfig::default()).await?;
        println!("Default config written to {:?}", storage.base_dir.join("config.json"));
        return Ok(());
    }

    let config: AppConfig = storage.load_or_default("config").await?;

    let result = match cli.command {
        Command::Equity(args) => run_equity(&config, args, cli.json).await,
        Command::Crypto(args) => run_crypto(&config, args, cli.json).await,
        Command::Screen(args) => run_screen(&config, args, cli.json).await,
        Command::Config(ConfigCommand::Show) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Config(ConfigCommand::Init) => Ok(()),
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "pipeline aborted");
    }
    result
}
