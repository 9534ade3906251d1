//! Command-line surface. Flags override the matching `config.json` values.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::bar::Interval;

#[derive(Debug, Parser)]
#[command(
    name = "frequency-screener",
    version,
    about = "Frequency Analyzer charts and Z-score anomaly screening for equities and crypto"
)]
pub struct Cli {
    /// Print results as JSON instead of tables.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Frequency Analyzer series for one equity from the local daily summaries.
    Equity(EquityArgs),
    /// Frequency Analyzer series for one crypto pair from the remote kline feed.
    Crypto(CryptoArgs),
    /// Rank a whole universe by the Z-score of its latest FA.
    Screen(ScreenArgs),
    /// Manage the configuration file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Market {
    Equities,
    Crypto,
}

/// Inclusive calendar-date bounds applied to the displayed series.
#[derive(Debug, Clone, Args)]
pub struct DateRange {
    #[arg(long)]
    pub from: Option<NaiveDate>,
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Args)]
pub struct EquityArgs {
    /// Stock code; defaults to the first code in alphabetical order.
    #[arg(long, short)]
    pub instrument: Option<String>,
    #[command(flatten)]
    pub range: DateRange,
}

#[derive(Debug, Args)]
pub struct CryptoArgs {
    /// Trading pair; defaults to the first configured symbol.
    #[arg(long, short)]
    pub symbol: Option<String>,
    #[arg(long)]
    pub interval: Option<Interval>,
    #[arg(long)]
    pub limit: Option<u32>,
    #[command(flatten)]
    pub range: DateRange,
}

#[derive(Debug, Args)]
pub struct ScreenArgs {
    #[arg(value_enum)]
    pub market: Market,
    /// Trailing window in days.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub lookback: Option<u32>,
    /// Rows to print.
    #[arg(long)]
    pub top: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write the default configuration next to the executable.
    Init,
    /// Print the effective configuration.
    Show,
}
