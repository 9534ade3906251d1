use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::bar::Interval;
use crate::screener::DEFAULT_LOOKBACK_DAYS;

// CONFIGURATION STRUCTS
// Every section falls back to its defaults when omitted from config.json.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EquityConfig {
    pub data_dir: PathBuf,       // folder holding "Ringkasan Saham-YYYYMMDD.{csv,xlsx}" drops
    pub correction_file: String, // adjusted-open feed, relative to data_dir
}

impl Default for EquityConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data saham"),
            correction_file: "data_saham_adjusted_open.csv".to_string(),
        }
    }
}

impl EquityConfig {
    pub fn correction_path(&self) -> PathBuf {
        self.data_dir.join(&self.correction_file)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KlineConfig {
    pub base_url: String,
    pub interval: Interval,
    pub limit: u32, // e.g., 1000 candles
    pub timeout_secs: u64,
    pub symbols: Vec<String>,
}

impl Default for KlineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            interval: Interval::OneDay,
            limit: 1000,
            timeout_secs: 10,
            symbols: ["BTCUSDT", "ETHUSDT", "BNBUSDT", "EURUSDT"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScreenerConfig {
    pub lookback_days: u32,
    pub top: usize, // rows printed in the ranking
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            top: 15,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub equities: EquityConfig,
    pub klines: KlineConfig,
    pub screener: ScreenerConfig,
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path of the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Resolves `relative_path` against the directory of the running executable
    /// and creates it if needed.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    pub async fn new(base_dir: PathBuf) -> anyhow::Result<Self> {
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", filename))
    }

    /// Serializes `data` to `<filename>.json`.
    /// Writes go to a `.tmp` sibling first and are renamed into place, so a crash
    /// mid-write never leaves a truncated file behind.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let final_path = self.path_for(filename);
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", filename));

        let json_bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        // serde_json validates UTF-8 itself, so read raw bytes.
        let content = fs::read(self.path_for(filename)).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Loads `<filename>.json`, falling back to `T::default()` when the file does not exist.
    pub async fn load_or_default<T: DeserializeOwned + Default>(
        &self,
        filename: &str,
    ) -> anyhow::Result<T> {
        let path = self.path_for(filename);
        if !fs::try_exists(&path).await? {
            tracing::warn!(path = %path.display(), "config not found, using defaults");
            return Ok(T::default());
        }
        self.load(filename).await
    }
}
