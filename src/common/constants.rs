/// Global constants and environment configuration for sandscan.
///
/// Environment variables are read once at startup into [`Env`]; everything the engine needs is then
/// carried by an immutable `DetectorConfig`.
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::str::FromStr;

pub static PROJECT_NAME: &str = "sandscan";

/// Backoff applied after a subscription transport error.
pub static DEFAULT_SUBSCRIPTION_BACKOFF_SECS: u64 = 2;
/// Half-width of the back-run amount tolerance band, in percent.
pub static DEFAULT_AMOUNT_TOLERANCE_PCT: u64 = 3;
pub static DEFAULT_CHAIN_ID: u64 = 1;
pub static DEFAULT_LOG_DIR: &str = "./sandwich_logs";

/// Looks `key` up and parses it. Unset and blank values are `None`.
fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_default();
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| anyhow!("{key}={raw:?}: {e}"))
}

/// Output format of the finding log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Text,
    Json,
}

impl FromStr for RecordFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(RecordFormat::Text),
            "json" => Ok(RecordFormat::Json),
            other => Err(format!("unknown record format {other:?}")),
        }
    }
}

/// Named correlation policy preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyPreset {
    Permissive,
    Strict,
}

impl FromStr for PolicyPreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "permissive" => Ok(PolicyPreset::Permissive),
            "strict" => Ok(PolicyPreset::Strict),
            other => Err(format!("unknown correlation policy {other:?}")),
        }
    }
}

/// Holds all environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Env {
    /// WebSocket endpoint of the node.
    pub wss_url: String,
    /// Chain id used to validate transaction signatures.
    pub chain_id: u64,
    /// Directory the file log sink writes into.
    pub log_dir: PathBuf,
    pub log_format: RecordFormat,
    pub log_level: log::LevelFilter,
    pub policy: PolicyPreset,
    pub amount_tolerance_pct: u64,
    /// Drop transactions whose token pair could not be resolved before correlating. `None` keeps
    /// the policy preset's own setting.
    pub require_token_pair: Option<bool>,
    /// Skip transactions with empty calldata without fetching their receipts.
    pub skip_plain_transfers: bool,
    pub subscription_backoff_secs: u64,
}

impl Env {
    /// Loads environment variables and constructs an `Env` instance.
    ///
    /// # Returns
    /// * `Result<Env>` - Error naming the offending variable if a value fails to parse.
    pub fn new() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds an `Env` from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Env {
            wss_url: lookup("WSS_URL").unwrap_or_default(),
            chain_id: parse_var(&lookup, "CHAIN_ID")?.unwrap_or(DEFAULT_CHAIN_ID),
            log_dir: parse_var(&lookup, "SANDWICH_LOG_DIR")?
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            log_format: parse_var(&lookup, "SANDWICH_LOG_FORMAT")?.unwrap_or(RecordFormat::Text),
            log_level: parse_var(&lookup, "LOG_LEVEL")?.unwrap_or(log::LevelFilter::Info),
            policy: parse_var(&lookup, "CORRELATION_POLICY")?.unwrap_or(PolicyPreset::Permissive),
            amount_tolerance_pct: parse_var(&lookup, "AMOUNT_TOLERANCE_PCT")?
                .unwrap_or(DEFAULT_AMOUNT_TOLERANCE_PCT),
            require_token_pair: parse_var(&lookup, "REQUIRE_TOKEN_PAIR")?,
            skip_plain_transfers: parse_var(&lookup, "SKIP_PLAIN_TRANSFERS")?.unwrap_or(true),
            subscription_backoff_secs: parse_var(&lookup, "SUBSCRIPTION_BACKOFF_SECS")?
                .unwrap_or(DEFAULT_SUBSCRIPTION_BACKOFF_SECS),
        })
    }

    /// Returns the websocket endpoint, failing if it was never configured.
    pub fn require_wss_url(&self) -> Result<&str> {
        if self.wss_url.is_empty() {
            return Err(anyhow!("WSS_URL is not set"));
        }
        Ok(&self.wss_url)
    }
}
