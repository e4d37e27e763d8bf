//! Configuration management for the pool mining client
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON). Command line and environment values
//! take precedence over the file.

use crate::session::SessionConfig;
use crate::types::Credentials;
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

/// Complete configuration for the mining client
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "pool-mining-client",
    version = env!("CARGO_PKG_VERSION"),
    about = "Pool mining client",
    long_about = "Connects to a mining pool over line-delimited JSON, searches the nonce space of each job in parallel and submits the first solution"
)]
pub struct Config {
    /// Print program info and exit
    #[arg(long)]
    #[serde(default, skip_serializing)]
    pub info: bool,

    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(default, skip_serializing)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(default, skip_serializing)]
    pub config_file: Option<PathBuf>,

    /// Pool host name or address
    #[arg(short = 'H', long, env = "POOL_HOST")]
    pub host: Option<String>,

    /// Pool port
    #[arg(short = 'p', long, env = "POOL_PORT")]
    pub port: Option<u16>,

    /// Wallet address used as the login
    #[arg(short = 'u', long, env = "POOL_WALLET")]
    pub wallet: Option<String>,

    /// Pool password
    #[arg(long, env = "POOL_PASSWORD", default_value = "x")]
    #[serde(default = "default_password")]
    pub password: String,

    /// Worker id reported to the pool
    #[arg(long, env = "POOL_WORKER_ID", default_value = "001")]
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Agent string reported to the pool
    #[arg(long, env = "POOL_AGENT", default_value = "node-rx/0.1")]
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Number of parallel search tasks (0 = number of CPUs)
    #[arg(short = 'c', long, env = "POOL_WORKER_COUNT", default_value = "0")]
    #[serde(default)]
    pub worker_count: usize,

    /// Key material for the hash engine
    #[arg(long, env = "POOL_HASH_KEY", default_value = "test key 000")]
    #[serde(default = "default_hash_key")]
    pub hash_key: String,

    /// Delay before reconnecting after a lost connection
    #[arg(long, default_value = "5s")]
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: String,

    /// Timeout for opening the pool connection
    #[arg(long, default_value = "10s")]
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Interval between statistics log lines
    #[arg(long, default_value = "30s")]
    #[serde(default = "default_stats_interval")]
    pub stats_interval: String,

    /// Maximum number of solutions held while logged out
    #[arg(long, default_value = "16")]
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Log level (RUST_LOG overrides)
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[arg(long)]
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to this file, rotated daily
    #[arg(long, value_name = "FILE")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Merge the configuration file into parsed arguments and validate
    pub async fn resolve(mut self) -> Result<Self> {
        if let Some(config_file) = self.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            self = self.merge_with_file(file_config);
        }

        self.validate()?;
        Ok(self)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::config(format!("Cannot read {}: {}", path.display(), e)))?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge CLI config with file config (CLI takes precedence)
    ///
    /// A CLI value still at its default yields to the file's value.
    fn merge_with_file(mut self, file: Self) -> Self {
        self.host = self.host.or(file.host);
        self.port = self.port.or(file.port);
        self.wallet = self.wallet.or(file.wallet);
        self.log_file = self.log_file.or(file.log_file);
        self.log_json |= file.log_json;

        self.password = prefer_cli(self.password, file.password, default_password());
        self.worker_id = prefer_cli(self.worker_id, file.worker_id, default_worker_id());
        self.agent = prefer_cli(self.agent, file.agent, default_agent());
        self.worker_count = prefer_cli(self.worker_count, file.worker_count, 0);
        self.hash_key = prefer_cli(self.hash_key, file.hash_key, default_hash_key());
        self.reconnect_delay =
            prefer_cli(self.reconnect_delay, file.reconnect_delay, default_reconnect_delay());
        self.connect_timeout =
            prefer_cli(self.connect_timeout, file.connect_timeout, default_connect_timeout());
        self.stats_interval =
            prefer_cli(self.stats_interval, file.stats_interval, default_stats_interval());
        self.max_pending = prefer_cli(self.max_pending, file.max_pending, default_max_pending());
        self.log_level = prefer_cli(self.log_level, file.log_level, default_log_level());
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.host.as_deref() {
            Some(host) if !host.trim().is_empty() => {}
            _ => return Err(Error::config("Pool host is required (--host or POOL_HOST)")),
        }

        match self.port {
            Some(0) => return Err(Error::config("Pool port must be greater than 0")),
            Some(_) => {}
            None => return Err(Error::config("Pool port is required (--port or POOL_PORT)")),
        }

        match self.wallet.as_deref() {
            Some(wallet) if !wallet.trim().is_empty() => {}
            _ => return Err(Error::config("Wallet is required (--wallet or POOL_WALLET)")),
        }

        self.reconnect_delay()?;
        if self.connect_timeout()?.is_zero() {
            return Err(Error::config("Connect timeout must be greater than 0"));
        }
        if self.stats_interval()?.is_zero() {
            return Err(Error::config("Stats interval must be greater than 0"));
        }

        if self.max_pending == 0 {
            return Err(Error::config("Held solution limit must be greater than 0"));
        }

        Ok(())
    }

    /// Worker count with 0 resolved to the number of CPUs
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_count
        }
    }

    /// Get login credentials
    pub fn credentials(&self) -> Result<Credentials> {
        let wallet = self
            .wallet
            .clone()
            .ok_or_else(|| Error::config("Wallet is required"))?;
        Ok(Credentials {
            wallet,
            password: self.password.clone(),
            worker_id: self.worker_id.clone(),
            agent: self.agent.clone(),
        })
    }

    /// Get pool session settings
    pub fn session_config(&self) -> Result<SessionConfig> {
        let host = self
            .host
            .clone()
            .ok_or_else(|| Error::config("Pool host is required"))?;
        let port = self.port.ok_or_else(|| Error::config("Pool port is required"))?;

        let mut session = SessionConfig::new(host, port, self.credentials()?);
        session.reconnect_delay = self.reconnect_delay()?;
        session.connect_timeout = self.connect_timeout()?;
        session.max_pending = self.max_pending;
        Ok(session)
    }

    /// Get reconnect delay duration
    pub fn reconnect_delay(&self) -> Result<Duration> {
        parse_duration("reconnect delay", &self.reconnect_delay)
    }

    /// Get connect timeout duration
    pub fn connect_timeout(&self) -> Result<Duration> {
        parse_duration("connect timeout", &self.connect_timeout)
    }

    /// Get statistics interval duration
    pub fn stats_interval(&self) -> Result<Duration> {
        parse_duration("stats interval", &self.stats_interval)
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::config(format!("Invalid {} {:?}: {}", name, value, e)))
}

fn prefer_cli<T: PartialEq>(cli: T, file: T, default: T) -> T {
    if cli == default {
        file
    } else {
        cli
    }
}

// Default value functions for serde
fn default_password() -> String { "x".to_string() }
fn default_worker_id() -> String { "001".to_string() }
fn default_agent() -> String { "node-rx/0.1".to_string() }
fn default_hash_key() -> String { "test key 000".to_string() }
fn default_reconnect_delay() -> String { "5s".to_string() }
fn default_connect_timeout() -> String { "10s".to_string() }
fn default_stats_interval() -> String { "30s".to_string() }
fn default_max_pending() -> usize { 16 }
fn default_log_level() -> LogLevel { LogLevel::Info }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["pool-mining-client"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = parse(&["--host", "pool.example", "--port", "3333", "--wallet", "w"]);

        assert_eq!(config.password, "x");
        assert_eq!(config.worker_id, "001");
        assert_eq!(config.agent, "node-rx/0.1");
        assert_eq!(config.hash_key, "test key 000");
        assert_eq!(config.worker_count, 0);
        assert_eq!(config.reconnect_delay().unwrap(), Duration::from_secs(5));
        assert_eq!(config.stats_interval().unwrap(), Duration::from_secs(30));
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_pool_settings_rejected() {
        // Cleared after parsing so a POOL_HOST in the environment cannot fill it
        let mut config = parse(&["--host", "pool.example", "--port", "3333", "--wallet", "w"]);
        config.host = None;
        assert!(matches!(config.validate(), Err(Error::Config { .. })));

        let mut config = parse(&["--host", "pool.example", "--port", "3333", "--wallet", "w"]);
        config.port = Some(0);
        assert!(config.validate().is_err());

        let mut config = parse(&["--host", "pool.example", "--port", "3333", "--wallet", "w"]);
        config.wallet = Some("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_durations_rejected() {
        let config = parse(&[
            "--host", "pool.example", "--port", "3333", "--wallet", "w",
            "--reconnect-delay", "soon",
        ]);
        assert!(config.validate().is_err());

        let config = parse(&[
            "--host", "pool.example", "--port", "3333", "--wallet", "w",
            "--stats-interval", "0s",
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_worker_count() {
        let config = parse(&["--worker-count", "3"]);
        assert_eq!(config.effective_worker_count(), 3);

        let config = parse(&["--worker-count", "0"]);
        assert_eq!(config.effective_worker_count(), num_cpus::get().max(1));
    }

    #[test]
    fn test_session_config() {
        let config = parse(&[
            "--host", "pool.example", "--port", "3333", "--wallet", "w",
            "--worker-id", "rig-7", "--reconnect-delay", "250ms", "--max-pending", "4",
        ]);
        let session = config.session_config().unwrap();

        assert_eq!(session.host, "pool.example");
        assert_eq!(session.port, 3333);
        assert_eq!(session.credentials.worker_id, "rig-7");
        assert_eq!(session.reconnect_delay, Duration::from_millis(250));
        assert_eq!(session.max_pending, 4);
    }

    #[tokio::test]
    async fn test_config_from_yaml() {
        let yaml_content = r#"
host: "pool.example"
port: 3333
wallet: "file-wallet"
worker_id: "rig-1"
worker_count: 4
reconnect_delay: "2s"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.host.as_deref(), Some("pool.example"));
        assert_eq!(config.port, Some(3333));
        assert_eq!(config.worker_id, "rig-1");
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.password, "x");
        assert_eq!(config.reconnect_delay().unwrap(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cli_overrides_file() {
        let mut temp_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            temp_file,
            r#"{{"host":"file.example","port":4444,"wallet":"file-wallet","worker_id":"rig-1","worker_count":8}}"#
        )
        .unwrap();

        let path = temp_file.path().to_str().unwrap();
        let config = parse(&["--config-file", path, "--worker-count", "2", "--wallet", "cli-wallet"])
            .resolve()
            .await
            .unwrap();

        assert_eq!(config.wallet.as_deref(), Some("cli-wallet"));
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.worker_id, "rig-1");
        assert_eq!(config.port, Some(4444));
    }

    #[tokio::test]
    async fn test_missing_config_file() {
        let result = parse(&["--config-file", "/nonexistent/pool.yaml"]).resolve().await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_config_printing() {
        let config = parse(&["--host", "pool.example", "--port", "3333", "--wallet", "w"]);
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("host: pool.example"));
        assert!(!yaml.contains("print_config"));
    }
}
