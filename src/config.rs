//! Configuration for the wallet-transport CLI
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::channel::{ChannelConfig, CloseCodePolicy};
use crate::pipeline::{PipelineConfig, RetryPolicy};

/// wallet-transport - REST and push-channel client for the wallet service
#[derive(Parser, Debug, Clone)]
#[command(name = "wallet-transport")]
#[command(about = "REST and push-channel client for the wallet service")]
pub struct Args {
    /// Base URL of the wallet REST API
    #[arg(long, env = "WALLET_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Push channel WebSocket URL
    #[arg(long, env = "WALLET_PUSH_URL", default_value = "ws://localhost:8080/ws")]
    pub push_url: String,

    /// Client name announced in the push auth frame
    #[arg(long, env = "CLIENT_NAME", default_value = "wallet-transport")]
    pub client_name: String,

    /// File holding persisted credentials
    #[arg(long, env = "CREDENTIALS_FILE", default_value = ".wallet-credentials.json")]
    pub credentials_file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Request pipeline configuration
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Push channel configuration
    #[command(flatten)]
    pub channel: ChannelArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Request pipeline arguments
#[derive(ClapArgs, Debug, Clone)]
pub struct PipelineArgs {
    /// Per-request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Total attempts per request, including the first
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "3")]
    pub retry_max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "1000")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for retry delays in milliseconds
    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "10000")]
    pub retry_max_delay_ms: u64,

    /// Multiplier applied to the delay after each retry
    #[arg(long, env = "RETRY_BACKOFF_FACTOR", default_value = "2.0")]
    pub retry_backoff_factor: f64,

    /// Maximum in-process cache entries
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value = "500")]
    pub cache_max_entries: usize,

    /// Default cache TTL in seconds
    #[arg(long, env = "CACHE_DEFAULT_TTL_SECS", default_value = "300")]
    pub cache_default_ttl_secs: u64,
}

/// Push channel arguments
#[derive(ClapArgs, Debug, Clone)]
pub struct ChannelArgs {
    /// Heartbeat interval in milliseconds
    #[arg(long, env = "HEARTBEAT_INTERVAL_MS", default_value = "30000")]
    pub heartbeat_interval_ms: u64,

    /// Delay before the first reconnect in milliseconds
    #[arg(long, env = "RECONNECT_BASE_DELAY_MS", default_value = "1000")]
    pub reconnect_base_delay_ms: u64,

    /// Reconnect attempts before giving up
    #[arg(long, env = "RECONNECT_MAX_ATTEMPTS", default_value = "10")]
    pub reconnect_max_attempts: u32,

    /// Messages held while the channel is not open
    #[arg(long, env = "OUTBOUND_QUEUE_CAPACITY", default_value = "100")]
    pub queue_capacity: usize,

    /// Close codes that end the channel instead of reconnecting (comma-separated)
    #[arg(long, env = "FATAL_CLOSE_CODES", default_value = "1002,1006,1007,1008")]
    pub fatal_close_codes: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Perform one GET request and print the JSON payload
    Get {
        /// Endpoint path, e.g. /wallet/balances
        endpoint: String,

        /// Query parameter as key=value (repeatable)
        #[arg(long = "query", value_name = "KEY=VALUE")]
        query: Vec<String>,

        /// Serve from and populate the response cache
        #[arg(long)]
        cache: bool,
    },
    /// Connect the push channel and log events until Ctrl-C
    Listen,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err("WALLET_API_URL must be an http(s) URL".to_string());
        }
        if !self.push_url.starts_with("ws://") && !self.push_url.starts_with("wss://") {
            return Err("WALLET_PUSH_URL must be a ws(s) URL".to_string());
        }
        if self.pipeline.retry_max_attempts == 0 {
            return Err("RETRY_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if self.pipeline.retry_backoff_factor < 1.0 {
            return Err("RETRY_BACKOFF_FACTOR must be >= 1.0".to_string());
        }
        if self.pipeline.retry_base_delay_ms > self.pipeline.retry_max_delay_ms {
            return Err("RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS".to_string());
        }
        if self.pipeline.cache_max_entries == 0 {
            return Err("CACHE_MAX_ENTRIES must be at least 1".to_string());
        }
        if self.channel.heartbeat_interval_ms == 0 {
            return Err("HEARTBEAT_INTERVAL_MS must be positive".to_string());
        }
        CloseCodePolicy::parse(&self.channel.fatal_close_codes)
            .map_err(|e| format!("FATAL_CLOSE_CODES: {}", e))?;
        if let Command::Get { query, .. } = &self.command {
            if let Some(bad) = query.iter().find(|q| !q.contains('=')) {
                return Err(format!("Query parameter '{}' must be KEY=VALUE", bad));
            }
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            base_url: self.api_url.clone(),
            default_timeout: Duration::from_millis(self.pipeline.request_timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.pipeline.retry_max_attempts,
                base_delay: Duration::from_millis(self.pipeline.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.pipeline.retry_max_delay_ms),
                backoff_factor: self.pipeline.retry_backoff_factor,
                ..RetryPolicy::default()
            },
            ..PipelineConfig::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.pipeline.cache_max_entries,
            default_ttl: Duration::from_secs(self.pipeline.cache_default_ttl_secs),
            ..CacheConfig::default()
        }
    }

    /// Channel config; call after [`validate`](Self::validate)
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            url: self.push_url.clone(),
            client_name: self.client_name.clone(),
            heartbeat_interval: Duration::from_millis(self.channel.heartbeat_interval_ms),
            reconnect_base_delay: Duration::from_millis(self.channel.reconnect_base_delay_ms),
            max_reconnect_attempts: self.channel.reconnect_max_attempts,
            queue_capacity: self.channel.queue_capacity,
            close_policy: CloseCodePolicy::parse(&self.channel.fatal_close_codes)
                .unwrap_or_default(),
            ..ChannelConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["wallet-transport"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_build_configs() {
        let args = parse(&["listen"]);
        assert!(args.validate().is_ok());

        let pipeline = args.pipeline_config();
        assert_eq!(pipeline.retry.max_attempts, 3);
        assert_eq!(pipeline.retry.base_delay, Duration::from_millis(1000));

        let channel = args.channel_config();
        assert!(channel.close_policy.is_fatal(1008));
        assert_eq!(channel.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(args.cache_config().max_entries, 500);
    }

    #[test]
    fn test_get_subcommand() {
        let args = parse(&["get", "/wallet/transactions", "--query", "limit=5", "--cache"]);
        match args.command {
            Command::Get { endpoint, query, cache } => {
                assert_eq!(endpoint, "/wallet/transactions");
                assert_eq!(query, vec!["limit=5".to_string()]);
                assert!(cache);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let args = parse(&["--fatal-close-codes", "1008,oops", "listen"]);
        assert!(args.validate().unwrap_err().contains("FATAL_CLOSE_CODES"));

        let args = parse(&["--push-url", "http://wrong", "listen"]);
        assert!(args.validate().is_err());

        let args = parse(&["get", "/x", "--query", "novalue"]);
        assert!(args.validate().is_err());
    }
}
