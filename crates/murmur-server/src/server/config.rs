use anyhow::bail;
use core::time::Duration;
use std::net::SocketAddr;

use clap::Parser;

/// Runtime configuration for the `murmur-server` binary.
///
/// These settings control admission capacity, heartbeat cadence, generation
/// pacing, and shutdown behavior of the streaming service. All values are
/// parsed from CLI arguments or environment variables (a `.env` file is loaded
/// first), with defaults suitable for a single small model host.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "murmur-server",
    version,
    about = "A WebSocket service for session-admitted streaming text generation"
)]
pub struct CliArgs {
    /// Maximum number of concurrently registered sessions.
    ///
    /// Registration beyond this limit is refused until a session is released.
    ///
    /// Environment variable: `MAX_CONNS`
    #[arg(long, env = "MAX_CONNS", default_value_t = 5)]
    pub max_conns: usize,

    /// Text marking the end of generation.
    ///
    /// Encoded once at startup with the model's tokenizer; generated text is
    /// cut at its first occurrence.
    ///
    /// Environment variable: `FINAL_STRING`
    #[arg(long, env = "FINAL_STRING", default_value_t = String::from("<|endoftext|>"))]
    pub final_string: String,

    /// Seconds between keep-alive `"."` messages on a registration channel.
    ///
    /// Environment variable: `HEARTBEAT_INTERVAL_SECS`
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 10)]
    pub heartbeat_interval_secs: u64,

    /// Delay per requested chunk token applied after each sent fragment.
    ///
    /// A fragment of `chunks` tokens is followed by a pause of
    /// `chunks * PACE_PER_TOKEN_MS` milliseconds. `0` disables pacing.
    ///
    /// Environment variable: `PACE_PER_TOKEN_MS`
    #[arg(long, env = "PACE_PER_TOKEN_MS", default_value_t = 250)]
    pub pace_per_token_ms: u64,

    /// Capacity of the fragment buffer between a generation worker and its
    /// WebSocket session.
    ///
    /// Lower values keep the model closer to the client's pace; higher values
    /// let the worker run ahead.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 2)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for in-flight prediction streams during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8000"))]
    pub server_addr: String,

    /// Identify clients by the first `X-Forwarded-For` entry instead of the
    /// peer address. Only enable behind a trusted reverse proxy.
    ///
    /// Environment variable: `TRUST_FORWARDED_FOR`
    #[arg(long, env = "TRUST_FORWARDED_FOR", default_value_t = false)]
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_conns: usize,
    pub final_string: String,
    pub heartbeat_interval: Duration,
    pub pace_per_token: Duration,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub server_addr: SocketAddr,
    pub trust_forwarded_for: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_conns == 0 {
            bail!("MAX_CONNS must be greater than 0");
        }

        if args.final_string.is_empty() {
            bail!("FINAL_STRING must not be empty");
        }

        if args.heartbeat_interval_secs == 0 {
            bail!("HEARTBEAT_INTERVAL_SECS must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        let server_addr = match args.server_addr.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => bail!("SERVER_ADDR ({}) is not a socket address: {e}", args.server_addr),
        };

        Ok(Self {
            max_conns: args.max_conns,
            final_string: args.final_string,
            heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
            pace_per_token: Duration::from_millis(args.pace_per_token_ms),
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            server_addr,
            trust_forwarded_for: args.trust_forwarded_for,
        })
    }
}
