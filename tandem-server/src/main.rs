//! Tandem collaboration server.
//!
//! ```text
//! tandem-server --bind 0.0.0.0:9090 --history-limit 1000 --idle-timeout-secs 300
//! ```
//!
//! Every flag can also come from a `TANDEM_*` environment variable. Log
//! output is controlled with `RUST_LOG`.

use std::time::Duration;

use clap::Parser;
use tandem_collab::hub::HubConfig;
use tandem_collab::server::{CollabServer, ServerConfig};
use tandem_ot::EngineConfig;

#[derive(Parser, Debug)]
#[command(name = "tandem-server", version, about = "Real-time collaborative editing server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "TANDEM_BIND", default_value = "127.0.0.1:9090")]
    bind: String,

    /// Revisions kept per document for transforming stale edits.
    #[arg(long, env = "TANDEM_HISTORY_LIMIT", default_value_t = 1000)]
    history_limit: usize,

    /// Frames buffered per client before new ones are dropped.
    #[arg(long, env = "TANDEM_OUTBOUND_CAPACITY", default_value_t = 256)]
    outbound_capacity: usize,

    /// Seconds of silence before a session is evicted.
    #[arg(long, env = "TANDEM_IDLE_TIMEOUT_SECS", default_value_t = 300)]
    idle_timeout_secs: u64,

    /// Seconds between idle sweeps.
    #[arg(long, env = "TANDEM_SWEEP_INTERVAL_SECS", default_value_t = 30)]
    sweep_interval_secs: u64,

    /// Seconds between WebSocket pings.
    #[arg(long, env = "TANDEM_HEARTBEAT_SECS", default_value_t = 45)]
    heartbeat_secs: u64,

    /// Largest accepted inbound frame in bytes.
    #[arg(long, env = "TANDEM_MAX_FRAME_SIZE", default_value_t = 65536)]
    max_frame_size: usize,

    /// Chat messages kept per room.
    #[arg(long, env = "TANDEM_CHAT_HISTORY", default_value_t = 500)]
    chat_history: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            hub: HubConfig {
                outbound_capacity: self.outbound_capacity,
                idle_timeout: Duration::from_secs(self.idle_timeout_secs),
                sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
                chat_history_limit: self.chat_history,
                ..HubConfig::default()
            },
            engine: EngineConfig {
                history_limit: self.history_limit,
            },
            heartbeat_interval_secs: self.heartbeat_secs,
            max_frame_size: self.max_frame_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    log::info!(
        "Starting tandem-server on {} (history {}, idle timeout {:?})",
        config.bind_addr,
        config.engine.history_limit,
        config.hub.idle_timeout
    );

    CollabServer::new(config).run().await
}
