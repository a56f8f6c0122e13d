//! Palaver server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default port
//! palaver-server --bind 0.0.0.0:12345
//!
//! # Grant administrative rights to specific users
//! palaver-server --admin admin --admin operator
//! ```

use clap::Parser;
use palaver_server::{Server, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Palaver chat server
#[derive(Parser, Debug)]
#[command(name = "palaver-server")]
#[command(about = "Line-delimited chat server with rooms and whispers")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:12345")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Messages of history each room retains
    #[arg(long, default_value = "10")]
    history_limit: usize,

    /// Outbound queue depth per session
    #[arg(long, default_value = "256")]
    outbound_queue: usize,

    /// Username with administrative rights (repeatable)
    #[arg(long = "admin", default_value = "admin")]
    admin_users: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Palaver server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerConfig {
        bind_address: args.bind,
        max_connections: args.max_connections,
        history_limit: args.history_limit,
        outbound_queue: args.outbound_queue,
        admin_users: args.admin_users,
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
