use anyhow::Result;
use clap::{Parser, Subcommand};
use mquic::multiaddr::Resolver;
use mquic::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "mquicd")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Transport configuration file (TOML, JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen on a multiaddress and answer liveness probes until Ctrl+C
    Listen {
        #[arg(short, long, default_value = "/ip4/0.0.0.0/udp/4001/quic-v1")]
        addr: Multiaddr,
    },

    /// Dial a multiaddress, send one line and print the reply
    Dial {
        #[arg(short, long)]
        addr: Multiaddr,

        #[arg(short, long, default_value = "GET /")]
        message: String,
    },

    /// Print the concrete addresses a multiaddress resolves to
    Resolve {
        #[arg(short, long)]
        addr: Multiaddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    info!("🚀 mquicd v{} starting...", env!("CARGO_PKG_VERSION"));
    let config = TransportConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Listen { addr } => run_listener(config, addr).await?,
        Commands::Dial { addr, message } => run_dialer(config, addr, message).await?,
        Commands::Resolve { addr } => {
            for resolved in Resolver::default().resolve(&addr).await? {
                println!("{}", resolved);
            }
        }
    }

    Ok(())
}

async fn run_listener(config: TransportConfig, addr: Multiaddr) -> Result<()> {
    let transport = Transport::builder()
        .with_config(config)
        .with_stream_handler(Arc::new(LivenessProbeHandler))
        .build()?;

    let handler = Arc::new(|connection: Connection| {
        info!(
            remote = %connection.remote_addr(),
            peer = ?connection.remote_peer(),
            "✅ Connection upgraded"
        );
    });
    transport.listen(&addr, handler).await?;

    info!("🔐 Local peer id: {}", transport.local_peer_id());
    for listen_addr in transport.listen_addresses() {
        info!("📡 Listening on {}/p2p/{}", listen_addr, transport.local_peer_id());
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    transport.close().await;
    Ok(())
}

async fn run_dialer(config: TransportConfig, addr: Multiaddr, message: String) -> Result<()> {
    let transport = Transport::builder().with_config(config).build()?;

    let connection = transport.dial(&addr, Arc::new(|_: Connection| {})).await?;
    info!(
        remote = %connection.remote_addr(),
        peer = ?connection.remote_peer(),
        "Connected"
    );

    let mut stream = connection
        .take_initial_stream()
        .ok_or_else(|| anyhow::anyhow!("Dialed connection has no initial stream"))?;
    stream.write_all(format!("{}\n", message).as_bytes()).await?;
    stream.finish()?;

    let response = stream.read_to_end(64 * 1024).await?;
    println!("{}", String::from_utf8_lossy(&response).trim_end());

    transport.close().await;
    Ok(())
}
