use std::sync::Arc;

use clap::Parser;
use tokio::select;
use tracing::{info, Level};

use chatstack::chat::server::ChatServer;
use chatstack::config::{NoiseConfig, StackConfig};
use chatstack::topology::Topology;
use chatstack::transport::host_transport;

/// The chat server node.
#[derive(Parser)]
struct Args {
    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).try_init().ok();

    let topology = Topology::standard();
    let config = Arc::new(StackConfig::from_env());
    let noise = NoiseConfig::from_env();

    let transport = host_transport("Server", topology, config, noise).await?;
    let server = ChatServer::new(transport);
    info!("chat server up");

    select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            server.shutdown().await;
            Ok(())
        }
    }
}
