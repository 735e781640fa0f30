use clap::Parser;
use tokio::select;
use tracing::{info, Level};

use chatstack::config::NoiseConfig;
use chatstack::network::RouterNetwork;
use chatstack::topology::Topology;

/// The router node: forwards packets between the hosts.
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

    let router = RouterNetwork::start_for(Topology::standard(), NoiseConfig::from_env()).await?;
    info!("router up");

    select! {
        result = router.run() => result,
        _ = tokio::signal::ctrl_c() => {
            let stats = router.stats();
            info!(
                "router shutting down ({} forwarded, {} dropped on TTL, {} unroutable)",
                stats.forwarded, stats.dropped_ttl, stats.dropped_unknown
            );
            Ok(())
        }
    }
}
