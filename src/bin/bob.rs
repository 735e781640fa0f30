use clap::Parser;
use tracing::Level;

use chatstack::chat::client::client_main;

/// Chat client for the node Bob.
#[derive(Parser)]
struct Args {
    /// Force the graphical UI.
    #[clap(long, default_value_t = false)]
    gui: bool,

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

    client_main("Bob", args.gui).await
}
