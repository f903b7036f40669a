use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bully leader election node", long_about = None)]
pub struct Cli {
    /// Endpoint to listen on (`host:port`); the port becomes this node's id.
    #[arg(long)]
    pub listen: Option<String>,

    /// Peer endpoint, repeatable: `--peer 127.0.0.1:6662 --peer 127.0.0.1:6663`.
    /// Entries naming this node are ignored.
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// JSON configuration file; explicit flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Milliseconds between leader health checks.
    #[arg(long)]
    pub ping_interval_ms: Option<u64>,

    /// Milliseconds to wait for a reply on an outbound exchange.
    #[arg(long)]
    pub response_timeout_ms: Option<u64>,

    /// Command to keep running while this node leads. Started on becoming
    /// leader, killed on losing leadership.
    #[arg(long)]
    pub on_leader: Option<String>,

    /// Enable debug-level protocol logging.
    #[arg(long, short)]
    pub verbose: bool,
}
