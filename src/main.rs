use std::process::{Child, Command};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use bully::{cli::Cli, config::Settings, node::BullyNode};

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::resolve(&cli)?;
    let mut node = BullyNode::new(settings)?;

    match cli.on_leader.clone() {
        Some(command) => install_child_callbacks(&mut node, command),
        None => {
            node.on_becoming_leader(|| info!("this node now leads the cluster"));
            node.on_losing_leadership(|| info!("this node no longer leads the cluster"));
        }
    }

    Arc::new(node).run().await
}

/// Runs `command` through the shell while this node leads: started on
/// becoming leader, killed on losing leadership.
fn install_child_callbacks(node: &mut BullyNode, command: String) {
    let child: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&child);
    let start_command = command.clone();
    node.on_becoming_leader(move || {
        info!(command = %start_command, "became leader; starting command");
        match Command::new("sh").arg("-c").arg(&start_command).spawn() {
            Ok(process) => *slot.lock().unwrap() = Some(process),
            Err(err) => warn!(error = ?err, "failed to start leader command"),
        }
    });

    let slot = child;
    node.on_losing_leadership(move || {
        info!("lost leadership; stopping command");
        if let Some(mut process) = slot.lock().unwrap().take() {
            if let Err(err) = process.kill() {
                warn!(error = ?err, "failed to kill leader command");
            }
            let _ = process.wait();
        }
    });
}
