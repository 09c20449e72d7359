//! `etmemd`: the long-running daemon process. Binds one Unix socket and
//! serves `etmem project add|del|show` requests against it.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use etmem::daemon::Daemon;
use log::info;

/// Idle-page scan daemon.
#[derive(Parser, Debug)]
#[command(name = "etmemd")]
#[command(about = "Idle-page scan and classification daemon")]
#[command(version)]
struct Args {
    /// Unix socket path to listen on for project management commands
    #[arg(short = 's', long = "socket", default_value = "/run/etmem/etmemd.sock")]
    socket: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let args = Args::parse();

    if !etmem_rs::has_permission() {
        anyhow::bail!("etmemd requires CAP_SYS_ADMIN (run as root)");
    }
    etmem_rs::geometry::PageGeometry::init().context("reading host page geometry")?;

    info!("starting etmemd on {}", args.socket);
    let daemon = Arc::new(Daemon::new());
    daemon.run(&args.socket).context("daemon loop exited")?;
    Ok(())
}
