//! `etmem`: the project/task management client and a standalone scan
//! diagnostic, mirroring the original `etmem_project` command surface.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::os::unix::net::UnixStream;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use etmem::protocol::{read_response, write_request, DaemonRequest, DaemonResponse};
use etmem_rs::classification::classify_by_threshold;
use etmem_rs::scan::Scanner;
use etmem_rs::types::WeightConfig;
use etmem_rs::util::{format_bytes, total_memory_size, GradeStats};
use log::info;

/// Userspace memory-tiering agent: project management and ad-hoc scans.
#[derive(Parser, Debug)]
#[command(name = "etmem")]
#[command(about = "Idle-page scan and classification agent")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage projects running under `etmemd`
    Project {
        #[command(subcommand)]
        action: ProjectCommands,
    },
    /// Scan a single process directly, without a daemon
    Scan {
        /// Process to scan (default: this process)
        #[arg(short, long)]
        pid: Option<u32>,
        /// Only report huge (PMD/PUD) pages
        #[arg(long)]
        huge_only: bool,
        /// Include pages written since the last pass
        #[arg(long)]
        dirty: bool,
        /// Only show pages classified as cold
        #[arg(long)]
        idle_only: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectCommands {
    /// Load a project config file and start its tasks
    Add {
        /// Path to the project's JSON config file
        #[arg(short = 'f', long = "file")]
        file: String,
        /// Name to register the project under
        #[arg(short = 'n', long = "name")]
        name: String,
        /// Daemon socket path
        #[arg(short = 's', long = "socket")]
        socket: String,
    },
    /// Stop a running project and remove it
    Del {
        /// Name of the project to remove
        #[arg(short = 'n', long = "name")]
        name: String,
        /// Daemon socket path
        #[arg(short = 's', long = "socket")]
        socket: String,
    },
    /// List every project currently running
    Show {
        /// Daemon socket path
        #[arg(short = 's', long = "socket")]
        socket: String,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cli = Cli::parse();
    match cli.command {
        Commands::Project { action } => handle_project_command(action),
        Commands::Scan {
            pid,
            huge_only,
            dirty,
            idle_only,
        } => handle_scan_command(pid, huge_only, dirty, idle_only),
    }
}

fn handle_project_command(action: ProjectCommands) -> anyhow::Result<()> {
    let (socket, request) = match action {
        ProjectCommands::Add { file, name, socket } => {
            (socket, DaemonRequest::ProjectAdd { name, file })
        }
        ProjectCommands::Del { name, socket } => (socket, DaemonRequest::ProjectDel { name }),
        ProjectCommands::Show { socket } => (socket, DaemonRequest::ProjectShow),
    };

    info!("connecting to etmemd at {socket}");
    let mut stream = UnixStream::connect(&socket)
        .with_context(|| format!("connecting to daemon socket {socket}"))?;
    write_request(&mut stream, &request).context("sending request")?;
    let response = read_response(&stream).context("reading response")?;

    match response {
        DaemonResponse::Ok { message } => println!("{message}"),
        DaemonResponse::Projects { projects } => {
            if projects.is_empty() {
                println!("no projects running");
            }
            for p in projects {
                println!(
                    "{:<16} tasks={:<4} loop={:<4} sleep={}s",
                    p.name, p.task_count, p.loop_count, p.sleep_secs
                );
            }
        }
        DaemonResponse::Err { message } => bail!(message),
    }
    Ok(())
}

fn handle_scan_command(
    pid: Option<u32>,
    huge_only: bool,
    dirty: bool,
    idle_only: bool,
) -> anyhow::Result<()> {
    let pid = pid.unwrap_or_else(std::process::id);

    if !etmem_rs::is_available() {
        bail!("ETMEM is not available. Check that the kernel module is loaded.");
    }

    etmem_rs::geometry::PageGeometry::init().context("reading host page geometry")?;

    println!("Scanning process {pid}...");
    let scanner = Scanner::new(WeightConfig::default());
    let accumulated = scanner
        .scan(pid, 2, 1, None)
        .with_context(|| format!("scanning pid {pid}"))?;

    let threshold = if dirty {
        WeightConfig::default().w_write
    } else {
        1
    };
    let grade = classify_by_threshold(accumulated.as_slice(), threshold);

    let mut refs: Vec<_> = if idle_only {
        grade.cold_pages.clone()
    } else {
        accumulated.as_slice().to_vec()
    };
    if huge_only {
        refs.retain(|r| r.page_type.page_size() > etmem_rs::types::PageType::Pte.page_size());
    }

    println!("\n{:-^60}", "");
    println!(
        "{:>16}  {:<15}  {:<10}",
        "Address", "Page type", "Weight"
    );
    println!("{:-^60}", "");
    for r in &refs {
        println!("{:>16x}  {:<15?}  {:<10}", r.addr, r.page_type, r.count);
    }
    println!("{:-^60}", "");

    let stats = GradeStats::from_grade(&grade);
    println!(
        "Hot:  {:<8} ({})",
        stats.hot_pages,
        format_bytes(total_memory_size(&grade.hot_pages))
    );
    println!(
        "Cold: {:<8} ({})",
        stats.cold_pages,
        format_bytes(total_memory_size(&grade.cold_pages))
    );
    println!("Cold ratio: {:.1}%", stats.cold_ratio() * 100.0);

    Ok(())
}
