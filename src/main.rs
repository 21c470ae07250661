use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use sysopt::monitor::SnapshotSource;
use sysopt::runner::{self, SystemRunner};
use sysopt::{actions, bg, Config, OptimizationSelection, Optimizer, RunEvent, SysinfoMonitor};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sysopt", version, about = "Windows maintenance runner with settings backup/restore")]
struct Cli {
    /// JSON config file (defaults to %APPDATA%\SystemOptimizer\config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override where the settings backup is kept
    #[arg(long, global = true)]
    backup_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show OS, CPU, RAM, GPU and disk information
    Info,
    /// Take one CPU/RAM/disk usage reading
    Usage,
    /// List the available optimizations
    List,
    /// Apply optimizations (backs up settings first)
    Optimize {
        /// Optimization name or id; repeat for several
        #[arg(short, long = "action")]
        actions: Vec<String>,

        /// Apply every optimization
        #[arg(long, conflicts_with = "actions")]
        all: bool,

        /// Print the result as JSON instead of a report
        #[arg(long)]
        json: bool,
    },
    /// Back up the guarded settings now
    Backup,
    /// Restore settings from the last backup
    Restore,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;
    if let Some(path) = cli.backup_file {
        config.backup_file = path;
    }

    match cli.command {
        Commands::Info => {
            let volume = config.system_volume.clone();
            let info = bg(move || SysinfoMonitor::new(volume, Arc::new(SystemRunner)).static_inventory())
                .await
                .context("reading system information")?;
            println!("OS:   {}", info.os);
            println!("CPU:  {}", info.cpu);
            println!("RAM:  {}", info.ram);
            println!("GPU:  {}", info.gpu);
            for d in &info.disks {
                println!(
                    "Disk: {} ({}) {} / {} used ({:.1}%)",
                    d.device, d.mount_point, d.used, d.total, d.percent
                );
            }
        }
        Commands::Usage => {
            let volume = config.system_volume.clone();
            let snap = bg(move || SysinfoMonitor::new(volume, Arc::new(SystemRunner)).live_usage())
                .await
                .context("reading usage")?;
            println!("CPU Usage:  {:.1}%", snap.cpu_usage_percent);
            println!("RAM Usage:  {:.1}%", snap.ram_usage_percent);
            println!("Disk Usage: {:.1}%", snap.disk_usage_percent);
        }
        Commands::List => {
            for item in actions::catalog() {
                let undo = if item.restorable { " [restorable]" } else { "" };
                println!("{:<16} {}{}", item.id, item.name, undo);
                println!("{:<16} {}", "", item.description);
            }
        }
        Commands::Optimize { actions, all, json } => {
            let selection = if all {
                OptimizationSelection::all()
            } else {
                OptimizationSelection::from_names(&actions)?
            };
            if !runner::is_elevated() {
                log::warn!("Not running as administrator; some optimizations will fail");
            }

            let optimizer = Arc::new(Optimizer::from_config(&config));
            let mut handle = optimizer.spawn(selection);
            let mut result = None;
            while let Some(event) = handle.next_event().await {
                match event {
                    RunEvent::Progress(msg) => eprintln!("{}", msg),
                    RunEvent::Complete(r) => {
                        result = Some(r);
                        break;
                    }
                }
            }
            let result = result.context("optimization worker stopped before reporting")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", result.render());
            }
            if result.failed() > 0 {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Backup => {
            let optimizer = Optimizer::from_config(&config);
            let saved = bg(move || optimizer.guard().try_backup()).await?;
            let record = saved?;
            println!("Backed up {} setting(s).", record.len());
        }
        Commands::Restore => {
            let optimizer = Optimizer::from_config(&config);
            if bg(move || optimizer.guard().restore()).await? {
                println!("Settings have been successfully restored.");
            } else {
                eprintln!("Failed to restore settings. A backup might not exist or is corrupted.");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
