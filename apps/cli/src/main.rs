use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use devlink_core::{DeviceInventory, Host, InterfaceClass};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Inspect Windows storage devices and manage reparse points
#[derive(Parser)]
#[command(name = "devlink", version)]
#[command(about = "Storage device and reparse point tool", long_about = None)]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List present device interfaces of one class
    Devices {
        /// disk, volume, cdrom, partition or an interface class GUID
        #[arg(long, default_value = "disk")]
        class: InterfaceClass,
        /// Remote machine name; the local machine when omitted
        #[arg(long, default_value = "")]
        host: String,
        /// Also resolve the physical drive behind each interface (local only)
        #[arg(long, conflicts_with = "host")]
        resolve: bool,
    },
    /// Resolve the physical drive behind a drive letter
    Drive {
        letter: char,
    },
    /// Resolve every present drive letter
    Drives,
    /// Enumerate local disks and resolve each one
    Disks,
    /// Inspect or remove reparse points
    Reparse {
        #[command(subcommand)]
        command: ReparseCommand,
    },
    /// Create a junction at LINK pointing to TARGET
    Junction {
        link: PathBuf,
        target: PathBuf,
        /// Reuse LINK when it already exists
        #[arg(long)]
        overwrite: bool,
    },
    /// Remove a junction and its directory
    Unjunction {
        path: PathBuf,
    },
    /// Turn NTFS compression on for a file or directory
    Compress {
        path: PathBuf,
        /// Turn compression off instead
        #[arg(long)]
        off: bool,
    },
}

#[derive(Subcommand)]
enum ReparseCommand {
    /// Decode the reparse point at PATH
    Show { path: PathBuf },
    /// Remove the reparse point at PATH, keeping the file or directory
    Delete { path: PathBuf },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    if pretty {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", serde_json::to_string(value)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Devices {
            class,
            host,
            resolve,
        } => {
            let host = Host::parse(&host);
            let devices = devlink_host_windows::enumerate_devices(&host, class.guid())
                .with_context(|| format!("enumerating {} interfaces on {host}", class.guid()))?;
            info!(count = devices.len(), "devices enumerated");
            let drives = if resolve {
                devlink_host_windows::resolve_records(&devices)
                    .context("resolving physical drives")?
            } else {
                Vec::new()
            };
            let inventory = DeviceInventory::new(host, class.guid(), devices).with_drives(drives);
            print_json(&inventory, cli.pretty)
        }
        Commands::Drive { letter } => {
            let drive = devlink_host_windows::resolve_drive_letter(letter)
                .with_context(|| format!("resolving drive {letter}:"))?;
            print_json(&drive, cli.pretty)
        }
        Commands::Drives => {
            let drives = devlink_host_windows::resolve_all_drive_letters()
                .context("resolving drive letters")?;
            print_json(&drives, cli.pretty)
        }
        Commands::Disks => {
            let drives = devlink_host_windows::enumerate_physical_disks()
                .context("enumerating physical disks")?;
            print_json(&drives, cli.pretty)
        }
        Commands::Reparse {
            command: ReparseCommand::Show { path },
        } => {
            let data = devlink_host_windows::read_reparse_point(&path)
                .with_context(|| format!("reading reparse point {}", path.display()))?;
            print_json(
                &serde_json::json!({
                    "path": path,
                    "tag": format!("{:#010x}", data.tag()),
                    "target": data.target(),
                    "relative": data.is_relative(),
                    "data": data,
                }),
                cli.pretty,
            )
        }
        Commands::Reparse {
            command: ReparseCommand::Delete { path },
        } => {
            devlink_host_windows::delete_reparse_point(&path)
                .with_context(|| format!("deleting reparse point {}", path.display()))?;
            print_json(&serde_json::json!({ "success": true }), cli.pretty)
        }
        Commands::Junction {
            link,
            target,
            overwrite,
        } => {
            devlink_host_windows::create_junction(&link, &target, overwrite).with_context(|| {
                format!("creating junction {} -> {}", link.display(), target.display())
            })?;
            print_json(
                &serde_json::json!({ "success": true, "link": link, "target": target }),
                cli.pretty,
            )
        }
        Commands::Unjunction { path } => {
            devlink_host_windows::delete_junction(&path)
                .with_context(|| format!("removing junction {}", path.display()))?;
            print_json(&serde_json::json!({ "success": true }), cli.pretty)
        }
        Commands::Compress { path, off } => {
            devlink_host_windows::set_compression(&path, !off)
                .with_context(|| format!("setting compression on {}", path.display()))?;
            print_json(
                &serde_json::json!({ "success": true, "compressed": !off }),
                cli.pretty,
            )
        }
    }
}
