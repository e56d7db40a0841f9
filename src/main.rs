//! Mirror a directory through a flat FUSE filesystem.
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, error};

mod app_config;
mod daemon;
mod fuse_check;
mod trc;

use crate::app_config::{Config, ConfigError};
use crate::trc::Trc;

#[derive(Parser)]
#[command(
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_GIT_SHA"), ")"),
    about = "Mirror a directory through a flat FUSE filesystem."
)]
struct Args {
    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a clone-fs config TOML."
    )]
    config_path: Option<PathBuf>,

    #[arg(
        short,
        long,
        env = "CLONE_FS_BACKING_DIR",
        help = "Directory to mirror. Overrides the config file."
    )]
    backing_dir: Option<PathBuf>,

    #[arg(
        short,
        long,
        env = "CLONE_FS_MOUNT_POINT",
        help = "Where to mount the filesystem. Overrides the config file."
    )]
    mount_point: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Mount the filesystem and serve it until interrupted.
    Run {
        /// Run the daemon in the background.
        #[arg(short, long, help = "Run the daemon in the background.")]
        daemonize: bool,
    },
}

fn init_tracing(trc: Trc) {
    if let Err(e) = trc.init() {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    }
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Errors use eprintln since tracing isn't initialized yet.
    let config = Config::load_or_create(args.config_path.as_deref())
        .map(|config| config.with_overrides(args.backing_dir, args.mount_point))
        .unwrap_or_else(|e| {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        });
    match config.validate() {
        Ok(()) => {}
        Err(ConfigError::ValidationErrors(error_messages)) => {
            eprintln!("Configuration is invalid.");
            for msg in &error_messages {
                eprintln!(" - {msg}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Configuration is invalid: {e}");
            std::process::exit(1);
        }
    }

    match args.command.unwrap_or(Command::Run { daemonize: false }) {
        Command::Run { daemonize: false } => {
            init_tracing(Trc::default());
            if let Err(e) = fuse_check::ensure_fuse() {
                error!("{e}");
                std::process::exit(1);
            }

            if let Err(e) = daemon::spawn(config) {
                error!("Daemon failed: {e}");
                std::process::exit(1);
            }
        }
        Command::Run { daemonize: true } => {
            if let Err(e) = fuse_check::ensure_fuse() {
                eprintln!("{e}");
                std::process::exit(1);
            }

            let Some(pid_file_parent) = config.daemon.pid_file.parent() else {
                eprintln!("PID file has no parent directory.");
                std::process::exit(1);
            };
            if let Err(e) = std::fs::create_dir_all(pid_file_parent) {
                eprintln!("Failed to create PID file directory: {e}");
                std::process::exit(1);
            }

            let log_file = config.daemon.log.target.open_log_file().unwrap_or_else(|e| {
                eprintln!("Failed to open log file: {e}");
                std::process::exit(1);
            });

            let mut daemonize = daemonize::Daemonize::new().pid_file(&config.daemon.pid_file);
            if let Some(file) = log_file {
                match file.try_clone() {
                    Ok(clone) => {
                        daemonize = daemonize.stdout(file).stderr(clone);
                    }
                    Err(e) => {
                        eprintln!("Failed to clone log file handle: {e}");
                        std::process::exit(1);
                    }
                }
            }

            if let Err(e) = daemonize.start() {
                eprintln!("Failed to spawn the daemon: {e}");
                std::process::exit(1);
            }

            // Tracing starts after the fork so the subscriber's writer lands in the daemon.
            init_tracing(Trc::daemon(config.daemon.log.should_use_color()));
            debug!(config = ?config, "Initialized daemon with configuration.");
            if let Err(e) = daemon::spawn(config) {
                error!("Daemon failed: {e}");
                std::process::exit(1);
            }
        }
    }
}
