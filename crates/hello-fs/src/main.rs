//! Mount a tiny static tree of "Hello, world!" files.
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::Parser;
use fuser::MountOption;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod hellofs;
mod tree;

use hellofs::HelloFs;

#[derive(Parser)]
#[command(version, about = "Mount a static, read-only sample filesystem.")]
struct Args {
    /// The path to the mount point.
    #[arg(default_value = "/mnt/test")]
    mount_point: PathBuf,
}

fn main() {
    let args = Args::parse();
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_span_events(fmt::format::FmtSpan::EXIT)
        .init();

    // Clear out a mount left behind by an earlier run.
    force_unmount(&args.mount_point);

    let options = vec![
        MountOption::RO,
        MountOption::FSName("hellofs".to_owned()),
    ];

    let session = match fuser::spawn_mount2(HelloFs::new(), &args.mount_point, &options) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to mount filesystem: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "Mounted at {:?}. Press Ctrl+C to unmount.",
        args.mount_point
    );

    let (tx, rx) = std::sync::mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(());
    }) {
        error!("Failed to set Ctrl+C handler: {e}");
        session.join();
        return;
    }

    let _ = rx.recv();
    info!("Received Ctrl+C, unmounting...");

    if force_unmount(&args.mount_point) {
        // The kernel already sent DESTROY; dropping the session would try a second unmount.
        #[allow(clippy::mem_forget)]
        std::mem::forget(session);
    } else {
        session.join();
    }

    info!("Unmounted successfully.");
}

/// Lazily unmount `mount_point`. Returns true if the unmount command succeeded.
fn force_unmount(mount_point: &Path) -> bool {
    #[cfg(target_os = "macos")]
    let result = Command::new("umount").arg("-f").arg(mount_point).status();

    #[cfg(target_os = "linux")]
    let result = Command::new("fusermount")
        .arg("-uz")
        .arg(mount_point)
        .status();

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    let result: Result<std::process::ExitStatus, std::io::Error> = Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "unsupported platform",
    ));

    match result {
        Ok(status) if status.success() => {
            info!("Force unmount succeeded");
            true
        }
        Ok(status) => {
            warn!("Force unmount exited with status: {status}");
            false
        }
        Err(e) => {
            warn!("Force unmount failed: {e}");
            false
        }
    }
}
