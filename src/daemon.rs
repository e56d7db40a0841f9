use tokio::select;

use crate::app_config;
use tracing::{debug, error, info};

mod managed_fuse {
    //! Mount lifecycle. fuser only does a regular unmount when the `BackgroundSession` is dropped,
    //! so [`ManagedFuse`] follows up with a forced or lazy unmount that retries while the
    //! filesystem is busy.
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use clone_fs::fs::CloneFs;
    use clone_fs::fs::attr::Owner;
    use clone_fs::fs::fuser::FuserAdapter;
    use fuser::BackgroundSession;
    use nix::errno::Errno;

    use super::{app_config, debug, error};

    pub struct FuseCoreScope {
        _session: BackgroundSession,
    }

    impl FuseCoreScope {
        fn spawn(
            config: &app_config::Config,
            fs: CloneFs,
            handle: tokio::runtime::Handle,
        ) -> Result<Self, std::io::Error> {
            let fuse_adapter = FuserAdapter::new(fs, handle);
            let mut mount_opts = vec![
                fuser::MountOption::FSName("clone-fs".to_owned()),
                fuser::MountOption::RW,
                fuser::MountOption::NoDev,
                fuser::MountOption::Exec,
                fuser::MountOption::DefaultPermissions,
            ];
            if config.allow_other {
                // AutoUnmount needs allow_other (or allow_root) to be accepted by fusermount.
                mount_opts.push(fuser::MountOption::AllowOther);
                mount_opts.push(fuser::MountOption::AutoUnmount);
            }

            Ok(Self {
                _session: fuser::spawn_mount2(fuse_adapter, &config.mount_point, &mount_opts)?,
            })
        }
    }

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(config: &app_config::Config) -> Self {
            Self {
                mount_point: config.mount_point.clone(),
            }
        }

        pub async fn spawn(
            &self,
            config: &app_config::Config,
            handle: tokio::runtime::Handle,
        ) -> Result<FuseCoreScope, std::io::Error> {
            let owner = Owner {
                uid: config.uid,
                gid: config.gid,
            };
            let fs = CloneFs::new(&config.backing_dir, owner).await?;
            FuseCoreScope::spawn(config, fs, handle)
        }
    }

    /// Unmount whatever is mounted at `mount_point`, retrying while it is busy.
    ///
    /// Returns quietly if nothing is mounted there.
    pub fn force_unmount(mount_point: &Path) {
        const UMOUNT_ATTEMPT_COUNT: usize = 10;
        const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

        for i in 0..UMOUNT_ATTEMPT_COUNT {
            let result = {
                #[cfg(target_os = "macos")]
                {
                    nix::mount::unmount(mount_point, nix::mount::MntFlags::MNT_FORCE)
                }

                #[cfg(target_os = "linux")]
                {
                    nix::mount::umount2(mount_point, nix::mount::MntFlags::MNT_DETACH)
                }
            };

            match result {
                Ok(()) => {
                    debug!(attempt = i + 1, "unmounted FUSE filesystem");
                    break;
                }
                Err(Errno::EBUSY) => {
                    debug!(attempt = i + 1, "FUSE filesystem still busy, retrying...");
                    std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                }
                Err(Errno::EINVAL | Errno::ENOENT) => {
                    debug!(attempt = i + 1, "nothing mounted");
                    break;
                }
                Err(e) => {
                    error!(attempt = i + 1, error = %e, "failed to unmount FUSE filesystem");
                    break;
                }
            }
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            debug!(mount_point = ?self.mount_point, "Confirming unmount of FUSE filesystem...");
            force_unmount(&self.mount_point);
        }
    }
}

/// Prepares the mount point directory.
///
/// - If the directory exists and is non-empty, returns an error.
/// - If the directory does not exist, creates it (including parents) and logs an info message.
/// - If the directory exists and is empty, does nothing.
async fn prepare_mount_point(mount_point: &std::path::Path) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(mount_point).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!(
                        "Mount point '{}' already exists and is not empty.",
                        mount_point.display()
                    ),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn wait_for_exit() -> Result<(), std::io::Error> {
    use tokio::signal;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    select! {
        _ = signal::ctrl_c() => {
            debug!("Received Ctrl+C signal, shutting down...");
        },
        _ = sigterm.recv() => {
            debug!("Received termination signal, shutting down...");
        },
        _ = sighup.recv() => {
            debug!("Received hangup signal, shutting down...");
        },
    }
    Ok(())
}

/// Main entry point for the daemon.
pub async fn run(
    config: app_config::Config,
    handle: tokio::runtime::Handle,
) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(&config.backing_dir).await?;

    // A previous run that died without unmounting leaves a dead mount behind.
    managed_fuse::force_unmount(&config.mount_point);
    prepare_mount_point(&config.mount_point).await?;

    info!(
        backing_dir = %config.backing_dir.display(),
        "Mounting filesystem at {}.",
        config.mount_point.display()
    );

    let fuse = managed_fuse::ManagedFuse::new(&config);
    {
        let _session = fuse.spawn(&config, handle.clone()).await?;
        info!("clone-fs is running. Press Ctrl+C to stop.");

        wait_for_exit().await?;
    }
    Ok(())
}

pub fn spawn(config: app_config::Config) -> Result<(), std::io::Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let handle = runtime.handle().clone();
    runtime.block_on(run(config, handle))
}
