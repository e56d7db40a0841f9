//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file.

use std::fs::File;
use std::io::IsTerminal as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

fn clone_fs_runtime_dir() -> Option<PathBuf> {
    let runtime_dir = dirs::runtime_dir();
    if let Some(path) = runtime_dir {
        return Some(path.join("clone-fs"));
    }

    let home_dir = dirs::home_dir();
    if let Some(path) = home_dir {
        return Some(path.join(".local").join("share").join("clone-fs"));
    }

    None
}

fn default_pid_file() -> PathBuf {
    clone_fs_runtime_dir().map_or_else(
        || PathBuf::from("/var/run/clone-fs.pid"),
        |rd| rd.join("clone-fs.pid"),
    )
}

fn default_mount_point() -> PathBuf {
    clone_fs_runtime_dir().map_or_else(|| PathBuf::from("/tmp/clone-fs/mnt"), |rd| rd.join("mnt"))
}

fn default_backing_dir() -> PathBuf {
    clone_fs_runtime_dir().map_or_else(
        || PathBuf::from("/tmp/clone-fs/backing"),
        |rd| rd.join("backing"),
    )
}

fn default_owner_id() -> u32 {
    1000
}

/// Where the daemon writes its log output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogTarget {
    /// Inherit stdout and stderr.
    #[default]
    Stdout,
    /// Append to the given file.
    File(PathBuf),
}

impl LogTarget {
    /// Open the log file for appending, if this target names one.
    pub fn open_log_file(&self) -> Result<Option<File>, std::io::Error> {
        match self {
            Self::Stdout => Ok(None),
            Self::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map(Some)
            }
        }
    }
}

/// When to emit ANSI colors in log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorMode {
    /// Color only when writing to a terminal.
    #[default]
    Auto,
    /// Always color.
    Always,
    /// Never color.
    Never,
}

/// Daemon log configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogConfig {
    /// Where log lines go.
    #[serde(default)]
    pub target: LogTarget,

    /// Whether log lines carry ANSI colors.
    #[serde(default)]
    pub color: ColorMode,
}

impl LogConfig {
    /// Resolve the color mode against the configured target.
    pub fn should_use_color(&self) -> bool {
        match (self.color, &self.target) {
            (ColorMode::Always, _) => true,
            (ColorMode::Never, _) | (ColorMode::Auto, LogTarget::File(_)) => false,
            (ColorMode::Auto, LogTarget::Stdout) => {
                env_flag("FORCE_COLOR") || (std::io::stdout().is_terminal() && !env_flag("NO_COLOR"))
            }
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|v| !v.is_empty())
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DaemonConfig {
    /// The path to the PID file for the daemon. Uses /var/run/clone-fs.pid if not specified.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Log output settings for the daemonized process.
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log: LogConfig::default(),
        }
    }
}

/// Application configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// The directory whose files are mirrored by the mount.
    #[serde(default = "default_backing_dir")]
    pub backing_dir: PathBuf,

    /// The mount point for the filesystem.
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,

    /// The owner reported for every inode.
    #[serde(default = "default_owner_id")]
    pub uid: u32,

    /// The group reported for every inode.
    #[serde(default = "default_owner_id")]
    pub gid: u32,

    /// Let users other than the mounting one access the filesystem. Requires `user_allow_other`
    /// in /etc/fuse.conf.
    #[serde(default)]
    pub allow_other: bool,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backing_dir: default_backing_dir(),
            mount_point: default_mount_point(),
            uid: default_owner_id(),
            gid: default_owner_id(),
            allow_other: false,
            daemon: DaemonConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parent directory does not exist.")]
    NoParentDir,

    #[error("No suitable configuration path found.")]
    NoSuitableConfigPath,
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(ConfigError::ValidationErrors)` carrying every validation error message otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.daemon.pid_file.parent().is_none() {
            errors.push(format!(
                "PID file path '{}' has no parent directory.",
                self.daemon.pid_file.display()
            ));
        }

        if self.backing_dir == self.mount_point {
            errors.push(format!(
                "Backing directory and mount point are both '{}'.",
                self.backing_dir.display()
            ));
        } else if self.backing_dir.starts_with(&self.mount_point) {
            errors.push(format!(
                "Backing directory '{}' is inside the mount point '{}'.",
                self.backing_dir.display(),
                self.mount_point.display()
            ));
        } else if self.mount_point.starts_with(&self.backing_dir) {
            errors.push(format!(
                "Mount point '{}' is inside the backing directory '{}'.",
                self.mount_point.display(),
                self.backing_dir.display()
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationErrors(errors))
        }
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("clone-fs").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("clone-fs").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/clone-fs/config.toml"));

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads configuration from the first found config file, or the external path if given.
    pub fn load(external_config_path: Option<&Path>) -> Option<Result<Self, ConfigError>> {
        if let Some(path) = external_config_path {
            return Some(Self::load_from_file(path));
        }

        Self::find_config_file().map(|path| Self::load_from_file(&path))
    }

    /// Loads config or creates a default if none exists.
    /// Errors if a config file exists but is malformed.
    pub fn load_or_create(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(res) = Self::load(external_config_path) {
            let config = res?;
            debug!("Loaded configuration successfully.");
            return Ok(config);
        }

        // No config exists, so write the defaults to the highest-priority path.
        let creation_path = Self::config_search_paths()
            .into_iter()
            .next()
            .ok_or(ConfigError::NoSuitableConfigPath)?;

        let config = Self::default();
        config.write_to_disk(&creation_path)?;
        info!(path = ?creation_path.display(), "Created configuration file.");
        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded file.
    #[must_use]
    pub fn with_overrides(mut self, backing_dir: Option<PathBuf>, mount_point: Option<PathBuf>) -> Self {
        if let Some(backing_dir) = backing_dir {
            self.backing_dir = backing_dir;
        }
        if let Some(mount_point) = mount_point {
            self.mount_point = mount_point;
        }
        self
    }

    fn write_to_disk(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::create_dir_all(path.parent().ok_or(ConfigError::NoParentDir)?)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!((config.uid, config.gid), (1000, 1000));
        assert!(!config.allow_other);
    }

    #[test]
    fn kebab_case_keys_parse() {
        let config: Config = toml::from_str(
            r#"
            backing-dir = "/srv/backing"
            mount-point = "/mnt/clone"
            uid = 501
            allow-other = true

            [daemon]
            pid-file = "/run/clone-fs.pid"

            [daemon.log]
            target = { file = "/var/log/clone-fs.log" }
            color = "never"
            "#,
        )
        .unwrap();

        assert_eq!(config.backing_dir, PathBuf::from("/srv/backing"));
        assert_eq!(config.mount_point, PathBuf::from("/mnt/clone"));
        assert_eq!(config.uid, 501);
        assert_eq!(config.gid, 1000);
        assert!(config.allow_other);
        assert_eq!(
            config.daemon.log.target,
            LogTarget::File(PathBuf::from("/var/log/clone-fs.log"))
        );
        assert!(!config.daemon.log.should_use_color());
    }

    #[test]
    fn validation_collects_overlap_errors() {
        let config = Config::default().with_overrides(
            Some(PathBuf::from("/mnt/clone/backing")),
            Some(PathBuf::from("/mnt/clone")),
        );
        let Err(ConfigError::ValidationErrors(errors)) = config.validate() else {
            panic!("overlapping directories must fail validation");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("inside the mount point"));

        let same = Config::default()
            .with_overrides(Some(PathBuf::from("/x")), Some(PathBuf::from("/x")));
        assert!(matches!(same.validate(), Err(ConfigError::ValidationErrors(_))));

        let nested = Config::default()
            .with_overrides(Some(PathBuf::from("/x")), Some(PathBuf::from("/x/mnt")));
        assert!(matches!(nested.validate(), Err(ConfigError::ValidationErrors(_))));

        let disjoint = Config::default()
            .with_overrides(Some(PathBuf::from("/x/data")), Some(PathBuf::from("/x/mnt")));
        assert!(disjoint.validate().is_ok());
    }

    #[test]
    fn pid_file_without_parent_is_rejected() {
        let mut config = Config::default()
            .with_overrides(Some(PathBuf::from("/a")), Some(PathBuf::from("/b")));
        config.daemon.pid_file = PathBuf::from("/");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationErrors(errors)) if errors.len() == 1
        ));
    }

    #[test]
    fn defaults_round_trip_through_the_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::default();
        config.write_to_disk(&path).unwrap();
        let loaded = Config::load(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, config);
    }
}
