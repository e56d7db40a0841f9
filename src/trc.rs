//! Tracing configuration and initialization.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    EnvFilter,
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

const LOG_ENV_VAR: &str = "CLONE_FS_LOG";

struct FgConfig {
    no_spin: bool,
}

impl FgConfig {
    fn is_ugly(&self) -> bool {
        self.no_spin
    }

    pub fn pretty() -> Self {
        Self { no_spin: false }
    }

    pub fn ugly() -> Self {
        Self { no_spin: true }
    }
}

struct DaemonConfig {
    use_color: bool,
}

enum TrcMode {
    Foreground(FgConfig),
    Daemon(DaemonConfig),
}

pub struct Trc {
    mode: TrcMode,
    env_filter: EnvFilter,
}

fn env_filter_or(default_directive: &str) -> (EnvFilter, bool) {
    match EnvFilter::try_from_env(LOG_ENV_VAR).or_else(|_| EnvFilter::try_from_default_env()) {
        Ok(env_filter) => (env_filter, true),
        Err(_) => (EnvFilter::new(default_directive), false),
    }
}

impl Default for Trc {
    fn default() -> Self {
        match env_filter_or("info") {
            (env_filter, true) => Self {
                // Somebody asking for specific targets wants every line as-is, not spinners.
                mode: TrcMode::Foreground(FgConfig::ugly()),
                env_filter,
            },
            (env_filter, false) => Self {
                mode: TrcMode::Foreground(FgConfig::pretty()),
                env_filter,
            },
        }
    }
}

impl Trc {
    /// Plain line-oriented logging for a detached process.
    pub fn daemon(use_color: bool) -> Self {
        let (env_filter, _) = env_filter_or("info");
        Self {
            mode: TrcMode::Daemon(DaemonConfig { use_color }),
            env_filter,
        }
    }

    pub fn init(self) -> Result<(), TryInitError> {
        match &self.mode {
            TrcMode::Daemon(daemon_config) => {
                let use_color = daemon_config.use_color;
                self.init_ugly_mode(use_color)
            }
            TrcMode::Foreground(fg_config) => {
                if fg_config.is_ugly() {
                    self.init_ugly_mode(true)
                } else {
                    self.init_pretty_mode()
                }
            }
        }
    }

    fn init_ugly_mode(self, use_color: bool) -> Result<(), TryInitError> {
        // "Ugly mode" is the plain, verbose, rust logging mode.
        tracing_subscriber::fmt()
            .with_env_filter(self.env_filter)
            .with_ansi(use_color)
            .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
            .finish()
            .try_init()
    }

    fn init_pretty_mode(self) -> Result<(), TryInitError> {
        // "Pretty mode" is the compact, colorful mode with spinners for long-running spans.
        let indicatif_layer = IndicatifLayer::new();
        tracing_subscriber::registry()
            .with(self.env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(indicatif_layer.get_stderr_writer())
                    .with_target(false)
                    .without_time()
                    .compact(),
            )
            .with(indicatif_layer)
            .try_init()?;

        Ok(())
    }
}
