//! Runtime configuration for gpu-debug.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! The `GPU_DEBUG_SYNC` environment variable overrides the sync-mode setting.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::checked::FailurePolicy;

/// Environment variable forcing synchronous debug mode ("1"/"true" or "0"/"false").
pub const SYNC_ENV: &str = "GPU_DEBUG_SYNC";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "gpu-debug", about = "Checked CUDA runtime calls and device reporting")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "gpu-debug.json")]
    pub config: PathBuf,

    /// Use the simulated runtime even when CUDA support is compiled in.
    #[arg(long)]
    pub mock: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Enumerate and print all devices.
    Devices {
        /// Print descriptors as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Make a device active and print it.
    Select {
        /// Device index.
        index: usize,
    },

    /// Run a checked allocate/fill/copy/free cycle on the active device.
    Selftest {
        /// Force synchronous debug mode.
        #[arg(long)]
        sync: bool,

        /// Failure policy override.
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Inject a runtime failure at this step (simulated runtime only).
        #[arg(long, value_enum)]
        fail_at: Option<SelftestStep>,

        /// Bytes to allocate and copy.
        #[arg(long, default_value_t = 4096)]
        bytes: usize,
    },
}

/// CLI spelling of [`FailurePolicy`].
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    Exit,
    Panic,
    Return,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Exit => FailurePolicy::Exit,
            PolicyArg::Panic => FailurePolicy::Panic,
            PolicyArg::Return => FailurePolicy::Return,
        }
    }
}

/// Steps of the self-test that can be made to fail.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelftestStep {
    StreamCreate,
    Malloc,
    Memset,
    CopyToDevice,
    CopyToHost,
    Free,
    StreamDestroy,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Checked-layer behavior.
    pub debug: DebugConfig,

    /// Device selection and reporting.
    pub device: DeviceConfig,
}

/// Checked-layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Force every asynchronous call to synchronize and check errors.
    pub sync_mode: bool,

    /// What to do after a failed call is reported.
    pub policy: FailurePolicy,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            sync_mode: false,
            policy: FailurePolicy::Exit,
        }
    }
}

/// Device settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device to make active at startup (runtime default when unset).
    pub index: Option<usize>,

    /// Print all device descriptors at startup.
    pub print_on_start: bool,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env(std::env::var(SYNC_ENV).ok().as_deref());
        Ok(config)
    }

    /// Apply the value of [`SYNC_ENV`], if set and recognized.
    pub fn apply_env(&mut self, sync: Option<&str>) {
        match sync.map(str::trim) {
            Some("1") | Some("true") | Some("on") => self.debug.sync_mode = true,
            Some("0") | Some("false") | Some("off") => self.debug.sync_mode = false,
            Some(other) => tracing::warn!("Ignoring {SYNC_ENV}={other:?}"),
            None => {}
        }
    }
}
