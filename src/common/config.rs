//! Run and server configuration
//!
//! Field-level serde defaults stand in for a merge-with-defaults pass:
//! deserializing a partial configuration yields the same struct as merging
//! it over `RunConf::default()`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{Error, Result};

/// Fully resolved configuration for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConf {
    /// Simulator invocation and machine configuration
    #[serde(default)]
    pub sim: SimConf,

    /// Timeout clocks
    #[serde(default)]
    pub monitor: MonitorConf,

    /// Retry and console-interaction tunables
    #[serde(default)]
    pub misc: MiscConf,

    /// User-defined nested environments, in declaration (priority) order
    #[serde(default, rename = "commandconf")]
    pub env_defs: Vec<crate::script::EnvSpec>,

    /// Per-command overrides applied after compilation
    #[serde(default, rename = "commandoverrides")]
    pub overrides: Vec<crate::script::CommandOverride>,
}

/// Simulator machine configuration, rendered into sys161.conf
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConf {
    /// Path to the sys161 binary
    #[serde(default = "default_sim_path")]
    pub path: PathBuf,

    #[serde(default = "default_cpus")]
    pub cpus: u32,

    /// RAM size as sys161 understands it, e.g. "1M"
    #[serde(default = "default_ram")]
    pub ram: String,

    #[serde(default = "DiskConf::disk1_default")]
    pub disk1: DiskConf,

    #[serde(default = "DiskConf::disk2_default")]
    pub disk2: DiskConf,
}

impl Default for SimConf {
    fn default() -> Self {
        Self {
            path: default_sim_path(),
            cpus: default_cpus(),
            ram: default_ram(),
            disk1: DiskConf::disk1_default(),
            disk2: DiskConf::disk2_default(),
        }
    }
}

fn default_sim_path() -> PathBuf {
    PathBuf::from("sys161")
}
fn default_cpus() -> u32 {
    8
}
fn default_ram() -> String {
    "1M".to_string()
}

/// Per-disk parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConf {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_rpm")]
    pub rpm: u32,

    #[serde(default = "default_disk_bytes")]
    pub bytes: String,

    #[serde(default)]
    pub nodoom: bool,
}

impl DiskConf {
    fn disk1_default() -> Self {
        Self {
            enabled: false,
            rpm: default_rpm(),
            bytes: default_disk_bytes(),
            nodoom: true,
        }
    }

    fn disk2_default() -> Self {
        Self {
            enabled: false,
            rpm: default_rpm(),
            bytes: default_disk_bytes(),
            nodoom: false,
        }
    }
}

fn default_rpm() -> u32 {
    7200
}
fn default_disk_bytes() -> String {
    "32M".to_string()
}

/// Timeout clock configuration, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConf {
    /// Simulated-time stall detector; reset by any simulator output
    #[serde(default = "default_progress_timeout", rename = "progresstimeout")]
    pub progress_timeout: f32,

    /// Wall-clock deadline for one command
    #[serde(default = "default_command_timeout", rename = "commandtimeout")]
    pub command_timeout: f32,
}

impl Default for MonitorConf {
    fn default() -> Self {
        Self {
            progress_timeout: default_progress_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

fn default_progress_timeout() -> f32 {
    10.0
}
fn default_command_timeout() -> f32 {
    60.0
}

/// Console-interaction tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiscConf {
    /// Resend budget for commands whose echo came back corrupted
    #[serde(default = "default_command_retries", rename = "commandretries")]
    pub command_retries: u32,

    /// Wall-clock ceiling on waiting for any prompt, in seconds
    #[serde(default = "default_prompt_timeout", rename = "prompttimeout")]
    pub prompt_timeout: f32,

    /// Per-character echo deadline, in milliseconds
    #[serde(default = "default_character_timeout", rename = "charactertimeout")]
    pub character_timeout: u64,

    /// Characters the console is allowed to drop; an echo mismatch made up
    /// entirely of these is retried rather than treated as fatal
    #[serde(default = "default_retry_characters", rename = "retrycharacters")]
    pub retry_characters: String,
}

impl Default for MiscConf {
    fn default() -> Self {
        Self {
            command_retries: default_command_retries(),
            prompt_timeout: default_prompt_timeout(),
            character_timeout: default_character_timeout(),
            retry_characters: default_retry_characters(),
        }
    }
}

fn default_command_retries() -> u32 {
    5
}
fn default_prompt_timeout() -> f32 {
    1800.0
}
fn default_character_timeout() -> u64 {
    1000
}
fn default_retry_characters() -> String {
    // Characters sys161's console has been observed to drop under load
    "\u{8}\u{7f} ".to_string()
}

/// Server configuration loaded by `sim161 serve`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConf {
    /// Maximum concurrently running runs; 0 means unbounded
    #[serde(default)]
    pub capacity: usize,

    /// Oldest client version still accepted
    #[serde(default = "default_min_client")]
    pub min_client: semver::Version,

    /// Path to the YAML target catalog
    #[serde(default = "default_targets_path")]
    pub targets: PathBuf,

    /// Targets rejected outright
    #[serde(default)]
    pub disabled_targets: Vec<String>,

    /// Targets only staff may submit against
    #[serde(default)]
    pub staff_only_targets: Vec<String>,
}

impl Default for ServerConf {
    fn default() -> Self {
        Self {
            capacity: 0,
            min_client: default_min_client(),
            targets: default_targets_path(),
            disabled_targets: Vec::new(),
            staff_only_targets: Vec::new(),
        }
    }
}

fn default_min_client() -> semver::Version {
    semver::Version::new(0, 1, 0)
}
fn default_targets_path() -> PathBuf {
    PathBuf::from("targets.yml")
}

impl ServerConf {
    /// Load server configuration from a TOML file
    ///
    /// Returns the default configuration if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("using default server configuration");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }
}
