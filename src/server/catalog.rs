//! Server collaborators
//!
//! The scheduler never talks to the filesystem or a database directly; it
//! goes through these traits. The bundled implementations cover the
//! standalone server: a YAML-backed target catalog, a static staff list,
//! and a store that discards snapshots.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::config::RunConf;
use crate::common::{Error, Result};
use crate::run::RunSnapshot;

/// A named, versioned bundle of test scripts submissions run against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,

    #[serde(default)]
    pub print_name: String,

    #[serde(default = "default_version")]
    pub version: u32,

    /// Kernel image the simulator boots for this target
    pub kernel: String,

    /// Scripts executed, in order, one run each
    pub scripts: Vec<String>,

    /// Run configuration applied to every script in this target
    #[serde(default)]
    pub conf: RunConf,
}

fn default_version() -> u32 {
    1
}

/// Lookup of targets by name
#[async_trait]
pub trait TargetCatalog: Send + Sync {
    async fn lookup(&self, name: &str) -> Option<Target>;
    async fn list(&self) -> Vec<Target>;
}

/// In-memory catalog, optionally loaded from a YAML file
#[derive(Debug, Default)]
pub struct StaticCatalog {
    targets: Vec<Target>,
}

impl StaticCatalog {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// Load a catalog from a YAML list of targets
    pub fn load_yaml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        let targets: Vec<Target> =
            serde_yaml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        tracing::info!(count = targets.len(), path = %path.display(), "loaded target catalog");
        Ok(Self { targets })
    }
}

#[async_trait]
impl TargetCatalog for StaticCatalog {
    async fn lookup(&self, name: &str) -> Option<Target> {
        self.targets.iter().find(|t| t.name == name).cloned()
    }

    async fn list(&self) -> Vec<Target> {
        self.targets.clone()
    }
}

/// Participant identity lookup
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn is_staff(&self, user: &str) -> bool;
}

/// Staff list held in memory
#[derive(Debug, Default)]
pub struct StaticIdentityStore {
    staff: HashSet<String>,
}

impl StaticIdentityStore {
    pub fn new<I, S>(staff: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            staff: staff.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl IdentityStore for StaticIdentityStore {
    async fn is_staff(&self, user: &str) -> bool {
        self.staff.contains(user)
    }
}

/// Persistence seam for finished run snapshots
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, snapshot: &RunSnapshot) -> Result<()>;
}

/// Store that drops snapshots on the floor
#[derive(Debug, Default)]
pub struct NullStore;

#[async_trait]
impl RunStore for NullStore {
    async fn save(&self, _snapshot: &RunSnapshot) -> Result<()> {
        Ok(())
    }
}
