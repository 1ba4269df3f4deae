//! Discovery snapshot consumed by the partitioner.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RollerError};

/// A mount instance reported by discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MountInstance {
    pub name: String,
    pub node: String,
    #[serde(default)]
    pub unique_id: String,
}

impl MountInstance {
    pub fn new(
        name: impl Into<String>,
        node: impl Into<String>,
        unique_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            node: node.into(),
            unique_id: unique_id.into(),
        }
    }
}

/// A node agent reported by discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentInstance {
    pub name: String,
    pub node: String,
}

impl AgentInstance {
    pub fn new(name: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: node.into(),
        }
    }
}

/// A discovery snapshot: the mounts to upgrade and the agents per node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inventory {
    #[serde(default)]
    pub mounts: Vec<MountInstance>,
    #[serde(default)]
    pub agents: Vec<AgentInstance>,
}

impl Inventory {
    /// Reads a JSON inventory file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RollerError::FileSystem {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&contents).map_err(|e| RollerError::Decode {
            name: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}
