//! Daemon configuration loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Socket address the API listens on.
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: String::from("0.0.0.0:8080"),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Reference NixOS source tree copied into every build workspace.
    pub source_dir: PathBuf,
    /// Root of the directory devices poll for updates.
    pub updates_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("nixos"),
            updates_dir: PathBuf::from("updates"),
        }
    }
}

/// External build tool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Executable invoked as `<command> build --option builders "" <target>`.
    pub command: String,
    /// Origin devices use to reach `/update/<fleet>/`.
    pub update_base_url: String,
    /// Kernel attributes profiles may select. Empty allows any well-formed attribute.
    pub allowed_kernels: Vec<String>,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            command: String::from("nix"),
            update_base_url: String::from("http://10.10.0.14:8080"),
            allowed_kernels: Vec::new(),
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetdConfig {
    pub server: ServerSection,
    pub paths: PathsSection,
    pub build: BuildSection,
}

impl FleetdConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(file_path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(file_path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml(value: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(value)?;
        config.build.command = config.build.command.trim().to_string();
        if config.build.command.is_empty() {
            return Err(Error::EmptyBuildCommand);
        }
        config.build.update_base_url = config
            .build
            .update_base_url
            .trim()
            .trim_end_matches('/')
            .to_string();
        Ok(config)
    }

    /// Render the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
