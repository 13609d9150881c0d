//! Lifecycle states of a build and of its installer sub-build.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Status of the primary build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// Status of the installer sub-build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallerStatus {
    NotRequested,
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Running => "running",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
        }
    }

    /// Whether no further transitions happen without a new submission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Succeeded | BuildStatus::Failed)
    }
}

impl InstallerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallerStatus::NotRequested => "not_requested",
            InstallerStatus::Queued => "queued",
            InstallerStatus::Running => "running",
            InstallerStatus::Succeeded => "succeeded",
            InstallerStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallerStatus::Succeeded | InstallerStatus::Failed)
    }

    /// Whether an installer build is waiting or executing.
    pub fn is_active(&self) -> bool {
        matches!(self, InstallerStatus::Queued | InstallerStatus::Running)
    }
}

impl FromStr for BuildStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(BuildStatus::Queued),
            "running" => Ok(BuildStatus::Running),
            "succeeded" => Ok(BuildStatus::Succeeded),
            "failed" => Ok(BuildStatus::Failed),
            _ => Err(Error::InvalidStatus(value.to_string())),
        }
    }
}

impl FromStr for InstallerStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "not_requested" => Ok(InstallerStatus::NotRequested),
            "queued" => Ok(InstallerStatus::Queued),
            "running" => Ok(InstallerStatus::Running),
            "succeeded" => Ok(InstallerStatus::Succeeded),
            "failed" => Ok(InstallerStatus::Failed),
            _ => Err(Error::InvalidStatus(value.to_string())),
        }
    }
}

impl Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for InstallerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
