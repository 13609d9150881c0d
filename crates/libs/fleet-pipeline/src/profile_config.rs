//! Decoding of the profile configuration JSON captured by a build.

use serde::Deserialize;
use serde_json::Value;

use crate::kernel::{KernelConfig, KernelPatch, KernelSourceOverride};
use crate::prelude::*;

/// The parts of a profile configuration the build pipeline consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileConfig {
    /// Normalized package attribute names.
    pub packages: Vec<String>,
    /// Normalized kernel selection.
    pub kernel: KernelConfig,
}

// Null values are treated like missing ones; any other type mismatch is an error.
#[derive(Deserialize)]
struct RawProfileConfig {
    packages: Option<Vec<String>>,
    kernel: Option<RawKernel>,
}

#[derive(Deserialize)]
struct RawKernel {
    attr: Option<String>,
    source_override: Option<RawSourceOverride>,
}

#[derive(Deserialize)]
struct RawSourceOverride {
    enabled: Option<bool>,
    url: Option<String>,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    rev: Option<String>,
    patches: Option<Vec<RawPatch>>,
}

#[derive(Deserialize)]
struct RawPatch {
    name: Option<String>,
    sha256: Option<String>,
    content_base64: Option<String>,
}

impl ProfileConfig {
    /// Parses a profile configuration. An empty document is an empty object.
    pub fn parse(config_json: &str) -> Result<Self> {
        let trimmed = match config_json.trim() {
            "" => "{}",
            trimmed => trimmed,
        };

        let value: Value =
            serde_json::from_str(trimmed).map_err(|_| Error::InvalidProfileConfig)?;
        if !value.is_object() {
            return Err(Error::ProfileConfigNotObject);
        }
        let raw: RawProfileConfig =
            serde_json::from_value(value).map_err(|_| Error::InvalidProfileConfig)?;

        Ok(Self {
            packages: normalize_packages(raw.packages.unwrap_or_default()),
            kernel: raw.kernel.map(KernelConfig::from).unwrap_or_default(),
        })
    }
}

impl From<RawKernel> for KernelConfig {
    fn from(raw: RawKernel) -> Self {
        let source_override = raw
            .source_override
            .map(|source| KernelSourceOverride {
                enabled: source.enabled.unwrap_or(false),
                url: source.url.unwrap_or_default(),
                git_ref: source.git_ref.unwrap_or_default(),
                rev: source.rev.unwrap_or_default(),
                patches: source
                    .patches
                    .unwrap_or_default()
                    .into_iter()
                    .map(|patch| KernelPatch {
                        name: patch.name.unwrap_or_default(),
                        sha256: patch.sha256.unwrap_or_default(),
                        content_base64: patch.content_base64.unwrap_or_default(),
                    })
                    .collect(),
            })
            .unwrap_or_default();

        KernelConfig {
            attr: raw.attr.unwrap_or_default(),
            source_override,
        }
        .normalized()
    }
}

/// Trims package names, drops empty ones and removes duplicates, keeping the
/// first occurrence.
pub fn normalize_packages<I, S>(packages: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for package in packages {
        let trimmed = package.as_ref().trim();
        if trimmed.is_empty() || normalized.iter().any(|seen| seen == trimmed) {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}
