//! Kernel selection and source override validation.

use std::sync::LazyLock;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::layout::compile_regex;
use crate::prelude::*;

pub const MAX_PATCH_COUNT: usize = 32;
pub const MAX_PATCH_SIZE_BYTES: usize = 512 * 1024;
pub const MAX_PATCH_TOTAL_SIZE_BYTES: usize = 4 * 1024 * 1024;
const MAX_PATCH_NAME_LEN: usize = 128;

static KERNEL_ATTR: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^linux_[0-9]+_[0-9]+(_hardened)?$"));
static PATCH_SHA256: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"^[0-9a-f]{64}$"));

/// A patch applied on top of an overridden kernel source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelPatch {
    pub name: String,
    /// Lowercase hex SHA-256 of the decoded content.
    pub sha256: String,
    pub content_base64: String,
}

/// Builds the kernel from a pinned git revision instead of nixpkgs' source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSourceOverride {
    pub enabled: bool,
    pub url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub rev: String,
    pub patches: Vec<KernelPatch>,
}

/// Kernel selection of a profile. An empty `attr` keeps the image default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    pub attr: String,
    pub source_override: KernelSourceOverride,
}

/// A validated patch ready to be written next to the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPatch {
    pub name: String,
    pub content: Vec<u8>,
}

impl KernelPatch {
    fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            sha256: self.sha256.trim().to_ascii_lowercase(),
            content_base64: self.content_base64.trim().to_string(),
        }
    }

    fn decode(&self) -> Result<Vec<u8>> {
        if !is_valid_patch_name(&self.name) {
            return Err(Error::InvalidKernel("kernel patch filename is invalid"));
        }
        if !PATCH_SHA256.is_match(&self.sha256) {
            return Err(Error::InvalidKernel("kernel patch checksum is invalid"));
        }

        let content = STANDARD
            .decode(&self.content_base64)
            .map_err(|_| Error::InvalidKernel("kernel patch payload is invalid"))?;
        if content.is_empty() {
            return Err(Error::InvalidKernel("kernel patch payload cannot be empty"));
        }
        if content.len() > MAX_PATCH_SIZE_BYTES {
            return Err(Error::InvalidKernel("kernel patch file is too large"));
        }
        if format!("{:x}", Sha256::digest(&content)) != self.sha256 {
            return Err(Error::InvalidKernel("kernel patch checksum mismatch"));
        }
        Ok(content)
    }
}

impl KernelConfig {
    /// A copy with every field trimmed, digests lowercased and the override
    /// fields cleared when the override is disabled.
    pub fn normalized(&self) -> Self {
        let source = &self.source_override;
        let source_override = if source.enabled {
            KernelSourceOverride {
                enabled: true,
                url: source.url.trim().to_string(),
                git_ref: source.git_ref.trim().to_string(),
                rev: source.rev.trim().to_string(),
                patches: source.patches.iter().map(KernelPatch::normalized).collect(),
            }
        } else {
            KernelSourceOverride::default()
        };

        Self {
            attr: self.attr.trim().to_string(),
            source_override,
        }
    }

    /// Checks the selection. An empty `allowed` list accepts any well-formed attribute.
    pub fn validate(&self, allowed: &[String]) -> Result<()> {
        self.validated(allowed).map(|_| ())
    }

    /// Validates the selection and returns its patches decoded, in order.
    pub fn decoded_patches(&self, allowed: &[String]) -> Result<Vec<DecodedPatch>> {
        self.validated(allowed)
    }

    fn validated(&self, allowed: &[String]) -> Result<Vec<DecodedPatch>> {
        // Patches on a disabled override are checked before normalization drops them.
        if !self.source_override.enabled && !self.source_override.patches.is_empty() {
            return Err(Error::InvalidKernel(
                "kernel patches require source override to be enabled",
            ));
        }

        let normalized = self.normalized();
        if !normalized.attr.is_empty() {
            if !KERNEL_ATTR.is_match(&normalized.attr) {
                return Err(Error::InvalidKernel("selected kernel is invalid"));
            }
            if !allowed.is_empty() && !allowed.iter().any(|attr| attr == &normalized.attr) {
                return Err(Error::InvalidKernel(
                    "selected kernel is not available in pinned nixpkgs",
                ));
            }
        }

        let source = &normalized.source_override;
        if !source.enabled {
            return Ok(Vec::new());
        }
        if normalized.attr.is_empty() {
            return Err(Error::InvalidKernel(
                "kernel source override requires selecting a kernel version",
            ));
        }
        if source.url.is_empty() {
            return Err(Error::InvalidKernel("kernel source override URL is required"));
        }
        if source.rev.is_empty() {
            return Err(Error::InvalidKernel(
                "kernel source override revision is required",
            ));
        }

        let url = Url::parse(&source.url)
            .ok()
            .filter(|url| url.host_str().is_some_and(|host| !host.is_empty()))
            .ok_or(Error::InvalidKernel(
                "kernel source override URL must be a valid absolute URL",
            ))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidKernel(
                "kernel source override URL must use http or https",
            ));
        }

        if source.patches.len() > MAX_PATCH_COUNT {
            return Err(Error::InvalidKernel("kernel patch count exceeds limit"));
        }

        let mut total = 0;
        let mut decoded = Vec::with_capacity(source.patches.len());
        for patch in &source.patches {
            let content = patch.decode()?;
            total += content.len();
            if total > MAX_PATCH_TOTAL_SIZE_BYTES {
                return Err(Error::InvalidKernel("kernel patch payload is too large"));
            }
            decoded.push(DecodedPatch {
                name: patch.name.clone(),
                content,
            });
        }
        Ok(decoded)
    }
}

fn is_valid_patch_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed.len() <= MAX_PATCH_NAME_LEN
        && !trimmed.contains(['/', '\\'])
        && trimmed != "."
        && trimmed != ".."
        && trimmed.bytes().all(|b| (32..=126).contains(&b))
}

#[cfg(test)]
mod test {
    use super::*;

    const REV: &str = "abcd1234abcd1234abcd1234abcd1234abcd1234";

    fn patch(name: &str, content: &[u8]) -> KernelPatch {
        KernelPatch {
            name: name.to_string(),
            sha256: format!("{:X}", Sha256::digest(content)),
            content_base64: STANDARD.encode(content),
        }
    }

    fn overridden(patches: Vec<KernelPatch>) -> KernelConfig {
        KernelConfig {
            attr: "linux_6_12".to_string(),
            source_override: KernelSourceOverride {
                enabled: true,
                url: " https://git.example.org/linux.git ".to_string(),
                git_ref: String::new(),
                rev: REV.to_string(),
                patches,
            },
        }
    }

    fn message(result: Result<()>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn validation_is_idempotent() {
        let config = overridden(vec![patch("0001-fix.patch", b"diff")]);
        let normalized = config.normalized();
        assert_eq!(normalized.normalized(), normalized);
        config.validate(&[]).unwrap();
        normalized.validate(&[]).unwrap();
        assert_eq!(
            normalized.source_override.url,
            "https://git.example.org/linux.git"
        );
    }

    #[test]
    fn attr_is_checked_against_pattern_and_allow_list() {
        let mut config = KernelConfig {
            attr: "linux_latest".to_string(),
            ..Default::default()
        };
        assert_eq!(message(config.validate(&[])), "selected kernel is invalid");

        config.attr = "linux_6_6_hardened".to_string();
        config.validate(&[]).unwrap();
        assert_eq!(
            message(config.validate(&["linux_6_12".to_string()])),
            "selected kernel is not available in pinned nixpkgs"
        );
    }

    #[test]
    fn patches_require_enabled_override() {
        let mut config = overridden(vec![patch("a.patch", b"x")]);
        config.source_override.enabled = false;
        assert_eq!(
            message(config.validate(&[])),
            "kernel patches require source override to be enabled"
        );
    }

    #[test]
    fn override_requires_url_and_revision() {
        let mut config = overridden(Vec::new());
        config.source_override.url = "git.example.org/linux".to_string();
        assert_eq!(
            message(config.validate(&[])),
            "kernel source override URL must be a valid absolute URL"
        );
        config.source_override.url = "ssh://git.example.org/linux".to_string();
        assert_eq!(
            message(config.validate(&[])),
            "kernel source override URL must use http or https"
        );
        config.source_override.rev = " ".to_string();
        assert_eq!(
            message(config.validate(&[])),
            "kernel source override revision is required"
        );
        config.attr = String::new();
        assert_eq!(
            message(config.validate(&[])),
            "kernel source override requires selecting a kernel version"
        );
    }

    #[test]
    fn patch_checksum_is_enforced() {
        let mut bad = patch("a.patch", b"original");
        bad.content_base64 = STANDARD.encode(b"tampered");
        assert_eq!(
            message(overridden(vec![bad]).validate(&[])),
            "kernel patch checksum mismatch"
        );

        let mut short = patch("a.patch", b"x");
        short.sha256 = "abc".to_string();
        assert_eq!(
            message(overridden(vec![short]).validate(&[])),
            "kernel patch checksum is invalid"
        );
    }

    #[test]
    fn patch_names_and_limits() {
        for name in ["", "..", "a/b", "tab\tname"] {
            assert_eq!(
                message(overridden(vec![patch(name, b"x")]).validate(&[])),
                "kernel patch filename is invalid"
            );
        }

        let too_many = (0..=MAX_PATCH_COUNT)
            .map(|i| patch(&format!("{i}.patch"), b"x"))
            .collect();
        assert_eq!(
            message(overridden(too_many).validate(&[])),
            "kernel patch count exceeds limit"
        );

        let large = vec![0u8; MAX_PATCH_SIZE_BYTES + 1];
        assert_eq!(
            message(overridden(vec![patch("big.patch", &large)]).validate(&[])),
            "kernel patch file is too large"
        );

        let chunk = vec![1u8; MAX_PATCH_SIZE_BYTES];
        let patches = (0..9).map(|i| patch(&format!("{i}.patch"), &chunk)).collect();
        assert_eq!(
            message(overridden(patches).validate(&[])),
            "kernel patch payload is too large"
        );
    }

    #[test]
    fn decodes_patches_in_order() {
        let config = overridden(vec![patch("b.patch", b"two"), patch("a.patch", b"one")]);
        let decoded = config.decoded_patches(&[]).unwrap();
        assert_eq!(decoded[0].name, "b.patch");
        assert_eq!(decoded[1].content, b"one");
    }
}
