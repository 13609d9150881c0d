//! Names and paths shared by the workspace, the publisher and the update server.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use url::Url;

/// Name of the source tree inside a build workspace.
pub const SOURCE_DIR_NAME: &str = "nixos";
/// Directory under the updates root holding every published build.
pub const ARTIFACTS_DIR_NAME: &str = "artifacts";
/// Directory under a published build holding installer images.
pub const INSTALLER_DIR_NAME: &str = "installer";
/// Overlay module regenerated for every build, relative to the source tree.
pub const BUILD_OVERRIDES_PATH: &str = "modules/build-overrides.nix";
/// Kernel patch files referenced by the overlay, relative to the source tree.
pub const KERNEL_PATCHES_PATH: &str = "modules/kernel-patches";
/// Build output link created by the build tool.
pub const RESULT_NAME: &str = "result";
/// Checksum manifest served next to update artifacts.
pub const CHECKSUM_MANIFEST_NAME: &str = "SHA256SUMS";

pub const UPDATE_BUILD_TARGET: &str = ".#fleet-update";
pub const INSTALLER_BUILD_TARGET: &str = ".#fleet-installer";

static NIX_STORE_ARTIFACT: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^[^/]+_[^/]+\.nix-store\.raw$"));
static UKI_ARTIFACT: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"^[^/]+_[^/]+\.efi$"));
static SAFE_PATH_SEGMENT: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"^[A-Za-z0-9-]+$"));
static URL_ROOT: LazyLock<Url> = LazyLock::new(|| match Url::parse("http://localhost/") {
    Ok(url) => url,
    Err(err) => panic!("invalid url root: {err}"),
});

pub(crate) fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}

/// Whether `name` is a primary update artifact (`<name>_<version>.nix-store.raw` or `.efi`).
pub fn is_update_artifact_name(name: &str) -> bool {
    if name.is_empty() || name.contains('/') {
        return false;
    }
    NIX_STORE_ARTIFACT.is_match(name) || UKI_ARTIFACT.is_match(name)
}

/// Whether `name` is an installer image (`.iso` or `.iso.zst`, any case).
pub fn is_installer_artifact_name(name: &str) -> bool {
    let normalized = name.trim().to_ascii_lowercase();
    if normalized.is_empty() || normalized.contains('/') {
        return false;
    }
    normalized.ends_with(".iso") || normalized.ends_with(".iso.zst")
}

/// Whether `value` can be used as a single directory name under the updates root.
pub fn is_safe_path_segment(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains("..")
    {
        return false;
    }
    SAFE_PATH_SEGMENT.is_match(trimmed)
}

/// Builds an absolute `/update/...` URL path with every segment percent-escaped.
pub fn update_url_path(segments: &[&str]) -> String {
    let mut url = URL_ROOT.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.clear().push("update").extend(segments);
    }
    url.path().to_string()
}

/// Directory layout of the updates root served under `/update/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatesLayout {
    root: PathBuf,
}

impl UpdatesLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `updates/artifacts/<build>`
    pub fn build_dir(&self, build_id: &str) -> PathBuf {
        self.root.join(ARTIFACTS_DIR_NAME).join(build_id)
    }

    /// `updates/artifacts/<build>/installer`
    pub fn installer_dir(&self, build_id: &str) -> PathBuf {
        self.build_dir(build_id).join(INSTALLER_DIR_NAME)
    }

    /// `updates/<fleet>`, the live set devices poll.
    pub fn fleet_dir(&self, fleet_id: &str) -> PathBuf {
        self.root.join(fleet_id)
    }
}
