//! Isolated, disposable copies of the reference source tree.

use std::{
    fs,
    os::unix::fs::{PermissionsExt, symlink},
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::IoContext;
use crate::layout::{RESULT_NAME, SOURCE_DIR_NAME};
use crate::prelude::*;

/// Temporary directory prefix for primary builds.
pub const BUILD_WORKSPACE_PREFIX: &str = "fleet-build-";
/// Temporary directory prefix for installer builds.
pub const INSTALLER_WORKSPACE_PREFIX: &str = "fleet-installer-build-";

/// A private copy of the source tree. The whole temporary root is removed on drop.
#[derive(Debug)]
pub struct Workspace {
    root: Option<TempDir>,
    source_dir: PathBuf,
}

impl Workspace {
    /// Copies `reference` into `<tmp>/<prefix>XXXX/nixos`.
    pub fn materialize(reference: &Path, prefix: &str) -> Result<Self> {
        let metadata = fs::metadata(reference)
            .context(|| format!("failed to access source directory {}", reference.display()))?;
        if !metadata.is_dir() {
            return Err(Error::SourceNotDirectory(reference.to_path_buf()));
        }

        let root = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .context(|| String::from("failed to create temporary build workspace"))?;
        let source_dir = root.path().join(SOURCE_DIR_NAME);
        copy_tree(reference, &source_dir)?;
        debug!("Materialized workspace at {}", source_dir.display());

        Ok(Self {
            root: Some(root),
            source_dir,
        })
    }

    /// The copied source tree, where the build command runs.
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Where the build tool leaves its output.
    pub fn result_path(&self) -> PathBuf {
        self.source_dir.join(RESULT_NAME)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(root) = self.root.take() {
            let path = root.path().to_path_buf();
            if let Err(err) = root.close() {
                warn!(
                    "Failed to clean temporary build workspace {}: {}",
                    path.display(),
                    err
                );
            }
        }
    }
}

fn should_skip(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name();
    name == RESULT_NAME
        || name == "demo-disk.raw"
        || (entry.file_type().is_dir() && name == ".git")
}

/// Recursively copies `source` into `destination`.
///
/// Permission bits are kept and symlinks are recreated rather than followed.
/// Build outputs and VCS metadata are left behind.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    fs::create_dir_all(destination)
        .context(|| format!("failed to create {}", destination.display()))?;

    let walker = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !should_skip(entry));

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| Error::UnsupportedFileType(entry.path().to_path_buf()))?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let mode = entry
                .metadata()?
                .permissions()
                .mode();
            fs::create_dir_all(&target)
                .context(|| format!("failed to create directory {}", relative.display()))?;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                .context(|| format!("failed to set permissions on {}", relative.display()))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .context(|| format!("failed to read symlink {}", relative.display()))?;
            symlink(&link, &target)
                .context(|| format!("failed to copy symlink {}", relative.display()))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)
                .context(|| format!("failed to copy file {}", relative.display()))?;
        } else {
            return Err(Error::UnsupportedFileType(relative.to_path_buf()));
        }
    }

    Ok(())
}
