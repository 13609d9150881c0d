//! Copying build results into the served updates tree.

use std::{
    collections::HashMap,
    fs::{self, DirBuilder, File, OpenOptions},
    io,
    os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::IoContext;
use crate::layout::{
    ARTIFACTS_DIR_NAME, CHECKSUM_MANIFEST_NAME, INSTALLER_DIR_NAME, UpdatesLayout,
    is_installer_artifact_name, is_update_artifact_name, update_url_path,
};
use crate::prelude::*;

const DIR_MODE: u32 = 0o750;
const DEFAULT_FILE_MODE: u32 = 0o644;

/// A file selected for publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    /// Permission bits of the source file.
    pub mode: u32,
}

/// Creates `path` and its parents with mode `0750`.
pub fn create_dir_all(path: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(DIR_MODE).create(path)
}

/// Copies a file, creating the destination with `mode` (`0644` when zero).
pub fn copy_file(source: &Path, destination: &Path, mode: u32) -> io::Result<()> {
    let mode = match mode & 0o777 {
        0 => DEFAULT_FILE_MODE,
        mode => mode,
    };
    let mut input = File::open(source)?;
    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(destination)?;
    io::copy(&mut input, &mut output)?;
    Ok(())
}

/// Publishes the primary artifacts found at the top level of `result_dir`.
///
/// Returns the canonical URL of the build.
pub fn publish_build_artifacts(
    result_dir: &Path,
    layout: &UpdatesLayout,
    build_id: &str,
) -> Result<String> {
    let build_id = build_id.trim();
    if build_id.is_empty() {
        return Err(Error::InvalidIdentifier("build"));
    }

    let published_dir = layout.build_dir(build_id);
    create_dir_all(&published_dir)
        .context(|| String::from("failed to create build artifacts directory"))?;

    let entries = fs::read_dir(result_dir)
        .context(|| String::from("failed to read build result directory"))?
        .collect::<io::Result<Vec<_>>>()
        .context(|| String::from("failed to read build result directory"))?;
    if entries.is_empty() {
        return Err(Error::Artifacts(String::from("build produced no artifacts")));
    }

    let mut names = Vec::new();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == CHECKSUM_MANIFEST_NAME {
            warn!("Ignoring pre-generated checksum manifest {}", name);
            continue;
        }
        if !is_update_artifact_name(&name) {
            warn!("Ignoring non-matching build artifact {}", name);
            continue;
        }

        let metadata = entry
            .metadata()
            .context(|| format!("failed to read artifact metadata for {name}"))?;
        if metadata.is_dir() {
            warn!("Ignoring artifact directory {}", name);
            continue;
        }
        if !metadata.is_file() {
            warn!("Ignoring non-regular artifact {}", name);
            continue;
        }

        copy_file(
            &entry.path(),
            &published_dir.join(&name),
            metadata.permissions().mode(),
        )
        .context(|| format!("failed to copy artifact {name}"))?;
        names.push(name);
    }

    if names.is_empty() {
        return Err(Error::Artifacts(String::from(
            "build produced no artifacts matching update naming patterns",
        )));
    }
    names.sort();
    info!("Published {} artifacts for build {}", names.len(), build_id);
    Ok(primary_artifact_url(build_id, &names))
}

/// Finds the installer images of an installer build result.
///
/// The result may be a single image or a directory searched recursively.
/// Images with the same file name in different directories are rejected.
pub fn collect_installer_artifacts(result_path: &Path) -> Result<Vec<Artifact>> {
    let result_path = fs::canonicalize(result_path).unwrap_or_else(|_| result_path.to_path_buf());
    let metadata = fs::metadata(&result_path)
        .context(|| String::from("failed to inspect installer build result"))?;

    if metadata.is_file() {
        let name = result_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !is_installer_artifact_name(&name) {
            return Err(Error::Artifacts(String::from(
                "installer build result is not an ISO artifact",
            )));
        }
        return Ok(vec![Artifact {
            name,
            mode: metadata.permissions().mode(),
            path: result_path,
        }]);
    }
    if !metadata.is_dir() {
        return Err(Error::Artifacts(String::from(
            "installer build result is neither a file nor directory",
        )));
    }

    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut artifacts = Vec::new();
    for entry in WalkDir::new(&result_path).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_installer_artifact_name(&name) {
            continue;
        }
        let metadata = fs::metadata(entry.path())
            .context(|| format!("failed to read installer artifact metadata for {name}"))?;
        if !metadata.is_file() {
            continue;
        }

        if let Some(existing) = seen.get(&name) {
            return Err(Error::Artifacts(format!(
                "duplicate installer artifact filename {} found at {} and {}",
                name,
                existing.display(),
                entry.path().display()
            )));
        }
        seen.insert(name.clone(), entry.path().to_path_buf());
        artifacts.push(Artifact {
            name,
            path: entry.path().to_path_buf(),
            mode: metadata.permissions().mode(),
        });
    }

    if artifacts.is_empty() {
        return Err(Error::Artifacts(String::from(
            "installer build produced no ISO artifacts",
        )));
    }
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(artifacts)
}

/// Publishes installer images under the build's `installer/` directory.
pub fn publish_installer_artifacts(
    result_path: &Path,
    layout: &UpdatesLayout,
    build_id: &str,
) -> Result<String> {
    let build_id = build_id.trim();
    if build_id.is_empty() {
        return Err(Error::InvalidIdentifier("build"));
    }

    let installer_dir = layout.installer_dir(build_id);
    create_dir_all(&installer_dir)
        .context(|| String::from("failed to create installer artifacts directory"))?;

    let artifacts = collect_installer_artifacts(result_path)?;
    let mut names = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        copy_file(
            &artifact.path,
            &installer_dir.join(&artifact.name),
            artifact.mode,
        )
        .context(|| format!("failed to copy installer artifact {}", artifact.name))?;
        names.push(artifact.name);
    }
    names.sort();
    Ok(installer_artifact_url(build_id, &names))
}

/// The canonical URL among published primary artifacts.
///
/// Prefers the nix store image, then the boot image, then the manifest, then
/// the first name.
pub fn primary_artifact_url(build_id: &str, names: &[String]) -> String {
    let chosen = names
        .iter()
        .find(|name| name.ends_with(".nix-store.raw"))
        .or_else(|| names.iter().find(|name| name.ends_with(".efi")))
        .or_else(|| names.iter().find(|name| *name == CHECKSUM_MANIFEST_NAME))
        .or_else(|| names.first())
        .map(String::as_str)
        .unwrap_or_default();
    update_url_path(&[ARTIFACTS_DIR_NAME, build_id, chosen])
}

/// The canonical URL among published installer images, preferring a plain ISO.
pub fn installer_artifact_url(build_id: &str, names: &[String]) -> String {
    let chosen = names
        .iter()
        .find(|name| name.to_ascii_lowercase().ends_with(".iso"))
        .or_else(|| names.first())
        .map(String::as_str)
        .unwrap_or_default();
    update_url_path(&[ARTIFACTS_DIR_NAME, build_id, INSTALLER_DIR_NAME, chosen])
}

#[cfg(test)]
mod test {
    use std::os::unix::fs::symlink;

    use super::*;

    const BUILD: &str = "6f1f4f4e-8d4e-4a57-9a3e-0b7c0e1b2c3d";

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn primary_url_prefers_nix_store_image() {
        assert_eq!(
            primary_artifact_url(
                BUILD,
                &names(&["SHA256SUMS", "fleet_v1.efi", "fleet_v1.nix-store.raw"])
            ),
            format!("/update/artifacts/{BUILD}/fleet_v1.nix-store.raw")
        );
        assert_eq!(
            primary_artifact_url(BUILD, &names(&["a.txt", "fleet_v1.efi"])),
            format!("/update/artifacts/{BUILD}/fleet_v1.efi")
        );
        assert_eq!(
            primary_artifact_url(BUILD, &names(&["b.txt", "SHA256SUMS"])),
            format!("/update/artifacts/{BUILD}/SHA256SUMS")
        );
        assert_eq!(
            primary_artifact_url(BUILD, &names(&["a b.txt"])),
            format!("/update/artifacts/{BUILD}/a%20b.txt")
        );
    }

    #[test]
    fn installer_url_prefers_plain_iso() {
        assert_eq!(
            installer_artifact_url(BUILD, &names(&["a.iso.zst", "b.ISO"])),
            format!("/update/artifacts/{BUILD}/installer/b.ISO")
        );
        assert_eq!(
            installer_artifact_url(BUILD, &names(&["a.iso.zst"])),
            format!("/update/artifacts/{BUILD}/installer/a.iso.zst")
        );
    }

    #[test]
    fn publishes_matching_artifacts_only() {
        let result = tempfile::tempdir().unwrap();
        let updates = tempfile::tempdir().unwrap();
        let layout = UpdatesLayout::new(updates.path());
        fs::write(result.path().join("fleet_v1.2.0.nix-store.raw"), "store").unwrap();
        fs::write(result.path().join("fleet_v1.2.0.efi"), "uki").unwrap();
        fs::set_permissions(
            result.path().join("fleet_v1.2.0.efi"),
            fs::Permissions::from_mode(0o444),
        )
        .unwrap();
        fs::write(result.path().join("SHA256SUMS"), "stale").unwrap();
        fs::write(result.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(result.path().join("dir_v1.efi")).unwrap();

        let url = publish_build_artifacts(result.path(), &layout, BUILD).unwrap();
        assert_eq!(
            url,
            format!("/update/artifacts/{BUILD}/fleet_v1.2.0.nix-store.raw")
        );

        let published = layout.build_dir(BUILD);
        let mut listed: Vec<String> = fs::read_dir(&published)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        listed.sort();
        assert_eq!(listed, ["fleet_v1.2.0.efi", "fleet_v1.2.0.nix-store.raw"]);
        assert_eq!(
            fs::metadata(published.join("fleet_v1.2.0.efi"))
                .unwrap()
                .permissions()
                .mode()
                & 0o777,
            0o444
        );
    }

    #[test]
    fn empty_or_unmatched_results_fail() {
        let result = tempfile::tempdir().unwrap();
        let updates = tempfile::tempdir().unwrap();
        let layout = UpdatesLayout::new(updates.path());

        let err = publish_build_artifacts(result.path(), &layout, BUILD).unwrap_err();
        assert_eq!(err.to_string(), "build produced no artifacts");

        fs::write(result.path().join("readme"), "x").unwrap();
        let err = publish_build_artifacts(result.path(), &layout, BUILD).unwrap_err();
        assert_eq!(
            err.to_string(),
            "build produced no artifacts matching update naming patterns"
        );
    }

    #[test]
    fn duplicate_installer_names_are_rejected_before_copying() {
        let result = tempfile::tempdir().unwrap();
        let updates = tempfile::tempdir().unwrap();
        let layout = UpdatesLayout::new(updates.path());
        for sub in ["a", "b"] {
            fs::create_dir(result.path().join(sub)).unwrap();
            fs::write(result.path().join(sub).join("installer.iso"), sub).unwrap();
        }

        let err = publish_installer_artifacts(result.path(), &layout, BUILD).unwrap_err();
        assert!(
            err.to_string()
                .contains("duplicate installer artifact filename installer.iso")
        );
        assert_eq!(
            fs::read_dir(layout.installer_dir(BUILD)).unwrap().count(),
            0
        );
    }

    #[test]
    fn publishes_installer_through_result_link() {
        let output = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let updates = tempfile::tempdir().unwrap();
        let layout = UpdatesLayout::new(updates.path());
        fs::create_dir(output.path().join("iso")).unwrap();
        fs::write(output.path().join("iso/fleet.iso"), "iso").unwrap();
        fs::write(output.path().join("iso/fleet.iso.zst"), "zst").unwrap();
        fs::write(output.path().join("nix-support"), "meta").unwrap();
        let result = workspace.path().join("result");
        symlink(output.path(), &result).unwrap();

        let url = publish_installer_artifacts(&result, &layout, BUILD).unwrap();
        assert_eq!(url, format!("/update/artifacts/{BUILD}/installer/fleet.iso"));
        assert_eq!(
            fs::read_to_string(layout.installer_dir(BUILD).join("fleet.iso.zst")).unwrap(),
            "zst"
        );
    }

    #[test]
    fn single_file_result_must_be_an_iso() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("disk.img");
        fs::write(&file, "x").unwrap();
        assert_eq!(
            collect_installer_artifacts(&file).unwrap_err().to_string(),
            "installer build result is not an ISO artifact"
        );
    }
}
