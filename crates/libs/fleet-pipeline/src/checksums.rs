//! `SHA256SUMS` manifests of a fleet's live artifacts.

use std::{
    fs::{self, File},
    io,
    path::Path,
};

use sha2::{Digest, Sha256};

use crate::layout::{CHECKSUM_MANIFEST_NAME, is_update_artifact_name};

/// Lowercase hex SHA-256 of a file's content.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Renders `<sha256>  <name>\n` for every update artifact directly inside `dir`,
/// sorted by name.
///
/// A missing directory surfaces as [`io::ErrorKind::NotFound`].
pub fn render_manifest(dir: &Path) -> io::Result<String> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == CHECKSUM_MANIFEST_NAME || !is_update_artifact_name(&name) {
            continue;
        }
        if entry.file_type()?.is_file() {
            names.push(name);
        }
    }
    names.sort();

    let mut manifest = String::new();
    for name in names {
        let digest = sha256_file(&dir.join(&name)).map_err(|err| {
            io::Error::new(err.kind(), format!("failed to checksum {name}: {err}"))
        })?;
        manifest.push_str(&digest);
        manifest.push_str("  ");
        manifest.push_str(&name);
        manifest.push('\n');
    }
    Ok(manifest)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lists_sorted_update_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fleet_v2.nix-store.raw"), "").unwrap();
        fs::write(dir.path().join("fleet_v2.efi"), "abc").unwrap();
        fs::write(dir.path().join("SHA256SUMS"), "stale").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("old_v1.efi")).unwrap();

        assert_eq!(
            render_manifest(dir.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  fleet_v2.efi\n\
             e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855  fleet_v2.nix-store.raw\n"
        );
    }

    #[test]
    fn empty_directory_renders_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(render_manifest(dir.path()).unwrap(), "");
    }

    #[test]
    fn missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = render_manifest(&dir.path().join("absent")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
