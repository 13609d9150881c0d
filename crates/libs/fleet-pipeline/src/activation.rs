//! Swapping the artifact set a fleet's devices poll.

use std::{
    collections::HashMap,
    fs, io,
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{info, warn};

use crate::error::IoContext;
use crate::layout::{CHECKSUM_MANIFEST_NAME, UpdatesLayout, is_safe_path_segment, is_update_artifact_name};
use crate::prelude::*;
use crate::publish::{Artifact, copy_file};

type FleetLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Publishes builds to `updates/<fleet>` by staging a copy and renaming it
/// into place.
///
/// Activations of the same fleet are serialized; different fleets proceed
/// in parallel. A fleet's lock lives only while someone holds or awaits it.
#[derive(Debug)]
pub struct Activator {
    layout: UpdatesLayout,
    locks: FleetLocks,
}

/// A handle on one fleet's lock. The last handle removes the map entry.
struct FleetLock<'a> {
    locks: &'a FleetLocks,
    fleet_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for FleetLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.fleet_id);
        }
    }
}

impl Activator {
    pub fn new(layout: UpdatesLayout) -> Self {
        Self {
            layout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &UpdatesLayout {
        &self.layout
    }

    fn fleet_lock(&self, fleet_id: &str) -> FleetLock<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        FleetLock {
            locks: &self.locks,
            fleet_id: fleet_id.to_string(),
            lock: locks.entry(fleet_id.to_string()).or_default().clone(),
        }
    }

    #[cfg(test)]
    fn tracked_fleets(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Makes the published artifacts of `build_id` the live set of `fleet_id`.
    pub async fn activate(&self, fleet_id: &str, build_id: &str) -> Result<()> {
        let fleet_id = checked_segment(fleet_id, "fleet")?;
        let build_id = checked_segment(build_id, "build")?;

        let entry = self.fleet_lock(&fleet_id);
        let _guard = entry.lock.lock().await;

        let layout = self.layout.clone();
        let (fleet, build) = (fleet_id.clone(), build_id.clone());
        tokio::task::spawn_blocking(move || activate_blocking(&layout, &fleet, &build))
            .await
            .map_err(|err| Error::Task(err.to_string()))??;

        info!("Activated build {} for fleet {}", build_id, fleet_id);
        Ok(())
    }

    /// Removes the live set of `fleet_id`, if any.
    pub async fn deactivate(&self, fleet_id: &str) -> Result<()> {
        let fleet_id = checked_segment(fleet_id, "fleet")?;

        let entry = self.fleet_lock(&fleet_id);
        let _guard = entry.lock.lock().await;

        let target = self.layout.fleet_dir(&fleet_id);
        tokio::task::spawn_blocking(move || remove_dir_if_present(&target))
            .await
            .map_err(|err| Error::Task(err.to_string()))?
            .context(|| String::from("failed to clear current fleet artifacts"))?;

        info!("Deactivated fleet {}", fleet_id);
        Ok(())
    }
}

fn checked_segment(value: &str, kind: &'static str) -> Result<String> {
    if !is_safe_path_segment(value) {
        return Err(Error::InvalidIdentifier(kind));
    }
    Ok(value.trim().to_string())
}

fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Published primary artifacts of a build, sorted by name.
pub fn collect_published_artifacts(dir: &Path) -> Result<Vec<Artifact>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(Error::Artifacts(String::from("build artifacts not found")));
        }
        Err(err) => return Err(Error::io("failed to read build artifacts directory", err)),
    };

    let mut artifacts = Vec::new();
    for entry in entries {
        let entry = entry.context(|| String::from("failed to read build artifacts directory"))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == CHECKSUM_MANIFEST_NAME || !is_update_artifact_name(&name) {
            continue;
        }
        let metadata = entry
            .metadata()
            .context(|| format!("failed to read artifact metadata for {name}"))?;
        if !metadata.is_file() {
            continue;
        }
        artifacts.push(Artifact {
            path: entry.path(),
            mode: metadata.permissions().mode(),
            name,
        });
    }

    if artifacts.is_empty() {
        return Err(Error::Artifacts(String::from(
            "build artifacts directory contains no update artifacts",
        )));
    }
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(artifacts)
}

fn activate_blocking(layout: &UpdatesLayout, fleet_id: &str, build_id: &str) -> Result<()> {
    let artifacts = collect_published_artifacts(&layout.build_dir(build_id))?;

    // The staging directory is removed on drop until it has been renamed.
    let staging = tempfile::Builder::new()
        .prefix(&format!(".fleet-{fleet_id}-"))
        .tempdir_in(layout.root())
        .context(|| String::from("failed to create temporary fleet artifacts directory"))?;

    for artifact in &artifacts {
        copy_file(&artifact.path, &staging.path().join(&artifact.name), artifact.mode).context(
            || format!("failed to stage artifact {} for fleet rollout", artifact.name),
        )?;
    }

    let target = layout.fleet_dir(fleet_id);
    remove_dir_if_present(&target)
        .context(|| String::from("failed to clear current fleet artifacts"))?;

    let staged = staging.keep();
    if let Err(err) = fs::rename(&staged, &target) {
        if let Err(cleanup) = fs::remove_dir_all(&staged) {
            warn!(
                "Failed to remove staging directory {}: {}",
                staged.display(),
                cleanup
            );
        }
        return Err(Error::io("failed to activate fleet artifacts", err));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    const FLEET: &str = "0d3c5c4e-3c1f-4c7e-8f53-2f1b5a8f9d11";
    const BUILD_A: &str = "6f1f4f4e-8d4e-4a57-9a3e-0b7c0e1b2c3d";
    const BUILD_B: &str = "8a0b8bd3-77a1-4d55-9a4d-5d4f2bb8e0aa";

    fn publish(layout: &UpdatesLayout, build: &str, files: &[(&str, &str)]) {
        let dir = layout.build_dir(build);
        fs::create_dir_all(&dir).unwrap();
        for (name, content) in files {
            fs::write(dir.join(name), content).unwrap();
        }
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn activation_replaces_the_live_set() {
        let updates = tempfile::tempdir().unwrap();
        let layout = UpdatesLayout::new(updates.path());
        publish(&layout, BUILD_A, &[("os_v1.nix-store.raw", "a"), ("os_v1.efi", "a")]);
        publish(
            &layout,
            BUILD_B,
            &[("os_v2.nix-store.raw", "b"), ("SHA256SUMS", "x")],
        );
        fs::create_dir_all(layout.installer_dir(BUILD_B)).unwrap();
        let activator = Activator::new(layout.clone());

        activator.activate(FLEET, BUILD_A).await.unwrap();
        assert_eq!(
            listing(&layout.fleet_dir(FLEET)),
            ["os_v1.efi", "os_v1.nix-store.raw"]
        );

        activator.activate(FLEET, BUILD_B).await.unwrap();
        assert_eq!(listing(&layout.fleet_dir(FLEET)), ["os_v2.nix-store.raw"]);
        assert_eq!(
            fs::read_to_string(layout.fleet_dir(FLEET).join("os_v2.nix-store.raw")).unwrap(),
            "b"
        );
        assert!(
            listing(updates.path())
                .iter()
                .all(|name| !name.starts_with(".fleet-"))
        );
    }

    #[tokio::test]
    async fn failed_activation_keeps_the_live_set() {
        let updates = tempfile::tempdir().unwrap();
        let layout = UpdatesLayout::new(updates.path());
        publish(&layout, BUILD_A, &[("os_v1.nix-store.raw", "a")]);
        publish(&layout, BUILD_B, &[("readme.txt", "b")]);
        let activator = Activator::new(layout.clone());
        activator.activate(FLEET, BUILD_A).await.unwrap();

        let err = activator.activate(FLEET, BUILD_B).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "build artifacts directory contains no update artifacts"
        );
        let err = activator
            .activate(FLEET, "00000000-0000-0000-0000-000000000000")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "build artifacts not found");

        assert_eq!(listing(&layout.fleet_dir(FLEET)), ["os_v1.nix-store.raw"]);
    }

    #[tokio::test]
    async fn rejects_unsafe_identifiers() {
        let updates = tempfile::tempdir().unwrap();
        let activator = Activator::new(UpdatesLayout::new(updates.path()));
        let err = activator.activate("../etc", BUILD_A).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid fleet identifier");
        let err = activator.activate(FLEET, "a/b").await.unwrap_err();
        assert_eq!(err.to_string(), "invalid build identifier");
        assert!(activator.deactivate("").await.is_err());
    }

    #[tokio::test]
    async fn deactivation_removes_the_live_set() {
        let updates = tempfile::tempdir().unwrap();
        let layout = UpdatesLayout::new(updates.path());
        publish(&layout, BUILD_A, &[("os_v1.nix-store.raw", "a")]);
        let activator = Activator::new(layout.clone());
        activator.activate(FLEET, BUILD_A).await.unwrap();

        activator.deactivate(FLEET).await.unwrap();
        assert!(!layout.fleet_dir(FLEET).exists());
        activator.deactivate(FLEET).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_activations_of_one_fleet_are_serialized() {
        let updates = tempfile::tempdir().unwrap();
        let layout = UpdatesLayout::new(updates.path());
        publish(&layout, BUILD_A, &[("os_v1.nix-store.raw", "a")]);
        publish(&layout, BUILD_B, &[("os_v2.nix-store.raw", "b")]);
        let activator = Arc::new(Activator::new(layout.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let activator = activator.clone();
                let build = if i % 2 == 0 { BUILD_A } else { BUILD_B };
                tokio::spawn(async move { activator.activate(FLEET, build).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(listing(&layout.fleet_dir(FLEET)).len(), 1);
        assert_eq!(activator.tracked_fleets(), 0);
    }

    #[tokio::test]
    async fn fleet_locks_are_released_after_use() {
        let updates = tempfile::tempdir().unwrap();
        let layout = UpdatesLayout::new(updates.path());
        publish(&layout, BUILD_A, &[("os_v1.nix-store.raw", "a")]);
        let activator = Activator::new(layout.clone());

        activator.activate(FLEET, BUILD_A).await.unwrap();
        assert_eq!(activator.tracked_fleets(), 0);
        assert!(activator.activate(FLEET, BUILD_B).await.is_err());
        assert_eq!(activator.tracked_fleets(), 0);
        activator.deactivate(FLEET).await.unwrap();
        assert_eq!(activator.tracked_fleets(), 0);

        let held = activator.fleet_lock(FLEET);
        let second = activator.fleet_lock(FLEET);
        drop(held);
        assert_eq!(activator.tracked_fleets(), 1);
        drop(second);
        assert_eq!(activator.tracked_fleets(), 0);
    }
}
