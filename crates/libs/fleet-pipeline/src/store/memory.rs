use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use chrono::Utc;
use fleet_models::build::build_log::{BuildLogChunk, DEFAULT_PAGE_SIZE, LogStream, MAX_PAGE_SIZE};
use fleet_models::build::build_status::{BuildStatus, InstallerStatus};
use fleet_models::build::{Build, BuildRequest, ExecutionMetadata};
use fleet_models::prelude::{Error, Result};
use fleet_models::release::{
    Release, ReleaseCreate, ReleaseDeploymentInfo, ReleaseStatus, ReleaseTakedownInfo,
};
use fleet_models::rollout::{Rollout, RolloutStatus, STRATEGY_ALL_AT_ONCE};
use uuid::Uuid;

use super::BuildStore;

#[derive(Default)]
struct ProfileEntry {
    fleets: Vec<Uuid>,
    /// Revision IDs with their configuration, oldest first.
    revisions: Vec<(Uuid, String)>,
}

#[derive(Default)]
struct State {
    fleets: HashMap<Uuid, String>,
    profiles: HashMap<Uuid, ProfileEntry>,
    builds: HashMap<Uuid, Build>,
    logs: Vec<(LogStream, BuildLogChunk)>,
    next_chunk_id: i64,
    releases: HashMap<Uuid, Release>,
    rollouts: Vec<Rollout>,
    devices: HashMap<Uuid, (Uuid, Option<Uuid>)>,
    fail_log_appends: bool,
    append_threads: Vec<ThreadId>,
    panic_on_metadata: bool,
}

/// A [`BuildStore`] kept entirely in memory, with the same rules as the
/// database implementation.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_fleet(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state().fleets.insert(id, name.to_string());
        id
    }

    /// Adds a profile with one revision, assigned to the given fleets.
    pub fn add_profile(&self, config_json: &str, fleets: &[Uuid]) -> Uuid {
        let id = Uuid::new_v4();
        self.state().profiles.insert(
            id,
            ProfileEntry {
                fleets: fleets.to_vec(),
                revisions: vec![(Uuid::new_v4(), config_json.to_string())],
            },
        );
        id
    }

    /// Adds an active release of a build on the default channel.
    pub fn add_release(&self, build: &Uuid, version: &str) -> Result<Release> {
        self.create_release(ReleaseCreate {
            build_id: *build,
            channel: String::new(),
            version: version.to_string(),
            notes: String::new(),
        })
    }

    pub fn add_device(&self, fleet: &Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.state().devices.insert(id, (*fleet, None));
        id
    }

    pub fn device_desired_release(&self, device: &Uuid) -> Option<Uuid> {
        self.state()
            .devices
            .get(device)
            .and_then(|(_, release)| *release)
    }

    pub fn release(&self, release: &Uuid) -> Result<Release> {
        self.state()
            .releases
            .get(release)
            .cloned()
            .ok_or(Error::ReleaseNotFound)
    }

    /// Rollouts of a fleet, oldest first.
    pub fn rollouts(&self, fleet: &Uuid) -> Vec<Rollout> {
        self.state()
            .rollouts
            .iter()
            .filter(|rollout| &rollout.fleet_id == fleet)
            .cloned()
            .collect()
    }

    /// The whole stored log of a stream.
    pub fn log_text(&self, build: &Uuid, stream: LogStream) -> String {
        self.state()
            .logs
            .iter()
            .filter(|(s, chunk)| *s == stream && &chunk.build_id == build)
            .map(|(_, chunk)| chunk.chunk.as_str())
            .collect()
    }

    /// Makes every following log append fail.
    pub fn fail_log_appends(&self, fail: bool) {
        self.state().fail_log_appends = fail;
    }

    /// Threads that appended log chunks, in append order.
    pub fn log_append_threads(&self) -> Vec<ThreadId> {
        self.state().append_threads.clone()
    }

    /// Makes reading execution metadata panic.
    pub fn panic_on_execution_metadata(&self, panic: bool) {
        self.state().panic_on_metadata = panic;
    }
}

fn build_mut<'a>(state: &'a mut State, build: &Uuid) -> Result<&'a mut Build> {
    state.builds.get_mut(build).ok_or(Error::BuildNotFound)
}

fn release_fleet(state: &State, release: &Release) -> Result<Uuid> {
    state
        .builds
        .get(&release.build_id)
        .map(|build| build.fleet_id)
        .ok_or(Error::BuildNotFound)
}

impl BuildStore for MemoryStore {
    fn create_build(&self, request: BuildRequest) -> Result<Build> {
        let version = request.validated_version()?.to_string();
        let mut state = self.state();
        let profile = state
            .profiles
            .get(&request.profile_id)
            .ok_or(Error::ProfileNotFound)?;
        if !state.fleets.contains_key(&request.fleet_id) {
            return Err(Error::FleetNotFound);
        }
        if !profile.fleets.contains(&request.fleet_id) {
            return Err(Error::ProfileNotAssignedToFleet);
        }
        let (revision, _) = profile
            .revisions
            .last()
            .ok_or(Error::ProfileHasNoRevisions)?;
        let revision = *revision;
        if state.builds.values().any(|build| {
            build.profile_id == request.profile_id
                && build.fleet_id == request.fleet_id
                && build.version == version
        }) {
            return Err(Error::BuildVersionAlreadyExists);
        }

        let build = Build {
            id: Uuid::new_v4(),
            profile_id: request.profile_id,
            profile_revision_id: revision,
            fleet_id: request.fleet_id,
            version,
            status: BuildStatus::Queued.as_str().to_string(),
            artifact_path: String::new(),
            installer_status: InstallerStatus::NotRequested.as_str().to_string(),
            installer_artifact_path: String::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            installer_started_at: None,
            installer_finished_at: None,
        };
        state.builds.insert(build.id, build.clone());
        Ok(build)
    }

    fn fetch_build(&self, build: &Uuid) -> Result<Build> {
        self.state()
            .builds
            .get(build)
            .cloned()
            .ok_or(Error::BuildNotFound)
    }

    fn execution_metadata(&self, build: &Uuid) -> Result<ExecutionMetadata> {
        let state = self.state();
        if state.panic_on_metadata {
            drop(state);
            panic!("execution metadata unavailable");
        }
        let build = state.builds.get(build).ok_or(Error::BuildNotFound)?;
        let config_json = state
            .profiles
            .get(&build.profile_id)
            .and_then(|profile| {
                profile
                    .revisions
                    .iter()
                    .find(|(id, _)| *id == build.profile_revision_id)
            })
            .map(|(_, config)| config.clone())
            .ok_or(Error::BuildNotFound)?;
        Ok(ExecutionMetadata {
            config_json,
            fleet_id: build.fleet_id,
        })
    }

    fn update_build_status(
        &self,
        build: &Uuid,
        status: BuildStatus,
        artifact: &str,
    ) -> Result<()> {
        let artifact = artifact.trim();
        let artifact = match status {
            BuildStatus::Succeeded if artifact.is_empty() => return Err(Error::MissingArtifact),
            BuildStatus::Succeeded => artifact,
            _ => "",
        };

        let mut state = self.state();
        let current = build_mut(&mut state, build)?;
        let now = Utc::now();
        if status == BuildStatus::Running && current.started_at.is_none() {
            current.started_at = Some(now);
        }
        if status.is_terminal() {
            current.finished_at = Some(now);
        }
        current.status = status.as_str().to_string();
        current.artifact_path = artifact.to_string();
        Ok(())
    }

    fn queue_installer(&self, build: &Uuid) -> Result<()> {
        let mut state = self.state();
        let current = build_mut(&mut state, build)?;
        if current.build_status()? != BuildStatus::Succeeded {
            return Err(Error::BuildNotReadyForInstaller);
        }
        if current.installer_state()?.is_active() {
            return Err(Error::InstallerAlreadyQueued);
        }
        current.installer_status = InstallerStatus::Queued.as_str().to_string();
        current.installer_artifact_path.clear();
        current.installer_started_at = None;
        current.installer_finished_at = None;
        state
            .logs
            .retain(|(stream, chunk)| !(*stream == LogStream::Installer && &chunk.build_id == build));
        Ok(())
    }

    fn update_installer_status(
        &self,
        build: &Uuid,
        status: InstallerStatus,
        artifact: &str,
    ) -> Result<()> {
        let artifact = artifact.trim();
        let artifact = match status {
            InstallerStatus::Succeeded if artifact.is_empty() => {
                return Err(Error::MissingArtifact);
            }
            InstallerStatus::Succeeded => artifact,
            _ => "",
        };

        let mut state = self.state();
        let current = build_mut(&mut state, build)?;
        let now = Utc::now();
        match status {
            InstallerStatus::Running => {
                current.installer_started_at = current.installer_started_at.or(Some(now));
                current.installer_finished_at = None;
            }
            InstallerStatus::Queued => {
                current.installer_started_at = None;
                current.installer_finished_at = None;
            }
            InstallerStatus::Succeeded | InstallerStatus::Failed => {
                current.installer_finished_at = Some(now);
            }
            InstallerStatus::NotRequested => {}
        }
        current.installer_status = status.as_str().to_string();
        current.installer_artifact_path = artifact.to_string();
        Ok(())
    }

    fn append_log_chunk(&self, build: &Uuid, stream: LogStream, chunk: &str) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let mut state = self.state();
        if state.fail_log_appends {
            return Err(Error::Diesel(diesel_unavailable()));
        }
        if !state.builds.contains_key(build) {
            return Err(Error::BuildNotFound);
        }
        state.append_threads.push(thread::current().id());
        state.next_chunk_id += 1;
        let id = state.next_chunk_id;
        state.logs.push((
            stream,
            BuildLogChunk {
                id,
                build_id: *build,
                chunk: chunk.to_string(),
            },
        ));
        Ok(())
    }

    fn list_log_chunks(
        &self,
        build: &Uuid,
        stream: LogStream,
        after: i64,
        limit: i64,
    ) -> Result<Vec<BuildLogChunk>> {
        let limit = match limit {
            l if l <= 0 => DEFAULT_PAGE_SIZE,
            l => l.min(MAX_PAGE_SIZE),
        };
        let after = after.max(0);
        Ok(self
            .state()
            .logs
            .iter()
            .filter(|(s, chunk)| *s == stream && &chunk.build_id == build && chunk.id > after)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }

    fn fail_running_builds(&self) -> Result<usize> {
        let mut state = self.state();
        let now = Utc::now();
        let mut changed = 0;
        for build in state.builds.values_mut() {
            if build.status == BuildStatus::Running.as_str() {
                build.status = BuildStatus::Failed.as_str().to_string();
                build.artifact_path.clear();
                build.finished_at = Some(now);
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn fail_running_installers(&self) -> Result<usize> {
        let mut state = self.state();
        let now = Utc::now();
        let mut changed = 0;
        for build in state.builds.values_mut() {
            if build.installer_status == InstallerStatus::Running.as_str() {
                build.installer_status = InstallerStatus::Failed.as_str().to_string();
                build.installer_artifact_path.clear();
                build.installer_finished_at = Some(now);
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn create_release(&self, release: ReleaseCreate) -> Result<Release> {
        let release = release.validated()?;
        let mut state = self.state();
        if !state.builds.contains_key(&release.build_id) {
            return Err(Error::BuildNotFound);
        }
        if state
            .releases
            .values()
            .any(|existing| {
                existing.build_id == release.build_id && existing.version == release.version
            })
        {
            return Err(Error::ReleaseVersionAlreadyExists);
        }
        let created = Release {
            id: Uuid::new_v4(),
            build_id: release.build_id,
            channel: release.channel,
            version: release.version,
            notes: release.notes,
            status: ReleaseStatus::Active.as_str().to_string(),
            published_at: Utc::now(),
        };
        state.releases.insert(created.id, created.clone());
        Ok(created)
    }

    fn release_deployment_info(&self, release: &Uuid) -> Result<ReleaseDeploymentInfo> {
        let state = self.state();
        let release = state.releases.get(release).ok_or(Error::ReleaseNotFound)?;
        if release.release_status()? == ReleaseStatus::Withdrawn {
            return Err(Error::ReleaseWithdrawn);
        }
        let fleet_id = release_fleet(&state, release)?;
        Ok(ReleaseDeploymentInfo {
            release_id: release.id,
            release_version: release.version.clone(),
            build_id: release.build_id,
            fleet_id,
            fleet_name: state.fleets.get(&fleet_id).cloned().unwrap_or_default(),
        })
    }

    fn release_takedown_info(&self, release: &Uuid) -> Result<ReleaseTakedownInfo> {
        let state = self.state();
        let release = state.releases.get(release).ok_or(Error::ReleaseNotFound)?;
        let fleet_id = release_fleet(&state, release)?;
        let live = state
            .rollouts
            .iter()
            .filter(|rollout| {
                rollout.fleet_id == fleet_id
                    && rollout.status == RolloutStatus::Completed.as_str()
            })
            .max_by_key(|rollout| (rollout.completed_at, rollout.created_at))
            .map(|rollout| rollout.release_id);
        Ok(ReleaseTakedownInfo {
            release_id: release.id,
            build_id: release.build_id,
            fleet_id,
            fleet_name: state.fleets.get(&fleet_id).cloned().unwrap_or_default(),
            status: release.status.clone(),
            is_currently_live: live == Some(release.id),
        })
    }

    fn set_release_status(&self, release: &Uuid, status: ReleaseStatus) -> Result<()> {
        let mut state = self.state();
        let release = state
            .releases
            .get_mut(release)
            .ok_or(Error::ReleaseNotFound)?;
        release.status = status.as_str().to_string();
        Ok(())
    }

    fn create_rollout(
        &self,
        fleet: &Uuid,
        release: &Uuid,
        initial: RolloutStatus,
    ) -> Result<Rollout> {
        let mut state = self.state();
        let record = state.releases.get(release).ok_or(Error::ReleaseNotFound)?;
        if record.release_status()? == ReleaseStatus::Withdrawn {
            return Err(Error::ReleaseWithdrawn);
        }
        if &release_fleet(&state, record)? != fleet {
            return Err(Error::RolloutFleetReleaseMismatch);
        }

        let now = Utc::now();
        let started = matches!(
            initial,
            RolloutStatus::InProgress | RolloutStatus::Completed | RolloutStatus::Failed
        );
        let finished = matches!(initial, RolloutStatus::Completed | RolloutStatus::Failed);
        let rollout = Rollout {
            id: Uuid::new_v4(),
            fleet_id: *fleet,
            release_id: *release,
            strategy: STRATEGY_ALL_AT_ONCE.to_string(),
            stage_percent: 100,
            status: initial.as_str().to_string(),
            started_at: started.then_some(now),
            completed_at: finished.then_some(now),
            created_at: now,
        };
        state.rollouts.push(rollout.clone());
        Ok(rollout)
    }

    fn fetch_rollout(&self, rollout: &Uuid) -> Result<Rollout> {
        self.state()
            .rollouts
            .iter()
            .find(|r| &r.id == rollout)
            .cloned()
            .ok_or(Error::RolloutNotFound)
    }

    fn update_rollout_status(&self, rollout: &Uuid, status: RolloutStatus) -> Result<()> {
        let mut state = self.state();
        let current = state
            .rollouts
            .iter_mut()
            .find(|r| &r.id == rollout)
            .ok_or(Error::RolloutNotFound)?;
        let now = Utc::now();
        current.started_at = match status {
            RolloutStatus::Planned => None,
            RolloutStatus::Paused => current.started_at,
            _ => current.started_at.or(Some(now)),
        };
        current.completed_at =
            matches!(status, RolloutStatus::Completed | RolloutStatus::Failed).then_some(now);
        current.status = status.as_str().to_string();
        Ok(())
    }

    fn set_fleet_desired_release(&self, fleet: &Uuid, release: &Uuid) -> Result<usize> {
        let mut state = self.state();
        let mut changed = 0;
        for (device_fleet, desired) in state.devices.values_mut() {
            if device_fleet == fleet {
                *desired = Some(*release);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

fn diesel_unavailable() -> diesel::result::Error {
    diesel::result::Error::BrokenTransactionManager
}
