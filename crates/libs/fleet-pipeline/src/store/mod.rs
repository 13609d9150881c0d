//! Persistence seam of the pipeline.
//!
//! The orchestrator and the release operations only talk to a [`BuildStore`],
//! which the daemon implements over the PostgreSQL pool and tests implement
//! in memory with `MemoryStore` (behind the `test-util` feature).

#[cfg(any(test, feature = "test-util"))]
mod memory;

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;

use fleet_models::build::build_log::{BuildLogChunk, LogStream};
use fleet_models::build::build_status::{BuildStatus, InstallerStatus};
use fleet_models::build::{Build, BuildRequest, ExecutionMetadata};
use fleet_models::db::connection::DbConnection;
use fleet_models::device::Device;
use fleet_models::prelude::Result;
use fleet_models::release::{
    Release, ReleaseCreate, ReleaseDeploymentInfo, ReleaseStatus, ReleaseTakedownInfo,
};
use fleet_models::rollout::{Rollout, RolloutCreate, RolloutStatus};
use uuid::Uuid;

/// Everything the pipeline reads and writes.
pub trait BuildStore: Send + Sync {
    /// Validates and stores a new queued build.
    fn create_build(&self, request: BuildRequest) -> Result<Build>;
    fn fetch_build(&self, build: &Uuid) -> Result<Build>;
    fn execution_metadata(&self, build: &Uuid) -> Result<ExecutionMetadata>;
    fn update_build_status(&self, build: &Uuid, status: BuildStatus, artifact: &str)
    -> Result<()>;
    /// Queues the installer sub-build, clearing its previous logs.
    fn queue_installer(&self, build: &Uuid) -> Result<()>;
    fn update_installer_status(
        &self,
        build: &Uuid,
        status: InstallerStatus,
        artifact: &str,
    ) -> Result<()>;

    fn append_log_chunk(&self, build: &Uuid, stream: LogStream, chunk: &str) -> Result<()>;
    /// Chunks with an ID above `after`, oldest first.
    fn list_log_chunks(
        &self,
        build: &Uuid,
        stream: LogStream,
        after: i64,
        limit: i64,
    ) -> Result<Vec<BuildLogChunk>>;

    /// Marks interrupted builds failed. Returns how many were changed.
    fn fail_running_builds(&self) -> Result<usize>;
    fn fail_running_installers(&self) -> Result<usize>;

    /// Validates and stores a new active release.
    fn create_release(&self, release: ReleaseCreate) -> Result<Release>;
    fn release_deployment_info(&self, release: &Uuid) -> Result<ReleaseDeploymentInfo>;
    fn release_takedown_info(&self, release: &Uuid) -> Result<ReleaseTakedownInfo>;
    fn set_release_status(&self, release: &Uuid, status: ReleaseStatus) -> Result<()>;

    fn create_rollout(
        &self,
        fleet: &Uuid,
        release: &Uuid,
        initial: RolloutStatus,
    ) -> Result<Rollout>;
    fn fetch_rollout(&self, rollout: &Uuid) -> Result<Rollout>;
    fn update_rollout_status(&self, rollout: &Uuid, status: RolloutStatus) -> Result<()>;
    /// Points every device of the fleet at the release.
    fn set_fleet_desired_release(&self, fleet: &Uuid, release: &Uuid) -> Result<usize>;
}

impl BuildStore for DbConnection {
    fn create_build(&self, request: BuildRequest) -> Result<Build> {
        request.save(self)
    }

    fn fetch_build(&self, build: &Uuid) -> Result<Build> {
        Build::fetch_by_id(build, self)
    }

    fn execution_metadata(&self, build: &Uuid) -> Result<ExecutionMetadata> {
        Build::fetch_execution_metadata(build, self)
    }

    fn update_build_status(
        &self,
        build: &Uuid,
        status: BuildStatus,
        artifact: &str,
    ) -> Result<()> {
        Build::update_status(build, status, artifact, self)
    }

    fn queue_installer(&self, build: &Uuid) -> Result<()> {
        Build::queue_installer(build, self)
    }

    fn update_installer_status(
        &self,
        build: &Uuid,
        status: InstallerStatus,
        artifact: &str,
    ) -> Result<()> {
        Build::update_installer_status(build, status, artifact, self)
    }

    fn append_log_chunk(&self, build: &Uuid, stream: LogStream, chunk: &str) -> Result<()> {
        BuildLogChunk::append(build, stream, chunk, self)
    }

    fn list_log_chunks(
        &self,
        build: &Uuid,
        stream: LogStream,
        after: i64,
        limit: i64,
    ) -> Result<Vec<BuildLogChunk>> {
        BuildLogChunk::list_since(build, stream, after, limit, self)
    }

    fn fail_running_builds(&self) -> Result<usize> {
        Build::fail_running(self)
    }

    fn fail_running_installers(&self) -> Result<usize> {
        Build::fail_running_installers(self)
    }

    fn create_release(&self, release: ReleaseCreate) -> Result<Release> {
        release.save(self)
    }

    fn release_deployment_info(&self, release: &Uuid) -> Result<ReleaseDeploymentInfo> {
        Release::fetch_deployment_info(release, self)
    }

    fn release_takedown_info(&self, release: &Uuid) -> Result<ReleaseTakedownInfo> {
        Release::fetch_takedown_info(release, self)
    }

    fn set_release_status(&self, release: &Uuid, status: ReleaseStatus) -> Result<()> {
        Release::set_status(release, status, self)
    }

    fn create_rollout(
        &self,
        fleet: &Uuid,
        release: &Uuid,
        initial: RolloutStatus,
    ) -> Result<Rollout> {
        RolloutCreate {
            fleet_id: *fleet,
            release_id: *release,
        }
        .save(initial, self)
    }

    fn fetch_rollout(&self, rollout: &Uuid) -> Result<Rollout> {
        Rollout::fetch_by_id(rollout, self)
    }

    fn update_rollout_status(&self, rollout: &Uuid, status: RolloutStatus) -> Result<()> {
        Rollout::update_status(rollout, status, self)
    }

    fn set_fleet_desired_release(&self, fleet: &Uuid, release: &Uuid) -> Result<usize> {
        Device::set_fleet_desired_release(fleet, release, self)
    }
}
