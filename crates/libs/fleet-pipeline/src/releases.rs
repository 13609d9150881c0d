//! Rolling releases out to a fleet and withdrawing them.

use fleet_models::release::{Release, ReleaseCreate, ReleaseStatus};
use fleet_models::rollout::{Rollout, RolloutStatus};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::Phase;
use crate::orchestrator::Pipeline;
use crate::prelude::*;

impl Pipeline {
    /// Publishes a build of `profile` as a release.
    ///
    /// Builds of other profiles are reported as not found. Without a version
    /// the release takes the build's own.
    pub fn create_release(&self, profile: Uuid, request: ReleaseCreate) -> Result<Release> {
        let build = self.store().fetch_build(&request.build_id)?;
        if build.profile_id != profile {
            return Err(fleet_models::error::Error::BuildNotFound.into());
        }

        let version = match request.version.trim() {
            "" => build.version,
            given => given.to_string(),
        };
        let release = self.store().create_release(ReleaseCreate {
            version,
            ..request
        })?;
        info!(
            "Created release {} ({}) of build {} on {}",
            release.id, release.version, build.id, release.channel
        );
        Ok(release)
    }

    /// Makes `release` the live software of `fleet`, all at once.
    ///
    /// The rollout is recorded `in_progress` before the artifacts are
    /// swapped in. Any failure after that point marks it `failed`.
    pub async fn deploy_release(&self, fleet: Uuid, release: Uuid) -> Result<Rollout> {
        let info = self.store().release_deployment_info(&release)?;
        if info.fleet_id != fleet {
            return Err(fleet_models::error::Error::RolloutFleetReleaseMismatch.into());
        }

        let rollout = self
            .store()
            .create_rollout(&fleet, &release, RolloutStatus::InProgress)?;
        info!(
            "Rolling out release {} ({}) to fleet {}",
            info.release_version, release, info.fleet_name
        );

        if let Err(err) = self.complete_rollout(&rollout, &info.build_id).await {
            error!("Rollout {} failed: {}", rollout.id, err);
            if let Err(err) = self
                .store()
                .update_rollout_status(&rollout.id, RolloutStatus::Failed)
            {
                error!("Failed to mark rollout {} as failed: {}", rollout.id, err);
            }
            return Err(err);
        }

        Ok(self.store().fetch_rollout(&rollout.id)?)
    }

    async fn complete_rollout(&self, rollout: &Rollout, build: &Uuid) -> Result<()> {
        self.activator()
            .activate(&rollout.fleet_id.to_string(), &build.to_string())
            .await
            .map_err(|err| err.in_phase(Phase::Activate))?;
        let devices = self
            .store()
            .set_fleet_desired_release(&rollout.fleet_id, &rollout.release_id)?;
        self.store()
            .update_rollout_status(&rollout.id, RolloutStatus::Completed)?;
        info!("Rollout {} completed for {} devices", rollout.id, devices);
        Ok(())
    }

    /// Withdraws a release, taking its fleet offline first if it is live.
    pub async fn withdraw_release(&self, release: Uuid) -> Result<()> {
        let info = self.store().release_takedown_info(&release)?;
        if info.is_currently_live {
            self.activator()
                .deactivate(&info.fleet_id.to_string())
                .await?;
        }
        self.store()
            .set_release_status(&release, ReleaseStatus::Withdrawn)?;
        info!(
            "Withdrew release {} of fleet {} (live: {})",
            release, info.fleet_name, info.is_currently_live
        );
        Ok(())
    }
}
