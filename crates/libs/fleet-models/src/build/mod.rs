//! Builds: one attempt to compile a profile revision into an image for one fleet.

pub mod build_log;
pub mod build_status;

use crate::db::connection::DbConnection;
use crate::prelude::*;
use crate::profile::{Profile, ProfileRevision};
use crate::schema::builds::dsl::*;
use crate::schema::{build_installer_log_chunks, profile_revisions};
use crate::{fleet::Fleet, is_semantic_version};
use build_status::{BuildStatus, InstallerStatus};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A build record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, PartialEq, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::builds)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Build {
    pub id: Uuid,
    pub profile_id: Uuid,
    /// Profile revision captured when the build was submitted.
    pub profile_revision_id: Uuid,
    pub fleet_id: Uuid,
    /// Version label embedded into the image.
    pub version: String,
    pub status: String,
    /// Canonical artifact URL, empty unless the build succeeded.
    pub artifact_path: String,
    pub installer_status: String,
    pub installer_artifact_path: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub installer_started_at: Option<DateTime<Utc>>,
    pub installer_finished_at: Option<DateTime<Utc>>,
}

/// A request to build a profile for a fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub profile_id: Uuid,
    pub fleet_id: Uuid,
    pub version: String,
}

/// Inputs the pipeline needs to execute a build.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionMetadata {
    /// Configuration JSON of the captured profile revision.
    pub config_json: String,
    pub fleet_id: Uuid,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::builds)]
struct BuildCreate<'a> {
    profile_id: Uuid,
    profile_revision_id: Uuid,
    fleet_id: Uuid,
    version: &'a str,
    status: &'a str,
    artifact_path: &'a str,
}

impl BuildRequest {
    /// Checks the version label and returns it trimmed.
    pub fn validated_version(&self) -> Result<&str> {
        let trimmed = self.version.trim();
        if trimmed.is_empty() {
            return Err(Error::VersionRequired);
        }
        if !is_semantic_version(trimmed) {
            return Err(Error::VersionMustBeSemver);
        }
        Ok(trimmed)
    }

    /// Validates the request and stores a new `queued` build.
    pub fn save(self, connection: &DbConnection) -> Result<Build> {
        let label = self.validated_version()?;

        if !Profile::exists(&self.profile_id, connection)? {
            return Err(Error::ProfileNotFound);
        }
        if !Fleet::exists(&self.fleet_id, connection)? {
            return Err(Error::FleetNotFound);
        }
        if !Profile::is_assigned_to(&self.profile_id, &self.fleet_id, connection)? {
            return Err(Error::ProfileNotAssignedToFleet);
        }
        let revision = ProfileRevision::fetch_latest(&self.profile_id, connection)?;

        let conn = &mut connection.pool.get()?;
        let created = diesel::insert_into(builds)
            .values(&BuildCreate {
                profile_id: self.profile_id,
                profile_revision_id: revision.id,
                fleet_id: self.fleet_id,
                version: label,
                status: BuildStatus::Queued.as_str(),
                artifact_path: "",
            })
            .returning(Build::as_returning())
            .get_result(conn);

        match created {
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(Error::BuildVersionAlreadyExists)
            }
            other => Ok(other?),
        }
    }
}

impl Build {
    /// Parsed primary build status.
    pub fn build_status(&self) -> Result<BuildStatus> {
        self.status.parse()
    }

    /// Parsed installer status.
    pub fn installer_state(&self) -> Result<InstallerStatus> {
        self.installer_status.parse()
    }

    /// Fetches a build by its ID.
    pub fn fetch_by_id(target: &Uuid, connection: &DbConnection) -> Result<Self> {
        let conn = &mut connection.pool.get()?;
        Build::by_id(target)
            .select(Build::as_select())
            .get_result(conn)
            .optional()?
            .ok_or(Error::BuildNotFound)
    }

    /// Loads the profile configuration and fleet the build executes with.
    pub fn fetch_execution_metadata(
        target: &Uuid,
        connection: &DbConnection,
    ) -> Result<ExecutionMetadata> {
        let conn = &mut connection.pool.get()?;
        let (config, fleet): (String, Uuid) = Build::by_id(target)
            .inner_join(profile_revisions::table)
            .select((profile_revisions::config_json, fleet_id))
            .get_result(conn)
            .optional()?
            .ok_or(Error::BuildNotFound)?;

        Ok(ExecutionMetadata {
            config_json: config,
            fleet_id: fleet,
        })
    }

    /// Persists a primary status transition.
    ///
    /// `started_at` is stamped on the first transition to running and
    /// `finished_at` on every terminal transition. The artifact is kept only
    /// for `succeeded`, which requires one.
    pub fn update_status(
        target: &Uuid,
        new_status: BuildStatus,
        artifact: &str,
        connection: &DbConnection,
    ) -> Result<()> {
        let artifact = artifact.trim();
        let artifact = match new_status {
            BuildStatus::Succeeded if artifact.is_empty() => return Err(Error::MissingArtifact),
            BuildStatus::Succeeded => artifact,
            _ => "",
        };

        let conn = &mut connection.pool.get()?;
        conn.transaction::<_, Error, _>(|conn| {
            let current: Build = Build::by_id(target)
                .for_update()
                .select(Build::as_select())
                .get_result(conn)
                .optional()?
                .ok_or(Error::BuildNotFound)?;

            let now = Utc::now();
            let started = match (new_status, current.started_at) {
                (BuildStatus::Running, None) => Some(now),
                (_, previous) => previous,
            };
            let finished = if new_status.is_terminal() {
                Some(now)
            } else {
                current.finished_at
            };

            diesel::update(Build::by_id(target))
                .set((
                    status.eq(new_status.as_str()),
                    artifact_path.eq(artifact),
                    started_at.eq(started),
                    finished_at.eq(finished),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Queues an installer sub-build, clearing its previous logs and result.
    pub fn queue_installer(target: &Uuid, connection: &DbConnection) -> Result<()> {
        let conn = &mut connection.pool.get()?;
        conn.transaction::<_, Error, _>(|conn| {
            let current: Build = Build::by_id(target)
                .for_update()
                .select(Build::as_select())
                .get_result(conn)
                .optional()?
                .ok_or(Error::BuildNotFound)?;

            if current.build_status()? != BuildStatus::Succeeded {
                return Err(Error::BuildNotReadyForInstaller);
            }
            if current.installer_state()?.is_active() {
                return Err(Error::InstallerAlreadyQueued);
            }

            diesel::delete(
                build_installer_log_chunks::table
                    .filter(build_installer_log_chunks::build_id.eq(target)),
            )
            .execute(conn)?;

            diesel::update(Build::by_id(target))
                .set((
                    installer_status.eq(InstallerStatus::Queued.as_str()),
                    installer_artifact_path.eq(""),
                    installer_started_at.eq(None::<DateTime<Utc>>),
                    installer_finished_at.eq(None::<DateTime<Utc>>),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Persists an installer status transition.
    pub fn update_installer_status(
        target: &Uuid,
        new_status: InstallerStatus,
        artifact: &str,
        connection: &DbConnection,
    ) -> Result<()> {
        let artifact = artifact.trim();
        let artifact = match new_status {
            InstallerStatus::Succeeded if artifact.is_empty() => {
                return Err(Error::MissingArtifact);
            }
            InstallerStatus::Succeeded => artifact,
            _ => "",
        };

        let conn = &mut connection.pool.get()?;
        conn.transaction::<_, Error, _>(|conn| {
            let current: Build = Build::by_id(target)
                .for_update()
                .select(Build::as_select())
                .get_result(conn)
                .optional()?
                .ok_or(Error::BuildNotFound)?;

            let now = Utc::now();
            let started = match new_status {
                InstallerStatus::Running => current.installer_started_at.or(Some(now)),
                InstallerStatus::Queued => None,
                _ => current.installer_started_at,
            };
            let finished = match new_status {
                InstallerStatus::Succeeded | InstallerStatus::Failed => Some(now),
                InstallerStatus::Queued | InstallerStatus::Running => None,
                InstallerStatus::NotRequested => current.installer_finished_at,
            };

            diesel::update(Build::by_id(target))
                .set((
                    installer_status.eq(new_status.as_str()),
                    installer_artifact_path.eq(artifact),
                    installer_started_at.eq(started),
                    installer_finished_at.eq(finished),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Marks every running build as failed. Returns how many were changed.
    pub fn fail_running(connection: &DbConnection) -> Result<usize> {
        let conn = &mut connection.pool.get()?;
        Ok(
            diesel::update(builds.filter(status.eq(BuildStatus::Running.as_str())))
                .set((
                    status.eq(BuildStatus::Failed.as_str()),
                    artifact_path.eq(""),
                    finished_at.eq(Some(Utc::now())),
                ))
                .execute(conn)?,
        )
    }

    /// Marks every running installer sub-build as failed.
    pub fn fail_running_installers(connection: &DbConnection) -> Result<usize> {
        let conn = &mut connection.pool.get()?;
        Ok(diesel::update(
            builds.filter(installer_status.eq(InstallerStatus::Running.as_str())),
        )
        .set((
            installer_status.eq(InstallerStatus::Failed.as_str()),
            installer_artifact_path.eq(""),
            installer_finished_at.eq(Some(Utc::now())),
        ))
        .execute(conn)?)
    }

    /// Returns a query filtered by build ID.
    #[diesel::dsl::auto_type(no_type_alias)]
    pub fn by_id(target: &Uuid) -> _ {
        crate::schema::builds::dsl::builds.filter(id.eq(target))
    }
}
