//! Releases: published builds that can be rolled out to a fleet.

use std::{fmt::Display, str::FromStr};

use crate::db::connection::DbConnection;
use crate::is_semantic_version;
use crate::prelude::*;
use crate::rollout::RolloutStatus;
use crate::schema::releases::dsl::*;
use crate::schema::{builds, rollouts};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel assigned when a release is created without one.
pub const DEFAULT_CHANNEL: &str = "stable";

/// Whether a release may still be deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Active,
    Withdrawn,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Active => "active",
            ReleaseStatus::Withdrawn => "withdrawn",
        }
    }
}

impl FromStr for ReleaseStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ReleaseStatus::Active),
            "withdrawn" => Ok(ReleaseStatus::Withdrawn),
            _ => Err(Error::InvalidStatus(value.to_string())),
        }
    }
}

impl Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A release record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, PartialEq, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::releases)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Release {
    pub id: Uuid,
    pub build_id: Uuid,
    pub channel: String,
    pub version: String,
    pub notes: String,
    pub status: String,
    pub published_at: DateTime<Utc>,
}

/// Data for creating a new release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseCreate {
    pub build_id: Uuid,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub notes: String,
}

/// What withdrawing a release affects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseTakedownInfo {
    pub release_id: Uuid,
    pub build_id: Uuid,
    pub fleet_id: Uuid,
    pub fleet_name: String,
    pub status: String,
    /// Whether the fleet's most recent completed rollout delivered this release.
    pub is_currently_live: bool,
}

/// What deploying a release needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseDeploymentInfo {
    pub release_id: Uuid,
    pub release_version: String,
    pub build_id: Uuid,
    pub fleet_id: Uuid,
    pub fleet_name: String,
}

impl ReleaseCreate {
    /// Trims every field, checks the version and defaults the channel.
    pub fn validated(self) -> Result<Self> {
        let label = self.version.trim();
        if label.is_empty() {
            return Err(Error::VersionRequired);
        }
        if !is_semantic_version(label) {
            return Err(Error::VersionMustBeSemver);
        }
        let lane = match self.channel.trim().to_ascii_lowercase() {
            lane if lane.is_empty() => DEFAULT_CHANNEL.to_string(),
            lane => lane,
        };
        Ok(Self {
            build_id: self.build_id,
            channel: lane,
            version: label.to_string(),
            notes: self.notes.trim().to_string(),
        })
    }

    /// Validates and saves the release.
    pub fn save(self, connection: &DbConnection) -> Result<Release> {
        let release = self.validated()?;

        let conn = &mut connection.pool.get()?;
        let created = diesel::insert_into(releases)
            .values((
                build_id.eq(release.build_id),
                channel.eq(release.channel),
                version.eq(release.version),
                notes.eq(release.notes),
            ))
            .returning(Release::as_returning())
            .get_result(conn);

        match created {
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(Error::ReleaseVersionAlreadyExists)
            }
            Err(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => {
                Err(Error::BuildNotFound)
            }
            other => Ok(other?),
        }
    }
}

impl Release {
    /// Parsed release status.
    pub fn release_status(&self) -> Result<ReleaseStatus> {
        self.status.parse()
    }

    /// Fetches a release by its ID.
    pub fn fetch_by_id(target: &Uuid, connection: &DbConnection) -> Result<Self> {
        let conn = &mut connection.pool.get()?;
        Release::by_id(target)
            .select(Release::as_select())
            .get_result(conn)
            .optional()?
            .ok_or(Error::ReleaseNotFound)
    }

    /// Sets the release status.
    pub fn set_status(
        target: &Uuid,
        new_status: ReleaseStatus,
        connection: &DbConnection,
    ) -> Result<()> {
        let conn = &mut connection.pool.get()?;
        let updated = diesel::update(Release::by_id(target))
            .set(status.eq(new_status.as_str()))
            .execute(conn)?;
        if updated == 0 {
            return Err(Error::ReleaseNotFound);
        }
        Ok(())
    }

    /// Resolves the fleet a release belongs to and whether it is live there.
    pub fn fetch_takedown_info(
        target: &Uuid,
        connection: &DbConnection,
    ) -> Result<ReleaseTakedownInfo> {
        let conn = &mut connection.pool.get()?;
        let (release, build, fleet, fleet_name, current): (Uuid, Uuid, Uuid, String, String) =
            Release::by_id(target)
                .inner_join(builds::table.inner_join(crate::schema::fleets::table))
                .select((
                    id,
                    builds::id,
                    crate::schema::fleets::id,
                    crate::schema::fleets::name,
                    status,
                ))
                .get_result(conn)
                .optional()?
                .ok_or(Error::ReleaseNotFound)?;

        let live: Option<Uuid> = rollouts::table
            .filter(rollouts::fleet_id.eq(fleet))
            .filter(rollouts::status.eq(RolloutStatus::Completed.as_str()))
            .order((
                rollouts::completed_at.desc().nulls_last(),
                rollouts::created_at.desc(),
            ))
            .select(rollouts::release_id)
            .first(conn)
            .optional()?;

        Ok(ReleaseTakedownInfo {
            release_id: release,
            build_id: build,
            fleet_id: fleet,
            fleet_name,
            status: current,
            is_currently_live: live == Some(release),
        })
    }

    /// Resolves what deploying a release needs. Withdrawn releases are refused.
    pub fn fetch_deployment_info(
        target: &Uuid,
        connection: &DbConnection,
    ) -> Result<ReleaseDeploymentInfo> {
        let conn = &mut connection.pool.get()?;
        let (release, label, current, build, fleet, fleet_name): (
            Uuid,
            String,
            String,
            Uuid,
            Uuid,
            String,
        ) = Release::by_id(target)
            .inner_join(builds::table.inner_join(crate::schema::fleets::table))
            .select((
                id,
                version,
                status,
                builds::id,
                crate::schema::fleets::id,
                crate::schema::fleets::name,
            ))
            .get_result(conn)
            .optional()?
            .ok_or(Error::ReleaseNotFound)?;

        if current.parse::<ReleaseStatus>()? == ReleaseStatus::Withdrawn {
            return Err(Error::ReleaseWithdrawn);
        }

        Ok(ReleaseDeploymentInfo {
            release_id: release,
            release_version: label,
            build_id: build,
            fleet_id: fleet,
            fleet_name,
        })
    }

    /// Returns a query filtered by release ID.
    #[diesel::dsl::auto_type(no_type_alias)]
    pub fn by_id(target: &Uuid) -> _ {
        crate::schema::releases::dsl::releases.filter(id.eq(target))
    }
}
