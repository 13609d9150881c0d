//! Rollouts: the act of making a release the fleet's desired software.

use std::{fmt::Display, str::FromStr};

use crate::db::connection::DbConnection;
use crate::prelude::*;
use crate::schema::rollouts::dsl::*;
use crate::schema::{builds, releases};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The only supported rollout strategy.
pub const STRATEGY_ALL_AT_ONCE: &str = "all_at_once";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Planned,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl RolloutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutStatus::Planned => "planned",
            RolloutStatus::InProgress => "in_progress",
            RolloutStatus::Paused => "paused",
            RolloutStatus::Completed => "completed",
            RolloutStatus::Failed => "failed",
        }
    }

    fn has_started(&self) -> bool {
        matches!(
            self,
            RolloutStatus::InProgress | RolloutStatus::Completed | RolloutStatus::Failed
        )
    }

    fn is_finished(&self) -> bool {
        matches!(self, RolloutStatus::Completed | RolloutStatus::Failed)
    }
}

impl FromStr for RolloutStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "planned" => Ok(RolloutStatus::Planned),
            "in_progress" => Ok(RolloutStatus::InProgress),
            "paused" => Ok(RolloutStatus::Paused),
            "completed" => Ok(RolloutStatus::Completed),
            "failed" => Ok(RolloutStatus::Failed),
            _ => Err(Error::InvalidStatus(value.to_string())),
        }
    }
}

impl Display for RolloutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rollout record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, PartialEq, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::rollouts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Rollout {
    pub id: Uuid,
    pub fleet_id: Uuid,
    pub release_id: Uuid,
    pub strategy: String,
    pub stage_percent: i32,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Data for creating an all-at-once rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutCreate {
    pub fleet_id: Uuid,
    pub release_id: Uuid,
}

impl RolloutCreate {
    /// Saves the rollout with the given initial status.
    ///
    /// The release must be active and built for the rollout's fleet.
    pub fn save(self, initial: RolloutStatus, connection: &DbConnection) -> Result<Rollout> {
        let conn = &mut connection.pool.get()?;
        conn.transaction::<_, Error, _>(|conn| {
            let (release_fleet, release_status): (Uuid, String) = releases::table
                .inner_join(builds::table)
                .filter(releases::id.eq(self.release_id))
                .select((builds::fleet_id, releases::status))
                .get_result(conn)
                .optional()?
                .ok_or(Error::ReleaseNotFound)?;

            if release_status.parse::<crate::release::ReleaseStatus>()?
                == crate::release::ReleaseStatus::Withdrawn
            {
                return Err(Error::ReleaseWithdrawn);
            }
            if release_fleet != self.fleet_id {
                return Err(Error::RolloutFleetReleaseMismatch);
            }

            let now = Utc::now();
            Ok(diesel::insert_into(rollouts)
                .values((
                    fleet_id.eq(self.fleet_id),
                    release_id.eq(self.release_id),
                    strategy.eq(STRATEGY_ALL_AT_ONCE),
                    stage_percent.eq(100),
                    status.eq(initial.as_str()),
                    started_at.eq(initial.has_started().then_some(now)),
                    completed_at.eq(initial.is_finished().then_some(now)),
                ))
                .returning(Rollout::as_returning())
                .get_result(conn)?)
        })
    }
}

impl Rollout {
    /// Fetches a rollout by its ID.
    pub fn fetch_by_id(target: &Uuid, connection: &DbConnection) -> Result<Self> {
        let conn = &mut connection.pool.get()?;
        rollouts
            .filter(id.eq(target))
            .select(Rollout::as_select())
            .get_result(conn)
            .optional()?
            .ok_or(Error::RolloutNotFound)
    }

    /// Persists a status transition, maintaining the start and completion stamps.
    pub fn update_status(
        target: &Uuid,
        new_status: RolloutStatus,
        connection: &DbConnection,
    ) -> Result<()> {
        let conn = &mut connection.pool.get()?;
        conn.transaction::<_, Error, _>(|conn| {
            let current: Rollout = rollouts
                .filter(id.eq(target))
                .for_update()
                .select(Rollout::as_select())
                .get_result(conn)
                .optional()?
                .ok_or(Error::RolloutNotFound)?;

            let now = Utc::now();
            let started = match new_status {
                RolloutStatus::Planned => None,
                s if s.has_started() => current.started_at.or(Some(now)),
                _ => current.started_at,
            };
            let completed = new_status.is_finished().then_some(now);

            diesel::update(rollouts.filter(id.eq(target)))
                .set((
                    status.eq(new_status.as_str()),
                    started_at.eq(started),
                    completed_at.eq(completed),
                ))
                .execute(conn)?;
            Ok(())
        })
    }
}
