//! Profiles, their immutable revisions, and fleet assignments.

use crate::db::connection::DbConnection;
use crate::prelude::*;
use crate::schema::{profile_fleets, profile_revisions, profiles};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A declaration of desired device software.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, PartialEq, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::profiles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// One revision of a profile's configuration JSON.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, PartialEq, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::profile_revisions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProfileRevision {
    pub id: Uuid,
    pub profile_id: Uuid,
    /// Monotonic revision number, starting at 1.
    pub revision: i32,
    /// Configuration document (`packages`, `kernel`).
    pub config_json: String,
    pub created_at: DateTime<Utc>,
}

/// Data for creating a new profile.
#[derive(Insertable, PartialEq, Debug, Clone, Deserialize)]
#[diesel(table_name = crate::schema::profiles)]
pub struct ProfileCreate {
    pub name: String,
    pub description: String,
}

impl ProfileCreate {
    /// Saves the profile together with its first revision and fleet assignments.
    pub fn save(
        self,
        config_json: &str,
        fleet_ids: &[Uuid],
        connection: &DbConnection,
    ) -> Result<Profile> {
        let conn = &mut connection.pool.get()?;
        conn.transaction::<_, Error, _>(|conn| {
            let profile = diesel::insert_into(profiles::table)
                .values(&self)
                .returning(Profile::as_returning())
                .get_result(conn)?;

            diesel::insert_into(profile_revisions::table)
                .values((
                    profile_revisions::profile_id.eq(profile.id),
                    profile_revisions::revision.eq(1),
                    profile_revisions::config_json.eq(config_json),
                ))
                .execute(conn)?;

            for fleet in fleet_ids {
                diesel::insert_into(profile_fleets::table)
                    .values((
                        profile_fleets::profile_id.eq(profile.id),
                        profile_fleets::fleet_id.eq(fleet),
                    ))
                    .on_conflict_do_nothing()
                    .execute(conn)?;
            }

            Ok(profile)
        })
    }
}

impl Profile {
    /// Fetches a profile by its ID.
    pub fn fetch_by_id(target: &Uuid, connection: &DbConnection) -> Result<Self> {
        let conn = &mut connection.pool.get()?;
        profiles::table
            .filter(profiles::id.eq(target))
            .select(Profile::as_select())
            .get_result(conn)
            .optional()?
            .ok_or(Error::ProfileNotFound)
    }

    /// Whether a profile with this ID exists.
    pub fn exists(target: &Uuid, connection: &DbConnection) -> Result<bool> {
        let conn = &mut connection.pool.get()?;
        Ok(
            diesel::select(diesel::dsl::exists(
                profiles::table.filter(profiles::id.eq(target)),
            ))
            .get_result(conn)?,
        )
    }

    /// Whether the profile is assigned to the fleet.
    pub fn is_assigned_to(
        profile: &Uuid,
        fleet: &Uuid,
        connection: &DbConnection,
    ) -> Result<bool> {
        let conn = &mut connection.pool.get()?;
        Ok(diesel::select(diesel::dsl::exists(
            profile_fleets::table
                .filter(profile_fleets::profile_id.eq(profile))
                .filter(profile_fleets::fleet_id.eq(fleet)),
        ))
        .get_result(conn)?)
    }
}

impl ProfileRevision {
    /// Fetches the most recent revision of a profile.
    pub fn fetch_latest(profile: &Uuid, connection: &DbConnection) -> Result<Self> {
        let conn = &mut connection.pool.get()?;
        profile_revisions::table
            .filter(profile_revisions::profile_id.eq(profile))
            .order(profile_revisions::revision.desc())
            .select(ProfileRevision::as_select())
            .first(conn)
            .optional()?
            .ok_or(Error::ProfileHasNoRevisions)
    }
}
