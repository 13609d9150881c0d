//! Fleets: named groups of devices sharing one update target.

use crate::db::connection::DbConnection;
use crate::prelude::*;
use crate::schema::fleets::dsl::*;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fleet of devices.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, PartialEq, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::fleets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Fleet {
    /// Unique fleet ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// When this fleet was created.
    pub created_at: DateTime<Utc>,
}

/// Data for creating a new fleet.
#[derive(Insertable, PartialEq, Debug, Clone, Deserialize)]
#[diesel(table_name = crate::schema::fleets)]
pub struct FleetCreate {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
}

impl FleetCreate {
    /// Saves the fleet to the database.
    pub fn save(self, connection: &DbConnection) -> Result<Fleet> {
        let conn = &mut connection.pool.get()?;
        Ok(diesel::insert_into(fleets)
            .values(&self)
            .returning(Fleet::as_returning())
            .get_result(conn)?)
    }
}

impl Fleet {
    /// Fetches a fleet by its ID.
    pub fn fetch_by_id(target: &Uuid, connection: &DbConnection) -> Result<Self> {
        let conn = &mut connection.pool.get()?;
        Fleet::by_id(target)
            .select(Fleet::as_select())
            .get_result(conn)
            .optional()?
            .ok_or(Error::FleetNotFound)
    }

    /// Whether a fleet with this ID exists.
    pub fn exists(target: &Uuid, connection: &DbConnection) -> Result<bool> {
        let conn = &mut connection.pool.get()?;
        Ok(diesel::select(diesel::dsl::exists(Fleet::by_id(target))).get_result(conn)?)
    }

    /// Returns a query filtered by fleet ID.
    #[diesel::dsl::auto_type(no_type_alias)]
    pub fn by_id(target: &Uuid) -> _ {
        crate::schema::fleets::dsl::fleets.filter(id.eq(target))
    }
}
