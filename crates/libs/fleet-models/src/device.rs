//! Devices enrolled in a fleet.

use crate::db::connection::DbConnection;
use crate::prelude::*;
use crate::schema::devices::dsl::*;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A device record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, PartialEq, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::devices)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Device {
    pub id: Uuid,
    pub fleet_id: Uuid,
    pub hostname: String,
    pub serial_number: String,
    /// Release the device should converge to, if any.
    pub desired_release_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Data for enrolling a device.
#[derive(Insertable, PartialEq, Debug, Clone, Deserialize)]
#[diesel(table_name = crate::schema::devices)]
pub struct DeviceCreate {
    pub fleet_id: Uuid,
    pub hostname: String,
    pub serial_number: String,
}

impl DeviceCreate {
    /// Saves the device to the database.
    pub fn save(self, connection: &DbConnection) -> Result<Device> {
        let conn = &mut connection.pool.get()?;
        let created = diesel::insert_into(devices)
            .values(&self)
            .returning(Device::as_returning())
            .get_result(conn);

        match created {
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(Error::DeviceAlreadyExists)
            }
            Err(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => {
                Err(Error::FleetNotFound)
            }
            other => Ok(other?),
        }
    }
}

impl Device {
    /// Points every device of the fleet at the release. Returns how many were updated.
    pub fn set_fleet_desired_release(
        fleet: &Uuid,
        release: &Uuid,
        connection: &DbConnection,
    ) -> Result<usize> {
        let conn = &mut connection.pool.get()?;
        Ok(diesel::update(devices.filter(fleet_id.eq(fleet)))
            .set(desired_release_id.eq(Some(*release)))
            .execute(conn)?)
    }
}
