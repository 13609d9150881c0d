//! Throwaway PostgreSQL databases for model tests.

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};

use crate::db::{config::DbConfig, connection::DbConnection};
use crate::fleet::{Fleet, FleetCreate};
use crate::profile::{Profile, ProfileCreate};

pub struct DbTestContext {
    pub connection: DbConnection,
    base_url: String,
    db_name: String,
}

impl DbTestContext {
    pub fn create() -> Self {
        let base_url =
            std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL env variable missing");
        let db_name = format!("fleet_test_{}", uuid::Uuid::new_v4().simple());

        let base_manager = ConnectionManager::<PgConnection>::new(format!("{base_url}/postgres"));
        let base_pool = Pool::builder()
            .max_size(1)
            .build(base_manager)
            .expect("Failed to connect to base database");
        {
            let mut conn = base_pool.get().expect("Failed to get connection");
            diesel::sql_query(format!("CREATE DATABASE {db_name}"))
                .execute(&mut conn)
                .expect("Failed to create test database");
        }

        let config = DbConfig {
            database_url: format!("{base_url}/{db_name}"),
        };
        let connection = DbConnection::new(&config)
            .and_then(DbConnection::setup)
            .expect("Failed to prepare test database");

        Self {
            connection,
            base_url,
            db_name,
        }
    }

    /// Creates a fleet and a profile assigned to it.
    pub fn seed(&self, config_json: &str) -> (Fleet, Profile) {
        let fleet = FleetCreate {
            name: format!("fleet-{}", uuid::Uuid::new_v4().simple()),
            description: String::new(),
        }
        .save(&self.connection)
        .expect("Failed to create fleet");
        let profile = ProfileCreate {
            name: format!("profile-{}", uuid::Uuid::new_v4().simple()),
            description: String::new(),
        }
        .save(config_json, &[fleet.id], &self.connection)
        .expect("Failed to create profile");
        (fleet, profile)
    }
}

impl Drop for DbTestContext {
    fn drop(&mut self) {
        let base_manager =
            ConnectionManager::<PgConnection>::new(format!("{}/postgres", self.base_url));
        let Ok(base_pool) = Pool::builder().max_size(1).build(base_manager) else {
            return;
        };
        if let Ok(mut conn) = base_pool.get() {
            diesel::sql_query(format!(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = '{}'",
                self.db_name
            ))
            .execute(&mut conn)
            .ok();
            diesel::sql_query(format!("DROP DATABASE IF EXISTS {}", self.db_name))
                .execute(&mut conn)
                .ok();
        }
    }
}
