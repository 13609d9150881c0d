//! Database models for the fleet build-and-release control plane.
//!
//! Provides Diesel-based models, queries, and connection management for
//! fleets, profiles, builds and their logs, releases, devices and rollouts.
//!
//! # Usage
//!
//! ```rust,no_run
//! use fleet_models::{build::Build, db::{config::DbConfig, connection::DbConnection}};
//!
//! let config = DbConfig::from_env().unwrap();
//! let connection = DbConnection::new(&config).unwrap();
//!
//! let recovered = Build::fail_running(&connection).unwrap();
//! println!("Recovered {} builds", recovered);
//! ```

pub mod build;
pub mod db;
pub mod device;
pub mod error;
pub mod fleet;
pub mod prelude;
pub mod profile;
pub mod release;
pub mod rollout;
mod schema;
#[cfg(test)]
mod test_context;
mod version;

pub use version::is_semantic_version;
