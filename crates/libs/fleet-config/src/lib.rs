//! Configuration management for the fleet daemon.
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! # Usage
//!
//! ```rust
//! use fleet_config::FleetdConfig;
//!
//! let config = FleetdConfig::from_toml(
//!     r#"
//!     [server]
//!     bind = "127.0.0.1:9000"
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.build.command, "nix");
//! ```

pub mod error;
pub mod fleetd_config;
pub mod prelude;

pub use fleetd_config::{BuildSection, FleetdConfig, PathsSection, ServerSection};
