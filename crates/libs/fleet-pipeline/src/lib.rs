//! Build pipeline of the fleet control plane.
//!
//! Turns a queued build into published update artifacts: it copies the
//! reference NixOS tree into a private workspace, writes the build overlay,
//! runs the build tool while persisting its output, and publishes the
//! results under the updates directory. Published builds are made live for
//! a fleet by swapping the fleet's update directory.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fleet_models::build::BuildRequest;
//! use fleet_models::db::{config::DbConfig, connection::DbConnection};
//! use fleet_pipeline::{layout::UpdatesLayout, orchestrator::{Pipeline, PipelineSettings}};
//! use uuid::Uuid;
//!
//! # async fn run() -> fleet_pipeline::prelude::Result<()> {
//! let connection = DbConnection::new(&DbConfig::from_env()?)?.setup()?;
//! let settings = PipelineSettings {
//!     source_dir: "nixos".into(),
//!     build_command: "nix".to_string(),
//!     update_base_url: "http://10.10.0.14:8080".to_string(),
//!     allowed_kernels: Vec::new(),
//! };
//! let pipeline = Pipeline::new(Arc::new(connection), settings, UpdatesLayout::new("updates"));
//!
//! let build = pipeline.submit_build(BuildRequest {
//!     profile_id: Uuid::new_v4(),
//!     fleet_id: Uuid::new_v4(),
//!     version: "v1.2.0".to_string(),
//! })?;
//! println!("Queued build {}", build.id);
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod builder;
pub mod checksums;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod log_writer;
pub mod orchestrator;
pub mod overrides;
pub mod prelude;
pub mod profile_config;
pub mod publish;
pub mod recovery;
pub mod releases;
pub mod store;
pub mod workspace;

#[cfg(test)]
mod test_support;
