//! HTTP layer shared by the fleet daemon.
//!
//! Maps domain errors onto JSON error responses, defines the request and
//! response payloads of the API, pages build logs for polling clients and
//! serves the per-fleet checksum manifest devices verify updates against.

pub mod build_log;
pub mod error;
pub mod payloads;
pub mod prelude;
pub mod update;
