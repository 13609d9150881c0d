//! API errors and their HTTP representation.

use axum::{Json, http::StatusCode, response::IntoResponse};
use fleet_models::error::Error as ModelError;
use serde_json::json;
use tracing::error;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Models(#[from] ModelError),

    #[error(transparent)]
    Pipeline(#[from] fleet_pipeline::error::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Status code the error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Models(err) => model_status(err),
            Error::Pipeline(err) => match err.root() {
                fleet_pipeline::error::Error::Models(err) => model_status(err),
                fleet_pipeline::error::Error::InvalidIdentifier(_)
                | fleet_pipeline::error::Error::InvalidProfileConfig
                | fleet_pipeline::error::Error::ProfileConfigNotObject
                | fleet_pipeline::error::Error::InvalidKernel(_)
                | fleet_pipeline::error::Error::InvalidPackage { .. }
                | fleet_pipeline::error::Error::MissingVersion => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::IO(_) | Error::Json(_) | Error::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn model_status(err: &ModelError) -> StatusCode {
    if err.is_not_found() {
        return StatusCode::NOT_FOUND;
    }
    match err {
        ModelError::VersionRequired
        | ModelError::VersionMustBeSemver
        | ModelError::InvalidProfileConfig
        | ModelError::ProfileHasNoRevisions
        | ModelError::ProfileNotAssignedToFleet => StatusCode::BAD_REQUEST,
        ModelError::BuildVersionAlreadyExists
        | ModelError::BuildNotReadyForInstaller
        | ModelError::InstallerAlreadyQueued
        | ModelError::ReleaseWithdrawn
        | ModelError::ReleaseVersionAlreadyExists
        | ModelError::RolloutFleetReleaseMismatch
        | ModelError::DeviceAlreadyExists => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        error!("Creating API error response for error: {:?}", self);
        let status = self.status();
        let message = if status.is_server_error() {
            String::from("Internal server error")
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "status": status.as_u16()
            }
        }));
        (status, body).into_response()
    }
}
