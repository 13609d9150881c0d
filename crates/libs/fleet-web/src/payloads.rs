//! Request and response bodies of the API.

use fleet_models::build::BuildRequest;
use fleet_models::release::ReleaseCreate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /v1/builds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitBuild {
    pub profile_id: Uuid,
    pub fleet_id: Uuid,
    pub version: String,
}

impl From<SubmitBuild> for BuildRequest {
    fn from(value: SubmitBuild) -> Self {
        Self {
            profile_id: value.profile_id,
            fleet_id: value.fleet_id,
            version: value.version,
        }
    }
}

/// Reply to an accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submitted {
    pub id: Uuid,
}

/// Body of `POST /v1/rollouts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRelease {
    pub fleet_id: Uuid,
    pub release_id: Uuid,
}

/// Body of `POST /v1/profiles/{id}/releases`. A blank version takes the
/// build's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRelease {
    pub build_id: Uuid,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub notes: String,
}

impl From<CreateRelease> for ReleaseCreate {
    fn from(value: CreateRelease) -> Self {
        Self {
            build_id: value.build_id,
            channel: value.channel,
            version: value.version,
            notes: value.notes,
        }
    }
}
