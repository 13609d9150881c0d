//! Database error types.

/// Database operation errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Database connection pool error.
    #[error(transparent)]
    R2D2(#[from] diesel::r2d2::PoolError),

    /// Diesel ORM operation error.
    #[error(transparent)]
    Diesel(#[from] diesel::result::Error),

    /// Migration harness error.
    #[error("failed to run database migrations: {0}")]
    Migration(String),

    #[error("Env Variable '{0}' missing")]
    MissingEnv(&'static str),

    #[error("fleet not found")]
    FleetNotFound,

    #[error("profile not found")]
    ProfileNotFound,

    #[error("profile has no revisions")]
    ProfileHasNoRevisions,

    #[error("profile is not assigned to fleet")]
    ProfileNotAssignedToFleet,

    #[error("profile configuration must be valid JSON")]
    InvalidProfileConfig,

    #[error("build not found")]
    BuildNotFound,

    #[error("build version already exists for this profile and fleet")]
    BuildVersionAlreadyExists,

    #[error("a succeeded build requires an artifact")]
    MissingArtifact,

    #[error("build must succeed before installer can be built")]
    BuildNotReadyForInstaller,

    #[error("installer build is already queued or running")]
    InstallerAlreadyQueued,

    #[error("release not found")]
    ReleaseNotFound,

    #[error("release is withdrawn")]
    ReleaseWithdrawn,

    #[error("release version already exists")]
    ReleaseVersionAlreadyExists,

    #[error("release does not belong to fleet")]
    RolloutFleetReleaseMismatch,

    #[error("rollout not found")]
    RolloutNotFound,

    #[error("device hostname or serial number already exists")]
    DeviceAlreadyExists,

    #[error("version is required")]
    VersionRequired,

    #[error("version must follow semver format (e.g. v1.1.0)")]
    VersionMustBeSemver,

    #[error("invalid status {0:?}")]
    InvalidStatus(String),
}

impl Error {
    /// Whether the error names a record that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::FleetNotFound
                | Error::ProfileNotFound
                | Error::BuildNotFound
                | Error::ReleaseNotFound
                | Error::RolloutNotFound
                | Error::Diesel(diesel::result::Error::NotFound)
        )
    }
}
