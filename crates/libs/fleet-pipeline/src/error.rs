//! Pipeline error types.

use std::{fmt::Display, path::PathBuf};

/// Stage of a build or rollout an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Configure,
    Build,
    Publish,
    Activate,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Prepare => "prepare workspace",
            Phase::Configure => "generate build configuration",
            Phase::Build => "run build",
            Phase::Publish => "publish artifacts",
            Phase::Activate => "activate fleet artifacts",
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Models(#[from] fleet_models::error::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase}: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<Error>,
    },

    #[error("profile configuration must be valid JSON")]
    InvalidProfileConfig,

    #[error("profile configuration JSON must be an object")]
    ProfileConfigNotObject,

    #[error("{0}")]
    InvalidKernel(&'static str),

    #[error("package {package:?}: {reason}")]
    InvalidPackage {
        package: String,
        reason: &'static str,
    },

    #[error("build version is required")]
    MissingVersion,

    #[error("build target is required")]
    MissingTarget,

    #[error("fleet ID is required for build override generation")]
    MissingFleet,

    #[error("source directory {0} is not a directory")]
    SourceNotDirectory(PathBuf),

    #[error("unsupported file type in workspace copy: {0}")]
    UnsupportedFileType(PathBuf),

    #[error("build command failed ({status}): {output}")]
    BuildCommand { status: String, output: String },

    #[error("{0}")]
    Artifacts(String),

    #[error("invalid {0} identifier")]
    InvalidIdentifier(&'static str),

    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Wraps an I/O error with what was being attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Tags the error with the phase it occurred in.
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            Error::Phase { .. } => self,
            other => Error::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with phase tags removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Phase { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Attaches context to `std::io::Result`s.
pub trait IoContext<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T, Error>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T, Error> {
        self.map_err(|source| Error::io(context(), source))
    }
}
