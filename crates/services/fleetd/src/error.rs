//! Errors of the fleet daemon.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] fleet_config::error::Error),

    #[error(transparent)]
    Model(#[from] fleet_models::error::Error),

    #[error(transparent)]
    Pipeline(#[from] fleet_pipeline::error::Error),

    #[error("failed to create updates directory {path}: {source}")]
    UpdatesDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
