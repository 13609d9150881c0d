//! Drives builds and installer builds from `queued` to a terminal status.

use std::{any::Any, future::Future, path::PathBuf, sync::Arc};

use fleet_config::FleetdConfig;
use fleet_models::build::build_log::LogStream;
use fleet_models::build::build_status::{BuildStatus, InstallerStatus};
use fleet_models::build::{Build, BuildRequest};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::activation::Activator;
use crate::builder::run_build;
use crate::error::Phase;
use crate::layout::{INSTALLER_BUILD_TARGET, UPDATE_BUILD_TARGET, UpdatesLayout};
use crate::log_writer::LogWriter;
use crate::overrides::BuildOverrides;
use crate::prelude::*;
use crate::profile_config::ProfileConfig;
use crate::publish::{publish_build_artifacts, publish_installer_artifacts};
use crate::store::BuildStore;
use crate::workspace::{BUILD_WORKSPACE_PREFIX, INSTALLER_WORKSPACE_PREFIX, Workspace};

/// What the pipeline needs from the daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub source_dir: PathBuf,
    pub build_command: String,
    pub update_base_url: String,
    pub allowed_kernels: Vec<String>,
}

impl PipelineSettings {
    pub fn from_config(config: &FleetdConfig) -> Self {
        Self {
            source_dir: config.paths.source_dir.clone(),
            build_command: config.build.command.clone(),
            update_base_url: config.build.update_base_url.clone(),
            allowed_kernels: config.build.allowed_kernels.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Build,
    Installer,
}

impl Job {
    fn prefix(self) -> &'static str {
        match self {
            Job::Build => BUILD_WORKSPACE_PREFIX,
            Job::Installer => INSTALLER_WORKSPACE_PREFIX,
        }
    }

    fn target(self) -> &'static str {
        match self {
            Job::Build => UPDATE_BUILD_TARGET,
            Job::Installer => INSTALLER_BUILD_TARGET,
        }
    }

    fn stream(self) -> LogStream {
        match self {
            Job::Build => LogStream::Build,
            Job::Installer => LogStream::Installer,
        }
    }
}

/// Build orchestrator. Cloning is cheap; every clone shares the same store
/// and activation locks.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn BuildStore>,
    settings: Arc<PipelineSettings>,
    activator: Arc<Activator>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn BuildStore>, settings: PipelineSettings, layout: UpdatesLayout) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
            activator: Arc::new(Activator::new(layout)),
        }
    }

    pub fn store(&self) -> &Arc<dyn BuildStore> {
        &self.store
    }

    pub fn activator(&self) -> &Activator {
        &self.activator
    }

    pub fn layout(&self) -> &UpdatesLayout {
        self.activator.layout()
    }

    /// Stores a queued build and starts executing it in the background.
    pub fn submit_build(&self, request: BuildRequest) -> Result<Build> {
        let build = self.store.create_build(request)?;
        info!("Queued build {} ({})", build.id, build.version);
        self.spawn_build(build.id, build.version.clone());
        Ok(build)
    }

    /// Queues the installer sub-build of a succeeded build and starts it.
    pub fn submit_installer(&self, build_id: Uuid) -> Result<()> {
        self.store.queue_installer(&build_id)?;
        info!("Queued installer build for {}", build_id);
        self.spawn_installer(build_id);
        Ok(())
    }

    /// Executes a build on its own task.
    pub fn spawn_build(&self, build_id: Uuid, version: String) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.execute_build(build_id, version).await })
    }

    /// Executes an installer build on its own task.
    pub fn spawn_installer(&self, build_id: Uuid) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.execute_installer(build_id).await })
    }

    async fn execute_build(self, build_id: Uuid, version: String) {
        let pipeline = self.clone();
        let outcome = run_guarded(async move {
            if let Err(err) = pipeline
                .store
                .update_build_status(&build_id, BuildStatus::Running, "")
            {
                error!("Failed to mark build {} as running: {}", build_id, err);
                return Ok(None);
            }
            pipeline.run(Job::Build, build_id, version).await.map(Some)
        })
        .await;

        match outcome {
            Ok(None) => {}
            Ok(Some(url)) => match self
                .store
                .update_build_status(&build_id, BuildStatus::Succeeded, &url)
            {
                Ok(()) => info!("Build {} completed: {}", build_id, url),
                Err(err) => error!("Failed to mark build {} as succeeded: {}", build_id, err),
            },
            Err(err) => {
                error!("Build {} failed: {}", build_id, err);
                if let Err(err) = self
                    .store
                    .update_build_status(&build_id, BuildStatus::Failed, "")
                {
                    error!("Failed to mark build {} as failed: {}", build_id, err);
                }
            }
        }
    }

    async fn execute_installer(self, build_id: Uuid) {
        let pipeline = self.clone();
        let outcome = run_guarded(async move {
            if let Err(err) =
                pipeline
                    .store
                    .update_installer_status(&build_id, InstallerStatus::Running, "")
            {
                error!("Failed to mark installer build {} as running: {}", build_id, err);
                return Ok(None);
            }
            let build = pipeline.store.fetch_build(&build_id)?;
            if build.build_status()? != BuildStatus::Succeeded {
                return Err(Error::Models(
                    fleet_models::error::Error::BuildNotReadyForInstaller,
                ));
            }
            pipeline
                .run(Job::Installer, build_id, build.version)
                .await
                .map(Some)
        })
        .await;

        match outcome {
            Ok(None) => {}
            Ok(Some(url)) => match self.store.update_installer_status(
                &build_id,
                InstallerStatus::Succeeded,
                &url,
            ) {
                Ok(()) => info!("Installer build {} completed: {}", build_id, url),
                Err(err) => error!(
                    "Failed to mark installer build {} as succeeded: {}",
                    build_id, err
                ),
            },
            Err(err) => {
                error!("Installer build {} failed: {}", build_id, err);
                if let Err(err) =
                    self.store
                        .update_installer_status(&build_id, InstallerStatus::Failed, "")
                {
                    error!(
                        "Failed to mark installer build {} as failed: {}",
                        build_id, err
                    );
                }
            }
        }
    }

    /// Prepares a workspace, runs the build tool and publishes the result.
    async fn run(&self, job: Job, build_id: Uuid, version: String) -> Result<String> {
        let version = version.trim().to_string();
        if version.is_empty() {
            return Err(Error::MissingVersion.in_phase(Phase::Prepare));
        }

        let source = self.settings.source_dir.clone();
        let workspace = blocking(move || Workspace::materialize(&source, job.prefix()))
            .await
            .map_err(|err| err.in_phase(Phase::Prepare))?;

        let workspace = self
            .configure(workspace, build_id, version)
            .await
            .map_err(|err| err.in_phase(Phase::Configure))?;

        let log = LogWriter::new(build_id, job.stream(), self.store.clone());
        run_build(
            &self.settings.build_command,
            workspace.source_dir(),
            job.target(),
            log,
        )
        .await
        .map_err(|err| err.in_phase(Phase::Build))?;

        let layout = self.layout().clone();
        blocking(move || {
            let result = workspace.result_path();
            let id = build_id.to_string();
            match job {
                Job::Build => publish_build_artifacts(&result, &layout, &id),
                Job::Installer => publish_installer_artifacts(&result, &layout, &id),
            }
        })
        .await
        .map_err(|err| err.in_phase(Phase::Publish))
    }

    async fn configure(&self, workspace: Workspace, build_id: Uuid, version: String) -> Result<Workspace> {
        let metadata = self.store.execution_metadata(&build_id)?;
        let profile = ProfileConfig::parse(&metadata.config_json)?;
        profile.kernel.validate(&self.settings.allowed_kernels)?;

        let settings = self.settings.clone();
        blocking(move || {
            BuildOverrides {
                version: &version,
                fleet_id: &metadata.fleet_id.to_string(),
                update_base_url: &settings.update_base_url,
                packages: &profile.packages,
                kernel: &profile.kernel,
                allowed_kernels: &settings.allowed_kernels,
            }
            .write(workspace.source_dir())?;
            Ok(workspace)
        })
        .await
    }
}

/// Runs blocking filesystem work on the blocking pool. Panics propagate.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(Error::Task(err.to_string())),
    }
}

/// Runs `work` on its own task and turns a panic into an error.
pub async fn run_guarded<T, F>(work: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            let message = panic_message(err.into_panic());
            error!("Build execution panicked: {}", message);
            Err(Error::Task(format!("panicked: {message}")))
        }
        Err(err) => Err(Error::Task(err.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}
