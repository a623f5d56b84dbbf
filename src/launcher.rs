//! Container entry point: provision the optional model asset, then start the
//! fetcher (and optionally the HTTP server) as independent OS processes.
//!
//! Provisioning is best effort. Children are not supervised: if one exits the
//! others keep running, and nothing is restarted.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, error, info};

use crate::error::LauncherError;

/// Where the given-name lexicon lives unless `NAME_MODEL_PATH` says otherwise.
pub const DEFAULT_MODEL_PATH: &str = "models/given-names.txt";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Launcher configuration.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Where to download the model asset from, if anywhere.
    pub model_url: Option<String>,
    pub model_path: PathBuf,
    /// Also start the HTTP server alongside the fetcher.
    pub with_server: bool,
}

impl LauncherConfig {
    /// `NAME_MODEL_URL` and `NAME_MODEL_PATH`.
    pub fn from_env(with_server: bool) -> Self {
        let model_url = std::env::var("NAME_MODEL_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self {
            model_url,
            model_path: model_path_from_env(),
            with_server,
        }
    }
}

/// `NAME_MODEL_PATH`, or [`DEFAULT_MODEL_PATH`].
pub fn model_path_from_env() -> PathBuf {
    std::env::var("NAME_MODEL_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_MODEL_PATH))
}

/// What happened to the model asset during provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyPresent,
    /// No download URL configured.
    Skipped,
    Downloaded,
    /// Download failed; the launch continues regardless.
    Failed(String),
}

/// Lifecycle of a launch. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    Provisioning,
    Running,
}

/// Ensure the model asset is present, without ever failing.
pub async fn provision_model(url: Option<&str>, path: &Path) -> ProvisionOutcome {
    if path.exists() {
        return ProvisionOutcome::AlreadyPresent;
    }
    let Some(url) = url else {
        return ProvisionOutcome::Skipped;
    };

    match download(url, path).await {
        Ok(bytes) => {
            info!(path = %path.display(), bytes, "Model asset downloaded");
            ProvisionOutcome::Downloaded
        }
        Err(reason) => {
            debug!(url, reason = %reason, "Model asset download failed, continuing");
            ProvisionOutcome::Failed(reason)
        }
    }
}

/// Sibling path the asset is streamed into before it is moved into place.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

async fn download(url: &str, path: &Path) -> Result<usize, String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| e.to_string())?;
    }

    let partial = partial_path(path);
    let result = match download_to(url, &partial).await {
        Ok(bytes) => tokio::fs::rename(&partial, path)
            .await
            .map(|()| bytes)
            .map_err(|e| e.to_string()),
        Err(e) => Err(e),
    };
    if result.is_err()
        && let Err(e) = tokio::fs::remove_file(&partial).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %partial.display(), error = %e, "Failed to remove partial download");
    }
    result
}

async fn download_to(url: &str, partial: &Path) -> Result<usize, String> {
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())?;
    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| e.to_string())?;

    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| e.to_string())?;
    let mut written = 0;
    while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
        file.write_all(&chunk).await.map_err(|e| e.to_string())?;
        written += chunk.len();
    }
    file.flush().await.map_err(|e| e.to_string())?;
    Ok(written)
}

/// A child process to start.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessSpec {
    pub fn new<I, S>(name: impl Into<String>, program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Provisions, then starts every process.
#[derive(Debug)]
pub struct Launcher {
    config: LauncherConfig,
    specs: Vec<ProcessSpec>,
    phase: LaunchPhase,
}

impl Launcher {
    pub fn new(config: LauncherConfig, specs: Vec<ProcessSpec>) -> Self {
        Self {
            config,
            specs,
            phase: LaunchPhase::Provisioning,
        }
    }

    /// `fetch` (and `serve` with `with_server`) subcommands of this executable.
    pub fn for_current_exe(
        config: LauncherConfig,
        fetch_config: &Path,
    ) -> Result<Self, LauncherError> {
        let exe = std::env::current_exe().map_err(LauncherError::CurrentExe)?;
        let mut specs = vec![ProcessSpec::new(
            "fetch",
            &exe,
            ["fetch".to_string(), "--config".into(), fetch_config.display().to_string()],
        )];
        if config.with_server {
            specs.push(ProcessSpec::new("serve", &exe, ["serve"]));
        }
        Ok(Self::new(config, specs))
    }

    pub fn phase(&self) -> LaunchPhase {
        self.phase
    }

    /// Provision the model asset, then spawn all processes.
    ///
    /// Fails only if no process could be started at all.
    pub async fn start(mut self) -> Result<RunningProcesses, LauncherError> {
        let provision =
            provision_model(self.config.model_url.as_deref(), &self.config.model_path).await;
        self.phase = LaunchPhase::Running;

        let mut children = Vec::new();
        let mut first_error = None;
        for spec in &self.specs {
            match Command::new(&spec.program).args(&spec.args).spawn() {
                Ok(child) => {
                    info!(process = %spec.name, pid = child.id(), "Process started");
                    children.push((spec.name.clone(), child));
                }
                Err(source) => {
                    error!(process = %spec.name, error = %source, "Failed to start process");
                    first_error.get_or_insert(LauncherError::Spawn {
                        name: spec.name.clone(),
                        source,
                    });
                }
            }
        }

        if children.is_empty()
            && let Some(e) = first_error
        {
            return Err(e);
        }

        Ok(RunningProcesses {
            provision,
            children,
        })
    }
}

/// Processes started by [`Launcher::start`].
#[derive(Debug)]
pub struct RunningProcesses {
    pub provision: ProvisionOutcome,
    children: Vec<(String, Child)>,
}

impl RunningProcesses {
    pub fn names(&self) -> Vec<&str> {
        self.children.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Wait for every process to exit on its own, in any order.
    pub async fn wait_all(self) -> Vec<(String, Result<ExitStatus, LauncherError>)> {
        let waits = self.children.into_iter().map(|(name, mut child)| async move {
            let status = child.wait().await.map_err(|source| LauncherError::Wait {
                name: name.clone(),
                source,
            });
            match &status {
                Ok(s) => info!(process = %name, status = %s, "Process exited"),
                Err(e) => error!(process = %name, error = %e, "Lost track of process"),
            }
            (name, status)
        });
        futures::future::join_all(waits).await
    }
}
