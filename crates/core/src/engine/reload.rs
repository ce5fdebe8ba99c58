//! Applying a persisted document to the running engine.
//!
//! Live reload is tried first; any failure (unsupported, refused, timed
//! out) falls back to a full restart. Both paths run under a bounded
//! timeout so a hung engine never stalls the caller.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use xpanel_common::{EngineConfig, PanelError, Result};

use super::document::ConfigDocument;

/// The engine's control surface
#[async_trait]
pub trait EngineControl: Send + Sync {
    /// Ask the running engine to pick up `doc` without restarting
    async fn live_reload(&self, doc: &ConfigDocument) -> Result<()>;

    /// Restart the engine process or container
    async fn restart(&self) -> Result<()>;
}

#[async_trait]
impl<C: EngineControl + ?Sized> EngineControl for Arc<C> {
    async fn live_reload(&self, doc: &ConfigDocument) -> Result<()> {
        (**self).live_reload(doc).await
    }

    async fn restart(&self) -> Result<()> {
        (**self).restart().await
    }
}

/// Which path got the document applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadPath {
    Live,
    Restart,
}

impl std::fmt::Display for ReloadPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => f.write_str("live reload"),
            Self::Restart => f.write_str("restart"),
        }
    }
}

pub struct ReloadController {
    control: Arc<dyn EngineControl>,
    timeout: Duration,
}

impl ReloadController {
    pub fn new(control: Arc<dyn EngineControl>, timeout: Duration) -> Self {
        Self { control, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Apply `doc`, live first, restart as fallback.
    ///
    /// Fails with `ReloadFailure` only when both paths fail.
    pub async fn apply(&self, doc: &ConfigDocument) -> Result<ReloadPath> {
        let live = match self.bounded("live reload", self.control.live_reload(doc)).await {
            Ok(()) => {
                info!("Engine config applied via live reload");
                return Ok(ReloadPath::Live);
            }
            Err(e) => {
                warn!("Live reload failed: {}, trying restart", e);
                e
            }
        };

        match self.bounded("restart", self.control.restart()).await {
            Ok(()) => {
                info!("Engine restarted with new config");
                Ok(ReloadPath::Restart)
            }
            Err(restart) => {
                error!("Engine restart failed: {}", restart);
                Err(PanelError::ReloadFailure {
                    live: live.to_string(),
                    restart: restart.to_string(),
                })
            }
        }
    }

    async fn bounded<F>(&self, what: &str, fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PanelError::unreachable(format!(
                "{} timed out after {:?}",
                what, self.timeout
            ))),
        }
    }
}

impl std::fmt::Debug for ReloadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadController")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Engine control backed by external commands
#[derive(Debug, Clone)]
pub struct CommandControl {
    reload_command: Option<Vec<String>>,
    restart_command: Vec<String>,
}

impl CommandControl {
    pub fn new(reload_command: Option<Vec<String>>, restart_command: Vec<String>) -> Self {
        Self {
            reload_command,
            restart_command,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.reload_command.clone(), config.restart_command.clone())
    }
}

#[async_trait]
impl EngineControl for CommandControl {
    async fn live_reload(&self, _doc: &ConfigDocument) -> Result<()> {
        match &self.reload_command {
            Some(argv) => run(argv).await,
            None => Err(PanelError::unreachable("live reload is not configured")),
        }
    }

    async fn restart(&self) -> Result<()> {
        run(&self.restart_command).await
    }
}

/// Run `argv` to completion; non-zero exit is an error carrying stderr
async fn run(argv: &[String]) -> Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| PanelError::unreachable("empty command"))?;

    debug!("Running {} {:?}", program, args);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PanelError::unreachable(format!("{}: {}", program, e)))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(PanelError::unreachable(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )))
    }
}
