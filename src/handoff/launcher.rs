// ABOUTME: Opens the session window as a separate terminal process
// The launched process runs this binary's `attach` subcommand pointed at the opener endpoint

use crate::handoff::error::HandoffError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{info, warn};

/// What a new session window needs to find its opener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub handoff_addr: SocketAddr,
    pub origin: String,
    pub bridge_url: String,
}

impl LaunchRequest {
    /// Arguments for the `attach` subcommand
    pub fn attach_args(&self) -> Vec<String> {
        vec![
            "attach".to_string(),
            "--handoff".to_string(),
            self.handoff_addr.to_string(),
            "--origin".to_string(),
            self.origin.clone(),
            "--url".to_string(),
            self.bridge_url.clone(),
        ]
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait WindowLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), HandoffError>;
}

/// Launches the session window through a terminal emulator command,
/// e.g. `x-terminal-emulator -e <this binary> attach ...`
///
/// Each launched process is waited on by a background task so it is reaped
/// as soon as it exits. Must be used inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    terminal: Vec<String>,
    executable: PathBuf,
    reaped: Arc<Mutex<Vec<ExitStatus>>>,
}

impl CommandLauncher {
    pub fn new(terminal: Vec<String>) -> Result<Self, HandoffError> {
        if terminal.is_empty() {
            return Err(HandoffError::Launch(
                "no terminal launcher configured".to_string(),
            ));
        }
        Ok(Self {
            terminal,
            executable: std::env::current_exe()?,
            reaped: Arc::default(),
        })
    }

    pub fn with_executable(mut self, executable: PathBuf) -> Self {
        self.executable = executable;
        self
    }

    /// Full command line that `launch` would run
    pub fn command_line(&self, request: &LaunchRequest) -> Vec<String> {
        let mut line = self.terminal.clone();
        line.push(self.executable.display().to_string());
        line.extend(request.attach_args());
        line
    }

    /// Exit statuses of launched processes that have finished
    pub fn reaped(&self) -> Vec<ExitStatus> {
        self.reaped
            .lock()
            .map(|statuses| statuses.clone())
            .unwrap_or_default()
    }
}

impl WindowLauncher for CommandLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), HandoffError> {
        let line = self.command_line(request);
        let (program, args) = line
            .split_first()
            .ok_or_else(|| HandoffError::Launch("empty command line".to_string()))?;

        info!("Launching session window via {}", program);
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HandoffError::Launch(format!("{program}: {e}")))?;

        let reaped = Arc::clone(&self.reaped);
        let program = program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    info!("Launcher {} exited with {}", program, status);
                    if let Ok(mut statuses) = reaped.lock() {
                        statuses.push(status);
                    }
                }
                Err(e) => warn!("Failed to wait for launcher {}: {}", program, e),
            }
        });

        Ok(())
    }
}
