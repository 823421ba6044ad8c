use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::RenderTools;
use crate::error::{RenderError, Result, Tool};
use crate::state_machine::ImportId;
use crate::toolchain::ToolchainLayout;

/// Runs the real generator and composition script as child processes.
///
/// Tool output is inherited so operators see it alongside our own logs.
/// Every run is bounded by a timeout. On expiry the child's process group is
/// killed, so helpers it started stop too, and the run counts as a tool
/// failure.
#[derive(Debug, Clone)]
pub struct ProcessTools {
    layout: ToolchainLayout,
    stage_timeout: Duration,
    probe_timeout: Duration,
}

impl ProcessTools {
    pub fn new(layout: ToolchainLayout, stage_timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            layout,
            stage_timeout,
            probe_timeout,
        }
    }

    fn generator(&self) -> Command {
        let mut cmd = Command::new(self.layout.interpreter());
        cmd.arg("./make.py").current_dir(self.layout.generator_dir());
        cmd
    }

    /// Arguments after `make.py` for one generator pass.
    fn generator_args(&self, import_id: ImportId, skip_outro: bool, skip_intro: bool) -> Vec<String> {
        let mut args = vec![self.layout.generator_project().to_string()];
        // The outro is shared by the whole project, so that pass is not scoped to a talk.
        if !skip_intro {
            args.push("--id".into());
            args.push(import_id.to_string());
        }
        if skip_intro {
            args.push("--skip".into());
            args.push("intro".into());
        }
        if skip_outro {
            args.push("--skip".into());
            args.push("out".into());
        }
        args.push("--imagemagick".into());
        args
    }

    async fn run(&self, tool: Tool, mut cmd: Command, timeout: Duration, quiet: bool) -> Result<()> {
        cmd.kill_on_drop(true).stdin(Stdio::null());
        // Own process group, so a timeout can reach everything the tool spawned.
        #[cfg(unix)]
        cmd.process_group(0);
        if quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        tracing::debug!(%tool, command = ?cmd.as_std(), "spawning external tool");
        let start = std::time::Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| RenderError::tool(tool, format!("failed to start: {e}")))?;

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                status.map_err(|e| RenderError::tool(tool, format!("failed to wait: {e}")))?
            }
            Err(_) => {
                kill_process_group(tool, &child);
                if let Err(e) = child.kill().await {
                    tracing::warn!(%tool, error = %e, "failed to kill timed out tool");
                }
                return Err(RenderError::tool(
                    tool,
                    format!("timed out after {timeout:?}"),
                ));
            }
        };

        tracing::debug!(%tool, %status, elapsed_ms = start.elapsed().as_millis() as u64, "external tool exited");
        if !status.success() {
            return Err(RenderError::tool(tool, format!("exited with {status}")));
        }
        Ok(())
    }
}

/// Sends SIGKILL to the child's whole process group. The child itself is
/// reaped by the caller.
#[cfg(unix)]
fn kill_process_group(tool: Tool, child: &tokio::process::Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions; the group id is the
    // pid of a child we spawned as a group leader and have not reaped yet.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        let e = std::io::Error::last_os_error();
        tracing::warn!(%tool, pid, error = %e, "failed to kill process group of timed out tool");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_tool: Tool, _child: &tokio::process::Child) {}

impl RenderTools for ProcessTools {
    async fn probe(&self) -> Result<()> {
        let mut cmd = self.generator();
        cmd.arg("--help");
        self.run(Tool::Generator, cmd, self.probe_timeout, true).await
    }

    async fn generate(&self, import_id: ImportId, skip_outro: bool, skip_intro: bool) -> Result<()> {
        let mut cmd = self.generator();
        cmd.args(self.generator_args(import_id, skip_outro, skip_intro));
        self.run(Tool::Generator, cmd, self.stage_timeout, false).await
    }

    async fn compose(&self, source_path: &Path, import_id: ImportId) -> Result<PathBuf> {
        let source = std::path::absolute(source_path)?;
        let mut cmd = Command::new(self.layout.compose_script());
        cmd.arg("--video_file")
            .arg(&source)
            .arg("--video_id")
            .arg(import_id.to_string())
            .current_dir(self.layout.root());
        self.run(Tool::Composer, cmd, self.stage_timeout, false).await?;
        Ok(self.layout.working_output(import_id))
    }
}
