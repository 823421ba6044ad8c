//! One-time validation of the external toolchain.

use std::path::Path;

use tokio::sync::Mutex;

use crate::error::{RenderError, Result};
use crate::toolchain::ToolchainLayout;
use crate::tools::RenderTools;

/// Checks the toolchain before the first render and remembers success.
///
/// A failed validation is not remembered, so the next call runs all checks
/// again once an operator has fixed the environment. The lock serialises
/// concurrent callers so at most one validation pass runs at a time.
#[derive(Debug)]
pub struct SetupValidator {
    layout: ToolchainLayout,
    ready: Mutex<bool>,
}

impl SetupValidator {
    pub fn new(layout: ToolchainLayout) -> Self {
        Self {
            layout,
            ready: Mutex::new(false),
        }
    }

    pub async fn ensure_ready<T: RenderTools>(&self, tools: &T) -> Result<()> {
        let mut ready = self.ready.lock().await;
        if *ready {
            return Ok(());
        }

        self.check_layout()?;
        tools.probe().await.map_err(|e| {
            RenderError::Configuration(format!(
                "generator smoke test failed in {}: {e}",
                self.layout.generator_dir().display()
            ))
        })?;

        *ready = true;
        tracing::info!(root = %self.layout.root().display(), "toolchain setup looks good");
        Ok(())
    }

    /// Filesystem preconditions, reported in order; the first unmet one wins.
    fn check_layout(&self) -> Result<()> {
        let root = self.layout.root();
        if !root.is_dir() {
            return Err(config_error(format!(
                "toolchain root {} does not exist",
                root.display()
            )));
        }

        let script = self.layout.compose_script();
        if !script.is_file() {
            return Err(config_error(format!(
                "composition script {} does not exist",
                script.display()
            )));
        }
        if !is_executable(&script) {
            return Err(config_error(format!(
                "composition script {} is not executable",
                script.display()
            )));
        }

        let generator = self.layout.generator_dir();
        if !generator.is_dir() {
            return Err(config_error(format!(
                "generator directory {} does not exist",
                generator.display()
            )));
        }
        let project = self.layout.project_dir();
        if !project.is_dir() {
            return Err(config_error(format!(
                "generator project {} does not exist",
                project.display()
            )));
        }

        let interpreter = self.layout.interpreter();
        if !interpreter.exists() {
            return Err(config_error(format!(
                "generator interpreter {} does not exist; create the virtualenv with \
                 `virtualenv --python=$(which python3.9) env` in {}",
                interpreter.display(),
                generator.display()
            )));
        }

        Ok(())
    }
}

fn config_error(message: String) -> RenderError {
    tracing::error!(%message, "toolchain setup check failed");
    RenderError::Configuration(message)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
