//! Configuration loaded from `talk-render.toml`.
//!
//! [`RenderConfig`] holds every tunable. Keys missing from the file fall back
//! to defaults. The `R3VOC_REPO_LOCATION` environment variable takes
//! precedence over `toolchain_root` from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RenderError, Result};
use crate::toolchain::ToolchainLayout;

pub const DEFAULT_CONFIG_FILE: &str = "talk-render.toml";
pub const TOOLCHAIN_ROOT_ENV: &str = "R3VOC_REPO_LOCATION";

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// Checkout containing the generator and the composition script.
    #[serde(default)]
    pub toolchain_root: Option<PathBuf>,

    /// Root of the artifact-token addressed download tree.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// JSON document holding the render state of every job.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Project name passed to the generator.
    #[serde(default = "default_generator_project")]
    pub generator_project: String,

    /// Upper bound for a single generator or composer run.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Upper bound for the generator smoke test during setup validation.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("uploads").join("render-state.json")
}

fn default_generator_project() -> String {
    "r3talks".to_string()
}

// Two hours: a full-length talk can take a while to compose.
fn default_stage_timeout_secs() -> u64 {
    7200
}

fn default_probe_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            toolchain_root: None,
            upload_dir: default_upload_dir(),
            state_file: default_state_file(),
            generator_project: default_generator_project(),
            stage_timeout_secs: default_stage_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RenderConfig {
    /// Loads `path`, or `talk-render.toml` in the current directory.
    /// Uses defaults if the file does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        if let Some(root) = std::env::var_os(TOOLCHAIN_ROOT_ENV).filter(|v| !v.is_empty()) {
            config.toolchain_root = Some(PathBuf::from(root));
        }

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// The toolchain layout. Rendering is impossible without a toolchain
    /// root, so its absence is a configuration error.
    pub fn layout(&self) -> Result<ToolchainLayout> {
        let root = self.toolchain_root.as_ref().ok_or_else(|| {
            RenderError::Configuration(format!(
                "toolchain root is not configured; set {TOOLCHAIN_ROOT_ENV} or `toolchain_root` in {DEFAULT_CONFIG_FILE}"
            ))
        })?;
        Ok(ToolchainLayout::new(root, &self.generator_project))
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
