use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::state_machine::ImportId;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No render job registered for import id {0}")]
    NotFound(ImportId),

    #[error("Source artifact does not exist at {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("{tool} failed: {reason}")]
    ExternalTool { tool: Tool, reason: String },

    #[error("{} reported success but produced no output at {}", Tool::Composer, .0.display())]
    IncompleteOutput(PathBuf),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("A render for import id {0} is already in progress")]
    Conflict(ImportId),

    #[error("Import id {0} is already registered")]
    AlreadyRegistered(ImportId),

    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    Relocation {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RenderError {
    /// Classifies the error for operator diagnostics.
    pub fn kind(&self) -> FailureKind {
        match self {
            RenderError::NotFound(_)
            | RenderError::MissingArtifact(_)
            | RenderError::Validation(_)
            | RenderError::Conflict(_)
            | RenderError::AlreadyRegistered(_) => FailureKind::Caller,
            RenderError::ExternalTool { .. } | RenderError::IncompleteOutput(_) => {
                FailureKind::Tool
            }
            RenderError::Configuration(_)
            | RenderError::Relocation { .. }
            | RenderError::Io(_)
            | RenderError::Json(_)
            | RenderError::Toml(_) => FailureKind::Environment,
        }
    }

    /// Unknown identifiers and missing source artifacts both count as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, RenderError::NotFound(_) | RenderError::MissingArtifact(_))
    }

    pub(crate) fn tool(tool: Tool, reason: impl Into<String>) -> Self {
        RenderError::ExternalTool {
            tool,
            reason: reason.into(),
        }
    }
}

/// The two external programs a render drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Generator,
    Composer,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Generator => write!(f, "intro/outro generator"),
            Tool::Composer => write!(f, "composition script"),
        }
    }
}

/// Who has to act before a failed operation can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// The caller asked for something invalid (unknown id, double trigger).
    Caller,
    /// An external tool exited abnormally or left no output; re-triggering may help.
    Tool,
    /// The host environment is broken (configuration, filesystem).
    Environment,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Caller => write!(f, "Caller"),
            FailureKind::Tool => write!(f, "Tool"),
            FailureKind::Environment => write!(f, "Environment"),
        }
    }
}
