use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::Stage;
use crate::error::{RenderError, Result};

/// Caller-assigned identifier of one uploaded talk and its render job.
pub type ImportId = i64;

/// File name of a finished artifact inside its token directory.
pub const FINAL_FILE_NAME: &str = "final.mkv";

/// Durable render state of one uploaded talk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub import_id: ImportId,
    pub source_path: PathBuf,
    pub artifact_token: String,
    pub rendered: bool,
    pub in_progress: bool,
    pub stage: Stage,
    pub updated_at: DateTime<Utc>,
}

impl RenderJob {
    /// A freshly registered, idle job with a new artifact token.
    pub fn new(import_id: ImportId, source_path: PathBuf) -> Self {
        Self {
            import_id,
            source_path,
            artifact_token: Uuid::new_v4().to_string(),
            rendered: false,
            in_progress: false,
            stage: Stage::None,
            updated_at: Utc::now(),
        }
    }

    /// `in_progress == false` implies `stage == None`.
    pub fn is_idle(&self) -> bool {
        !self.in_progress && self.stage == Stage::None
    }

    /// Canonical location of the finished artifact.
    pub fn final_path(&self, upload_dir: &Path) -> PathBuf {
        upload_dir.join(&self.artifact_token).join(FINAL_FILE_NAME)
    }
}

pub fn validate_import_id(import_id: ImportId) -> Result<()> {
    if import_id <= 0 {
        return Err(RenderError::Validation(format!(
            "import id must be a positive integer, got {import_id}"
        )));
    }
    Ok(())
}

/// Resolves an artifact token to its finished file for download.
///
/// Only UUID tokens are accepted, so a token can never escape `upload_dir`.
pub fn artifact_path(upload_dir: &Path, token: &str) -> Result<PathBuf> {
    let token = Uuid::parse_str(token)
        .map_err(|e| RenderError::Validation(format!("invalid artifact token '{token}': {e}")))?;
    let path = upload_dir
        .join(token.hyphenated().to_string())
        .join(FINAL_FILE_NAME);
    if !path.is_file() {
        return Err(RenderError::MissingArtifact(path));
    }
    Ok(path)
}

/// Summary of a successful render, produced at the end of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderReport {
    pub import_id: ImportId,
    pub artifact_token: String,
    pub stages: Vec<Stage>,
    pub outro_generated: bool,
    pub final_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}
