use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};

use super::{JobTable, StateStore};
use crate::error::{RenderError, Result};
use crate::state_machine::{ImportId, RenderJob, Stage};

/// Durable store backed by a single JSON document, safe to share between
/// processes.
///
/// Every call takes an OS lock on a sibling `.lock` file, shared for reads
/// and exclusive for mutations, and reads the document fresh under it. A
/// mutation is applied to the loaded table, written to a temporary sibling
/// file and renamed over the document before the lock is dropped, so no
/// process ever writes over a change it has not seen.
///
/// The file I/O is synchronous. A render performs a handful of small writes
/// spread over minutes of tool runtime, and the lock is held only for one
/// read-modify-write, so calls run inline on the async worker.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

/// On-disk shape of a job. The stage is kept as free text so that an
/// unknown value is reported as a validation error instead of a parse error.
#[derive(Debug, Serialize, Deserialize)]
struct StoredJob {
    import_id: ImportId,
    source_path: PathBuf,
    artifact_token: String,
    #[serde(default)]
    rendered: bool,
    #[serde(default)]
    in_progress: bool,
    #[serde(default = "default_stage")]
    stage: String,
    updated_at: DateTime<Utc>,
}

fn default_stage() -> String {
    Stage::None.as_str().to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    jobs: Vec<StoredJob>,
}

impl From<&RenderJob> for StoredJob {
    fn from(job: &RenderJob) -> Self {
        Self {
            import_id: job.import_id,
            source_path: job.source_path.clone(),
            artifact_token: job.artifact_token.clone(),
            rendered: job.rendered,
            in_progress: job.in_progress,
            stage: job.stage.as_str().to_string(),
            updated_at: job.updated_at,
        }
    }
}

impl TryFrom<StoredJob> for RenderJob {
    type Error = RenderError;

    fn try_from(stored: StoredJob) -> Result<Self> {
        let stage: Stage = stored.stage.parse()?;
        if !stored.in_progress && stage != Stage::None {
            return Err(RenderError::Validation(format!(
                "import id {} is at stage '{stage}' but not in progress",
                stored.import_id
            )));
        }
        Ok(Self {
            import_id: stored.import_id,
            source_path: stored.source_path,
            artifact_token: stored.artifact_token,
            rendered: stored.rendered,
            in_progress: stored.in_progress,
            stage,
            updated_at: stored.updated_at,
        })
    }
}

impl JsonFileStore {
    /// Opens the document at `path`, starting empty if it does not exist yet.
    ///
    /// The document is loaded once here so that a corrupt file is reported
    /// at startup rather than on the first render.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = Self {
            lock_path: path.with_extension("json.lock"),
            path,
        };
        let jobs = store.read(|table| Ok(table.jobs.len()))?;
        tracing::debug!(path = %store.path.display(), jobs, "opened render state");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<RwLock<File>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        Ok(RwLock::new(file))
    }

    fn read<T>(&self, f: impl FnOnce(&JobTable) -> Result<T>) -> Result<T> {
        let lock = self.lock_file()?;
        let _held = lock.read()?;
        f(&self.load()?)
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut JobTable) -> Result<T>) -> Result<T> {
        let mut lock = self.lock_file()?;
        let _held = lock.write()?;
        let mut table = self.load()?;
        let value = f(&mut table)?;
        self.persist(&table)?;
        Ok(value)
    }

    /// Current document contents. Caller holds the lock.
    fn load(&self) -> Result<JobTable> {
        let mut table = JobTable::default();
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(table),
            Err(e) => return Err(e.into()),
        };
        let document: StateDocument = serde_json::from_str(&contents)?;
        for stored in document.jobs {
            let job = RenderJob::try_from(stored)?;
            table.jobs.insert(job.import_id, job);
        }
        Ok(table)
    }

    /// Replaces the document. Caller holds the exclusive lock.
    fn persist(&self, table: &JobTable) -> Result<()> {
        let document = StateDocument {
            jobs: table.jobs.values().map(StoredJob::from).collect(),
        };
        let json = serde_json::to_vec_pretty(&document)?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn register(&self, import_id: ImportId, source_path: &Path) -> Result<RenderJob> {
        self.mutate(|table| table.register(import_id, source_path))
    }

    fn get(&self, import_id: ImportId) -> Result<RenderJob> {
        self.read(|table| table.get(import_id))
    }

    fn list(&self) -> Result<Vec<RenderJob>> {
        self.read(|table| Ok(table.list()))
    }

    fn set_stage(&self, import_id: ImportId, stage: Stage) -> Result<()> {
        self.mutate(|table| table.set_stage(import_id, stage))
    }

    fn set_in_progress(&self, import_id: ImportId, in_progress: bool) -> Result<()> {
        self.mutate(|table| table.set_in_progress(import_id, in_progress))
    }

    fn mark_rendered(&self, import_id: ImportId) -> Result<()> {
        self.mutate(|table| table.mark_rendered(import_id))
    }

    fn release(&self, import_id: ImportId) -> Result<()> {
        self.mutate(|table| table.release(import_id))
    }

    fn reset_stale(&self) -> Result<Vec<ImportId>> {
        self.mutate(|table| Ok(table.reset_stale()))
    }
}
