mod job;
mod stage;

pub use job::{
    FINAL_FILE_NAME, ImportId, RenderJob, RenderReport, artifact_path, validate_import_id,
};
pub use stage::{Stage, StageTrace};
