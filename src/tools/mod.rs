//! Adapters for the external generation toolchain.
//!
//! The orchestrator only talks to the toolchain through [`RenderTools`], so
//! tests can substitute deterministic fakes for the real processes.

mod process;
#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::path::{Path, PathBuf};

pub use process::ProcessTools;

use crate::error::Result;
use crate::state_machine::ImportId;

pub trait RenderTools: Send + Sync + 'static {
    /// Cheap invocation proving the generator can start at all.
    fn probe(&self) -> impl Future<Output = Result<()>> + Send;

    /// Runs the intro/outro generator. With `skip_intro` set it produces the
    /// project-wide outro; with `skip_outro` set it produces the intro of
    /// `import_id`.
    fn generate(
        &self,
        import_id: ImportId,
        skip_outro: bool,
        skip_intro: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Concatenates intro, talk and outro, returning the path of the result.
    fn compose(
        &self,
        source_path: &Path,
        import_id: ImportId,
    ) -> impl Future<Output = Result<PathBuf>> + Send;
}
