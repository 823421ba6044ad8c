//! Well-known paths inside the external toolchain checkout.

use std::path::{Path, PathBuf};

use crate::state_machine::ImportId;

/// Directory layout of the toolchain rooted at `root`.
#[derive(Debug, Clone)]
pub struct ToolchainLayout {
    root: PathBuf,
    generator_project: String,
}

impl ToolchainLayout {
    pub fn new(root: impl Into<PathBuf>, generator_project: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            generator_project: generator_project.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generator_project(&self) -> &str {
        &self.generator_project
    }

    pub fn compose_script(&self) -> PathBuf {
        self.root.join("scripts").join("create_video.sh")
    }

    pub fn generator_dir(&self) -> PathBuf {
        self.root.join("intro-outro-generator")
    }

    pub fn project_dir(&self) -> PathBuf {
        self.generator_dir().join(&self.generator_project)
    }

    /// Python interpreter of the generator's virtualenv.
    pub fn interpreter(&self) -> PathBuf {
        self.generator_dir().join("env").join("bin").join("python")
    }

    /// Outro asset shared by every talk of the project. Generated once.
    pub fn outro_asset(&self) -> PathBuf {
        self.project_dir().join("outro.ts")
    }

    /// Where the composition script leaves its result.
    pub fn working_output(&self, import_id: ImportId) -> PathBuf {
        self.root.join("output").join(format!("{import_id}_final.mkv"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_the_root() {
        let layout = ToolchainLayout::new("/srv/r3voc", "r3talks");
        assert_eq!(
            layout.compose_script(),
            PathBuf::from("/srv/r3voc/scripts/create_video.sh")
        );
        assert_eq!(
            layout.interpreter(),
            PathBuf::from("/srv/r3voc/intro-outro-generator/env/bin/python")
        );
        assert_eq!(
            layout.outro_asset(),
            PathBuf::from("/srv/r3voc/intro-outro-generator/r3talks/outro.ts")
        );
        assert_eq!(
            layout.working_output(42),
            PathBuf::from("/srv/r3voc/output/42_final.mkv")
        );
    }
}
