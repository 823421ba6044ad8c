//! Deterministic stand-ins for the external toolchain.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::RenderTools;
use crate::error::{RenderError, Result, Tool};
use crate::state_machine::ImportId;
use crate::toolchain::ToolchainLayout;

/// Where a [`FakeTools`] run should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Probe,
    Outro,
    Intro,
    Concat,
}

/// Records every call and writes the files the real tools would produce.
#[derive(Debug)]
pub struct FakeTools {
    layout: ToolchainLayout,
    fail_at: Option<FailAt>,
    omit_output: bool,
    calls: Mutex<Vec<String>>,
    probes: AtomicUsize,
}

impl FakeTools {
    pub fn new(layout: ToolchainLayout) -> Self {
        Self {
            layout,
            fail_at: None,
            omit_output: false,
            calls: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn failing_at(mut self, fail_at: FailAt) -> Self {
        self.fail_at = Some(fail_at);
        self
    }

    /// The composer reports success without writing its output.
    pub fn without_output(mut self) -> Self {
        self.omit_output = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn fails_at(&self, point: FailAt) -> bool {
        self.fail_at == Some(point)
    }
}

impl RenderTools for FakeTools {
    async fn probe(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fails_at(FailAt::Probe) {
            return Err(RenderError::tool(Tool::Generator, "exited with exit status: 1"));
        }
        Ok(())
    }

    async fn generate(&self, import_id: ImportId, skip_outro: bool, skip_intro: bool) -> Result<()> {
        if skip_intro {
            self.record("outro".to_string());
            if self.fails_at(FailAt::Outro) {
                return Err(RenderError::tool(Tool::Generator, "exited with exit status: 1"));
            }
            std::fs::write(self.layout.outro_asset(), b"outro")?;
        } else {
            assert!(skip_outro, "intro pass must skip the outro");
            self.record(format!("intro:{import_id}"));
            if self.fails_at(FailAt::Intro) {
                return Err(RenderError::tool(Tool::Generator, "exited with exit status: 1"));
            }
        }
        Ok(())
    }

    async fn compose(&self, source_path: &Path, import_id: ImportId) -> Result<PathBuf> {
        self.record(format!("compose:{import_id}:{}", source_path.display()));
        if self.fails_at(FailAt::Concat) {
            return Err(RenderError::tool(Tool::Composer, "exited with exit status: 2"));
        }
        let output = self.layout.working_output(import_id);
        if !self.omit_output {
            std::fs::create_dir_all(output.parent().unwrap())?;
            std::fs::write(&output, b"final video")?;
        }
        Ok(output)
    }
}

/// Lays out a toolchain under `root` that passes every setup check.
/// The shared outro asset is left absent.
pub fn scaffold_toolchain(root: &Path) -> ToolchainLayout {
    let layout = ToolchainLayout::new(root.join("toolchain"), "r3talks");
    std::fs::create_dir_all(layout.project_dir()).unwrap();
    std::fs::create_dir_all(layout.interpreter().parent().unwrap()).unwrap();
    std::fs::write(layout.interpreter(), b"").unwrap();

    let script = layout.compose_script();
    std::fs::create_dir_all(script.parent().unwrap()).unwrap();
    std::fs::write(&script, b"#!/bin/sh\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    layout
}
