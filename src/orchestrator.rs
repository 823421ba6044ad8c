use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::error::{RenderError, Result};
use crate::flight::InFlight;
use crate::recovery;
use crate::setup::SetupValidator;
use crate::state_machine::{ImportId, RenderJob, RenderReport, Stage, StageTrace, validate_import_id};
use crate::store::StateStore;
use crate::toolchain::ToolchainLayout;
use crate::tools::RenderTools;

/// Drives a talk through OUTRO → INTRO → CONCAT and publishes the result.
pub struct RenderOrchestrator<S, T> {
    store: S,
    tools: T,
    layout: ToolchainLayout,
    upload_dir: PathBuf,
    setup: SetupValidator,
    in_flight: InFlight,
}

/// Outcome of the stage pipeline, before the job is released.
struct StagesDone {
    outro_generated: bool,
    final_path: PathBuf,
}

impl<S: StateStore, T: RenderTools> RenderOrchestrator<S, T> {
    pub fn new(store: S, tools: T, layout: ToolchainLayout, upload_dir: PathBuf) -> Self {
        Self {
            store,
            tools,
            setup: SetupValidator::new(layout.clone()),
            layout,
            upload_dir,
            in_flight: InFlight::new(),
        }
    }

    /// Service startup: validate the toolchain, then idle every render a
    /// previous process left behind. Triggers can only be issued on the
    /// returned orchestrator, so none is accepted before the sweep ran.
    pub async fn boot(
        store: S,
        tools: T,
        layout: ToolchainLayout,
        upload_dir: PathBuf,
    ) -> Result<Arc<Self>> {
        let orchestrator = Self::new(store, tools, layout, upload_dir);
        orchestrator.ensure_ready().await?;
        let reset = recovery::sweep(&orchestrator.store)?;
        tracing::info!(reset = reset.len(), "crash recovery sweep complete");
        Ok(Arc::new(orchestrator))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn ensure_ready(&self) -> Result<()> {
        self.setup.ensure_ready(&self.tools).await
    }

    /// Starts a detached render and returns immediately.
    ///
    /// Fails right away with [`RenderError::Conflict`] if a render of the
    /// same id is still running. The handle resolves to the render outcome,
    /// which is also logged.
    pub fn trigger(self: &Arc<Self>, import_id: ImportId) -> Result<JoinHandle<Result<RenderReport>>> {
        validate_import_id(import_id)?;
        let guard = self.in_flight.acquire(import_id)?;
        let this = Arc::clone(self);
        tracing::info!(import_id, "render accepted");

        Ok(tokio::spawn(async move {
            let import_id = guard.import_id();
            let result = this.run(import_id).await;
            drop(guard);
            match &result {
                Ok(report) => tracing::info!(
                    import_id,
                    duration_ms = report.duration_ms,
                    path = %report.final_path.display(),
                    "render finished"
                ),
                Err(e) => tracing::error!(import_id, kind = %e.kind(), error = %e, "render failed"),
            }
            result
        }))
    }

    /// Renders in the caller's task. Subject to the same single-flight rule
    /// as [`trigger`](Self::trigger).
    pub async fn render_talk(&self, import_id: ImportId) -> Result<RenderReport> {
        let _guard = self.in_flight.acquire(import_id)?;
        self.run(import_id).await
    }

    async fn run(&self, import_id: ImportId) -> Result<RenderReport> {
        self.ensure_ready().await?;

        let job = self.store.get(import_id)?;
        if !job.source_path.exists() {
            return Err(RenderError::MissingArtifact(job.source_path));
        }

        let started_at = Utc::now();
        // Fails with Conflict when another process already claimed the job;
        // nothing is released in that case.
        self.store.set_in_progress(import_id, true)?;

        let mut trace = StageTrace::new();
        let result = self.run_stages(&job, &mut trace).await;

        // Success and failure both end idle; the first error is the one reported.
        let released = self.store.release(import_id);
        trace.advance(Stage::None)?;
        let done = match (result, released) {
            (Ok(done), Ok(())) => done,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), released) => {
                if let Err(release_err) = released {
                    tracing::error!(import_id, error = %release_err, "failed to release job after error");
                }
                return Err(e);
            }
        };

        let completed_at = Utc::now();
        Ok(RenderReport {
            import_id,
            artifact_token: job.artifact_token,
            stages: trace.into_history(),
            outro_generated: done.outro_generated,
            final_path: done.final_path,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        })
    }

    async fn run_stages(&self, job: &RenderJob, trace: &mut StageTrace) -> Result<StagesDone> {
        let import_id = job.import_id;

        let outro_generated = if self.layout.outro_asset().exists() {
            tracing::debug!(import_id, "outro asset present, skipping outro stage");
            false
        } else {
            self.enter(import_id, trace, Stage::Outro)?;
            self.tools.generate(import_id, false, true).await?;
            true
        };

        self.enter(import_id, trace, Stage::Intro)?;
        self.tools.generate(import_id, true, false).await?;

        self.enter(import_id, trace, Stage::Concat)?;
        let output = self.tools.compose(&job.source_path, import_id).await?;
        if !output.is_file() {
            return Err(RenderError::IncompleteOutput(output));
        }

        self.store.mark_rendered(import_id)?;

        let final_path = job.final_path(&self.upload_dir);
        relocate(&output, &final_path)?;

        Ok(StagesDone {
            outro_generated,
            final_path,
        })
    }

    fn enter(&self, import_id: ImportId, trace: &mut StageTrace, stage: Stage) -> Result<()> {
        let from = trace.current();
        trace.advance(stage)?;
        self.store.set_stage(import_id, stage)?;
        tracing::info!(import_id, %from, %stage, "entering stage");
        Ok(())
    }
}

/// Moves the composed file to its token-addressed home.
fn relocate(from: &Path, to: &Path) -> Result<()> {
    let wrap = |source| RenderError::Relocation {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    fs::rename(from, to).map_err(wrap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::tools::testing::{FailAt, FakeTools, scaffold_toolchain};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Store mutations as seen by an observer polling the store.
    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        InProgress(bool),
        Stage(Stage),
        Rendered,
    }

    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStore,
        events: Mutex<Vec<Event>>,
    }

    impl RecordingStore {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn stages(&self) -> Vec<Stage> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Stage(s) => Some(s),
                    _ => None,
                })
                .collect()
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl StateStore for RecordingStore {
        fn register(&self, import_id: ImportId, source_path: &Path) -> Result<RenderJob> {
            self.inner.register(import_id, source_path)
        }

        fn get(&self, import_id: ImportId) -> Result<RenderJob> {
            self.inner.get(import_id)
        }

        fn list(&self) -> Result<Vec<RenderJob>> {
            self.inner.list()
        }

        fn set_stage(&self, import_id: ImportId, stage: Stage) -> Result<()> {
            self.inner.set_stage(import_id, stage)?;
            self.push(Event::Stage(stage));
            Ok(())
        }

        fn set_in_progress(&self, import_id: ImportId, in_progress: bool) -> Result<()> {
            self.inner.set_in_progress(import_id, in_progress)?;
            self.push(Event::InProgress(in_progress));
            Ok(())
        }

        fn mark_rendered(&self, import_id: ImportId) -> Result<()> {
            self.inner.mark_rendered(import_id)?;
            self.push(Event::Rendered);
            Ok(())
        }

        fn release(&self, import_id: ImportId) -> Result<()> {
            self.inner.release(import_id)?;
            self.push(Event::InProgress(false));
            self.push(Event::Stage(Stage::None));
            Ok(())
        }

        fn reset_stale(&self) -> Result<Vec<ImportId>> {
            self.inner.reset_stale()
        }
    }

    struct Fixture {
        tmp: TempDir,
        layout: ToolchainLayout,
        upload_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let layout = scaffold_toolchain(tmp.path());
            let upload_dir = tmp.path().join("uploads");
            Self {
                tmp,
                layout,
                upload_dir,
            }
        }

        /// A registered job whose raw upload exists on disk.
        fn register(&self, store: &impl StateStore, import_id: ImportId) -> RenderJob {
            let source = self.tmp.path().join("raw").join(format!("{import_id}.mp4"));
            fs::create_dir_all(source.parent().unwrap()).unwrap();
            fs::write(&source, b"raw talk").unwrap();
            store.register(import_id, &source).unwrap()
        }

        fn tools(&self) -> FakeTools {
            FakeTools::new(self.layout.clone())
        }

        fn orchestrator<S: StateStore>(
            &self,
            store: S,
            tools: FakeTools,
        ) -> Arc<RenderOrchestrator<S, FakeTools>> {
            Arc::new(RenderOrchestrator::new(
                store,
                tools,
                self.layout.clone(),
                self.upload_dir.clone(),
            ))
        }
    }

    #[tokio::test]
    async fn full_render_walks_every_stage() {
        let fx = Fixture::new();
        let store = RecordingStore::default();
        let job = fx.register(&store, 42);
        let orch = fx.orchestrator(store, fx.tools());

        let report = orch.render_talk(42).await.unwrap();

        assert_eq!(
            orch.store().stages(),
            vec![Stage::Outro, Stage::Intro, Stage::Concat, Stage::None]
        );
        assert_eq!(
            report.stages,
            vec![Stage::Outro, Stage::Intro, Stage::Concat, Stage::None]
        );
        assert!(report.outro_generated);

        let after = orch.store().get(42).unwrap();
        assert!(after.rendered);
        assert!(after.is_idle());

        let final_path = fx.upload_dir.join(&job.artifact_token).join("final.mkv");
        assert_eq!(report.final_path, final_path);
        assert!(final_path.is_file());
        assert!(!fx.layout.working_output(42).exists());
    }

    #[tokio::test]
    async fn existing_outro_skips_outro_stage() {
        let fx = Fixture::new();
        fs::write(fx.layout.outro_asset(), b"outro").unwrap();
        let store = RecordingStore::default();
        fx.register(&store, 42);
        let orch = fx.orchestrator(store, fx.tools());

        let report = orch.render_talk(42).await.unwrap();

        assert!(!report.outro_generated);
        assert_eq!(
            orch.store().stages(),
            vec![Stage::Intro, Stage::Concat, Stage::None]
        );
        let calls = orch.tools.calls();
        assert_eq!(calls[0], "intro:42");
        assert!(calls[1].starts_with("compose:42:"));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found_without_mutation() {
        let fx = Fixture::new();
        let store = RecordingStore::default();
        fx.register(&store, 1);
        let before = store.list().unwrap();
        let orch = fx.orchestrator(store, fx.tools());

        let err = orch.render_talk(99).await.unwrap_err();

        assert!(matches!(err, RenderError::NotFound(99)));
        assert!(orch.store().events().is_empty());
        assert_eq!(orch.store().list().unwrap(), before);
        assert!(orch.tools.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_source_fails_before_in_progress() {
        let fx = Fixture::new();
        let store = RecordingStore::default();
        store.register(42, &fx.tmp.path().join("raw/gone.mp4")).unwrap();
        let orch = fx.orchestrator(store, fx.tools());

        let err = orch.render_talk(42).await.unwrap_err();

        assert!(matches!(err, RenderError::MissingArtifact(_)));
        assert!(err.is_not_found());
        assert!(orch.store().events().is_empty());
        assert!(orch.store().get(42).unwrap().is_idle());
    }

    async fn assert_rolls_back(fail_at: FailAt, rendered_before: bool) -> RenderError {
        let fx = Fixture::new();
        let store = RecordingStore::default();
        fx.register(&store, 42);
        if rendered_before {
            store.inner.mark_rendered(42).unwrap();
        }
        let orch = fx.orchestrator(store, fx.tools().failing_at(fail_at));

        let err = orch.render_talk(42).await.unwrap_err();

        let job = orch.store().get(42).unwrap();
        assert!(!job.in_progress, "{fail_at:?}");
        assert_eq!(job.stage, Stage::None, "{fail_at:?}");
        assert_eq!(job.rendered, rendered_before, "{fail_at:?}");
        assert!(!orch.store().events().contains(&Event::Rendered));
        err
    }

    #[tokio::test]
    async fn stage_failures_roll_back_to_idle() {
        for fail_at in [FailAt::Outro, FailAt::Intro, FailAt::Concat] {
            for rendered_before in [false, true] {
                let err = assert_rolls_back(fail_at, rendered_before).await;
                assert!(matches!(err, RenderError::ExternalTool { .. }));
            }
        }
    }

    #[tokio::test]
    async fn composer_failure_surfaces_tool_error() {
        let fx = Fixture::new();
        let store = RecordingStore::default();
        fx.register(&store, 42);
        let orch = fx.orchestrator(store, fx.tools().failing_at(FailAt::Concat));

        let err = orch.render_talk(42).await.unwrap_err();

        assert!(matches!(
            err,
            RenderError::ExternalTool {
                tool: crate::error::Tool::Composer,
                ..
            }
        ));
        let job = orch.store().get(42).unwrap();
        assert!(!job.rendered);
        assert!(job.is_idle());
        assert_eq!(
            orch.store().stages(),
            vec![Stage::Outro, Stage::Intro, Stage::Concat, Stage::None]
        );
    }

    #[tokio::test]
    async fn missing_output_is_incomplete() {
        let fx = Fixture::new();
        let store = RecordingStore::default();
        fx.register(&store, 42);
        let orch = fx.orchestrator(store, fx.tools().without_output());

        let err = orch.render_talk(42).await.unwrap_err();

        assert!(matches!(err, RenderError::IncompleteOutput(_)));
        let job = orch.store().get(42).unwrap();
        assert!(!job.rendered);
        assert!(job.is_idle());
    }

    #[tokio::test]
    async fn configuration_error_touches_nothing() {
        let fx = Fixture::new();
        let store = RecordingStore::default();
        fx.register(&store, 42);
        let orch = fx.orchestrator(store, fx.tools().failing_at(FailAt::Probe));

        let err = orch.render_talk(42).await.unwrap_err();

        assert!(matches!(err, RenderError::Configuration(_)));
        assert!(orch.store().events().is_empty());
        assert!(orch.tools.calls().is_empty());
    }

    #[tokio::test]
    async fn relocation_failure_keeps_rendered() {
        let fx = Fixture::new();
        // A plain file where the upload directory should be.
        fs::write(&fx.upload_dir, b"not a directory").unwrap();
        let store = RecordingStore::default();
        fx.register(&store, 42);
        let orch = fx.orchestrator(store, fx.tools());

        let err = orch.render_talk(42).await.unwrap_err();

        assert!(matches!(err, RenderError::Relocation { .. }));
        let job = orch.store().get(42).unwrap();
        assert!(job.rendered);
        assert!(job.is_idle());
        assert!(fx.layout.working_output(42).is_file());
    }

    #[tokio::test]
    async fn setup_runs_once_per_orchestrator() {
        let fx = Fixture::new();
        let store = MemoryStore::new();
        fx.register(&store, 1);
        fx.register(&store, 2);
        let orch = fx.orchestrator(store, fx.tools());

        orch.render_talk(1).await.unwrap();
        orch.render_talk(2).await.unwrap();

        assert_eq!(orch.tools.probe_count(), 1);
    }

    #[tokio::test]
    async fn retried_render_starts_from_outro_check() {
        let fx = Fixture::new();
        let store = MemoryStore::new();
        fx.register(&store, 42);

        let failing = fx.orchestrator(store, fx.tools().failing_at(FailAt::Intro));
        assert!(failing.render_talk(42).await.is_err());
        // The outro from the failed attempt is reused.
        assert!(fx.layout.outro_asset().exists());

        let store = MemoryStore::new();
        fx.register(&store, 42);
        let orch = fx.orchestrator(store, fx.tools());
        let report = orch.render_talk(42).await.unwrap();
        assert!(!report.outro_generated);
        assert_eq!(orch.tools.calls()[0], "intro:42");
    }

    #[tokio::test]
    async fn second_trigger_for_same_id_is_rejected() {
        let fx = Fixture::new();
        let store = MemoryStore::new();
        fx.register(&store, 42);
        let orch = fx.orchestrator(store, fx.tools());

        // On the current-thread test runtime the first task cannot make
        // progress before we await it, so it is still in flight here.
        let first = orch.trigger(42).unwrap();
        let second = orch.trigger(42);
        assert!(matches!(second, Err(RenderError::Conflict(42))));
        assert!(matches!(
            orch.render_talk(42).await,
            Err(RenderError::Conflict(42))
        ));

        let report = first.await.unwrap().unwrap();
        assert_eq!(report.import_id, 42);
        let intro_runs = orch
            .tools
            .calls()
            .iter()
            .filter(|c| c.as_str() == "intro:42")
            .count();
        assert_eq!(intro_runs, 1);

        // Released once the first render finished.
        let again = orch.trigger(42).unwrap();
        again.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn different_ids_render_concurrently() {
        let fx = Fixture::new();
        let store = MemoryStore::new();
        fx.register(&store, 1);
        fx.register(&store, 2);
        let orch = fx.orchestrator(store, fx.tools());

        let a = orch.trigger(1).unwrap();
        let b = orch.trigger(2).unwrap();
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert!(orch.store().get(1).unwrap().rendered);
        assert!(orch.store().get(2).unwrap().rendered);
    }

    #[tokio::test]
    async fn trigger_rejects_non_positive_ids() {
        let fx = Fixture::new();
        let orch = fx.orchestrator(MemoryStore::new(), fx.tools());
        assert!(matches!(orch.trigger(0), Err(RenderError::Validation(_))));
        assert!(matches!(orch.trigger(-3), Err(RenderError::Validation(_))));
    }

    #[tokio::test]
    async fn boot_sweeps_before_accepting_triggers() {
        let fx = Fixture::new();
        let store = MemoryStore::new();
        fx.register(&store, 42);
        store.set_in_progress(42, true).unwrap();
        store.set_stage(42, Stage::Concat).unwrap();

        let orch = RenderOrchestrator::boot(
            store,
            fx.tools(),
            fx.layout.clone(),
            fx.upload_dir.clone(),
        )
        .await
        .unwrap();

        let job = orch.store().get(42).unwrap();
        assert!(job.is_idle());
        assert!(!job.rendered);

        orch.trigger(42).unwrap().await.unwrap().unwrap();
        assert!(orch.store().get(42).unwrap().rendered);
    }

    #[tokio::test]
    async fn job_claimed_elsewhere_is_a_conflict() {
        let fx = Fixture::new();
        let store = MemoryStore::new();
        fx.register(&store, 42);
        // Claimed by a render running in another process.
        store.set_in_progress(42, true).unwrap();
        store.set_stage(42, Stage::Intro).unwrap();
        let orch = fx.orchestrator(store, fx.tools());

        let err = orch.render_talk(42).await.unwrap_err();
        assert!(matches!(err, RenderError::Conflict(42)));

        let job = orch.store().get(42).unwrap();
        assert!(job.in_progress);
        assert_eq!(job.stage, Stage::Intro);
        assert!(orch.tools.calls().is_empty());
    }

    #[tokio::test]
    async fn boot_fails_on_broken_toolchain() {
        let fx = Fixture::new();
        let store = MemoryStore::new();
        fx.register(&store, 42);
        store.set_in_progress(42, true).unwrap();

        let result = RenderOrchestrator::boot(
            store,
            fx.tools().failing_at(FailAt::Probe),
            fx.layout.clone(),
            fx.upload_dir.clone(),
        )
        .await;
        assert!(matches!(result, Err(RenderError::Configuration(_))));
    }
}
