use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tokio::io::{AsyncBufReadExt, BufReader};

use talk_render::cli::{Cli, Command};
use talk_render::config::RenderConfig;
use talk_render::state_machine::{ImportId, artifact_path};
use talk_render::store::{JsonFileStore, StateStore};
use talk_render::tools::ProcessTools;
use talk_render::{RenderError, RenderOrchestrator, logging, recovery, ui};

type Orchestrator = RenderOrchestrator<JsonFileStore, ProcessTools>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", Style::new().red().bold().apply_to("error:"));
            if let Some(render_err) = e.downcast_ref::<RenderError>() {
                eprintln!("  hint: {}", ui::failure_hint(render_err));
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = RenderConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    logging::init_logging(&config.logging, cli.verbose);

    match cli.command {
        Command::Check => {
            let orchestrator = build(&config)?;
            orchestrator.ensure_ready().await?;
            println!(
                "  {} Toolchain at {} is ready",
                Style::new().green().bold().apply_to("✓"),
                config.layout()?.root().display()
            );
        }
        Command::Register {
            import_id,
            source_path,
        } => {
            let store = open_store(&config)?;
            let job = store.register(import_id, &source_path)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Render { import_id } => {
            let orchestrator = Arc::new(build(&config)?);
            render_foreground(&orchestrator, import_id).await?;
        }
        Command::Status { import_id } => {
            let store = open_store(&config)?;
            let json = match import_id {
                Some(id) => serde_json::to_string_pretty(&store.get(id)?)?,
                None => serde_json::to_string_pretty(&store.list()?)?,
            };
            println!("{json}");
        }
        Command::Recover => {
            let store = open_store(&config)?;
            let reset = recovery::sweep(&store)?;
            if reset.is_empty() {
                println!("No interrupted renders.");
            } else {
                println!("Reset {} interrupted render(s): {reset:?}", reset.len());
            }
        }
        Command::Artifact { token } => {
            let path = artifact_path(&config.upload_dir, &token)?;
            println!("{}", path.display());
        }
        Command::Serve => serve(&config).await?,
    }

    Ok(())
}

fn open_store(config: &RenderConfig) -> Result<JsonFileStore> {
    let store = JsonFileStore::open(&config.state_file).with_context(|| {
        format!(
            "failed to open render state at {}",
            config.state_file.display()
        )
    })?;
    Ok(store)
}

fn tools(config: &RenderConfig) -> Result<ProcessTools> {
    Ok(ProcessTools::new(
        config.layout()?,
        config.stage_timeout(),
        config.probe_timeout(),
    ))
}

fn build(config: &RenderConfig) -> Result<Orchestrator> {
    Ok(RenderOrchestrator::new(
        open_store(config)?,
        tools(config)?,
        config.layout()?,
        config.upload_dir.clone(),
    ))
}

/// Triggers a render and follows its stage on a spinner until it ends.
async fn render_foreground(orchestrator: &Arc<Orchestrator>, import_id: ImportId) -> Result<()> {
    let progress = ui::RenderProgress::start(import_id);
    let mut handle = orchestrator.trigger(import_id)?;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));

    let result = loop {
        tokio::select! {
            joined = &mut handle => break joined.context("render task panicked")?,
            _ = ticker.tick() => {
                if let Ok(job) = orchestrator.store().get(import_id) {
                    progress.update_stage(job.stage);
                }
            }
        }
    };

    progress.complete(&result);
    let report = result?;
    progress.print_report(&report);
    Ok(())
}

/// Service mode: one import id per stdin line, each acknowledged at once.
async fn serve(config: &RenderConfig) -> Result<()> {
    let orchestrator = RenderOrchestrator::boot(
        open_store(config)?,
        tools(config)?,
        config.layout()?,
        config.upload_dir.clone(),
    )
    .await?;

    tracing::info!("accepting render triggers on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let triggered = line
            .parse::<ImportId>()
            .map_err(|e| RenderError::Validation(format!("'{line}' is not an import id: {e}")))
            .and_then(|import_id| orchestrator.trigger(import_id));
        match triggered {
            Ok(handle) => {
                println!("accepted {line}");
                pending.push(handle);
            }
            Err(e) => println!("rejected {line}: {e}"),
        }
        pending.retain(|handle| !handle.is_finished());
    }

    tracing::info!(outstanding = pending.len(), "input closed, waiting for renders");
    for handle in pending {
        // Outcomes are logged by the render task itself.
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "render task panicked");
        }
    }
    Ok(())
}
