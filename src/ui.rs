//! Terminal output for foreground renders: spinner and colored results.
//!
//! Uses `indicatif` for the spinner and `console` for styling. The
//! [`RenderProgress`] follows the stage of one render while it runs.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{RenderError, Result};
use crate::state_machine::{ImportId, RenderReport, Stage};

/// Spinner showing the current stage of a render.
///
/// Success is printed in green, failure in red, waiting states in yellow.
pub struct RenderProgress {
    pb: ProgressBar,
    import_id: ImportId,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RenderProgress {
    pub fn start(import_id: ImportId) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} {elapsed:.dim}")
                .expect("invalid template"),
        );
        pb.set_message(format!("talk {import_id}: waiting for toolchain"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            import_id,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn update_stage(&self, stage: Stage) {
        let label = match stage {
            Stage::None => self.yellow.apply_to("preparing".to_string()),
            other => self.yellow.apply_to(other.as_str().to_uppercase()),
        };
        self.pb
            .set_message(format!("talk {}: {label}", self.import_id));
    }

    pub fn complete(&self, result: &Result<RenderReport>) {
        self.pb.finish_and_clear();
        match result {
            Ok(report) => println!(
                "  {} Talk {} rendered in {:.1}s",
                self.green.apply_to("✓"),
                report.import_id,
                report.duration_ms as f64 / 1000.0
            ),
            Err(e) => println!("  {} Talk {} failed: {e}", self.red.apply_to("✗"), self.import_id),
        }
    }

    pub fn print_report(&self, report: &RenderReport) {
        println!();
        println!("{}", self.green.apply_to("─── Render Report ───"));
        println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
    }
}

/// One-line hint for the operator after a failure.
pub fn failure_hint(err: &RenderError) -> &'static str {
    match err {
        RenderError::Configuration(_) => "fix the toolchain setup and run `talk-render check`",
        RenderError::Conflict(_) => {
            "wait for the running render to finish, or run `talk-render recover` if none is running"
        }
        e if e.is_not_found() => "register the talk and make sure its upload exists",
        RenderError::ExternalTool { .. } | RenderError::IncompleteOutput(_) => {
            "inspect the tool output above and trigger the render again"
        }
        RenderError::Relocation { .. } => {
            "the video is rendered but was not moved to its download location"
        }
        _ => "see the log for details",
    }
}
