use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};

/// The render pipeline steps of a single job.
///
/// A render walks: NONE → [OUTRO →] INTRO → CONCAT → NONE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Idle; both the initial and the terminal marker.
    #[default]
    None,
    Outro,
    Intro,
    Concat,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::None => "none",
            Stage::Outro => "outro",
            Stage::Intro => "intro",
            Stage::Concat => "concat",
        }
    }

    /// Whether a render currently at `self` may move on to `next`.
    ///
    /// Returning to `None` is always allowed so that failures can unwind
    /// from any stage.
    pub fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (_, Stage::None)
                | (Stage::None, Stage::Outro)
                | (Stage::None, Stage::Intro)
                | (Stage::Outro, Stage::Intro)
                | (Stage::Intro, Stage::Concat)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Stage::None),
            "outro" => Ok(Stage::Outro),
            "intro" => Ok(Stage::Intro),
            "concat" => Ok(Stage::Concat),
            other => Err(RenderError::Validation(format!(
                "stage must be one of 'none', 'outro', 'intro' or 'concat', got '{other}'"
            ))),
        }
    }
}

/// Ordered record of the stages one render attempt went through.
#[derive(Debug, Clone, Default)]
pub struct StageTrace {
    current: Stage,
    history: Vec<Stage>,
}

impl StageTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// Moves to `next`, rejecting transitions that skip or reorder stages.
    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if !self.current.can_advance_to(next) {
            return Err(RenderError::Validation(format!(
                "illegal stage transition {} -> {next}",
                self.current
            )));
        }
        self.current = next;
        self.history.push(next);
        Ok(())
    }

    #[cfg(test)]
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn into_history(self) -> Vec<Stage> {
        self.history
    }
}
