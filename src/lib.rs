//! Render orchestration for uploaded conference talks.
//!
//! A render drives the external intro/outro generator and the composition
//! script through the stages in [`state_machine::Stage`], keeping durable
//! progress in a [`store::StateStore`] so interrupted renders can be
//! recovered at the next startup.

pub mod cli;
pub mod config;
pub mod error;
pub mod flight;
pub mod logging;
pub mod orchestrator;
pub mod recovery;
pub mod setup;
pub mod state_machine;
pub mod store;
pub mod toolchain;
pub mod tools;
pub mod ui;

pub use error::{RenderError, Result};
pub use orchestrator::RenderOrchestrator;
