//! The LLM capability: a long-lived interactive coding-agent subprocess.
//!
//! The orchestrator only sees the [`LlmAgent`] trait. The real
//! implementation ([`CliAgent`]) spawns the configured CLI binary with
//! piped stdio; [`testing::MockAgent`] is the scripted double used by the
//! relay crate's tests.

mod cli;
pub mod testing;
mod traits;

pub use cli::CliAgent;
pub use traits::{LlmAgent, SpawnSpec};

use std::sync::Arc;

use cr_domain::Result;

/// Build an agent for the given spawn spec. The backend name is carried
/// for display; all backends currently share the CLI subprocess shape.
pub fn create_agent(spec: &SpawnSpec) -> Result<Arc<dyn LlmAgent>> {
    Ok(Arc::new(CliAgent::new(spec)))
}
