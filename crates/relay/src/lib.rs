//! CodeRelay orchestrator.
//!
//! Owns the chat providers, the per-repo session registry, and the
//! background tasks (inbound dispatch per provider, one output pump per
//! session, the idle reaper). Everything else is wiring: `bootstrap`
//! builds the state, `cli` parses the command line.

pub mod bootstrap;
pub mod cli;
pub mod commands;
pub mod runtime;
pub mod state;
