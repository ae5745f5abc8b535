//! Chat surface capability.
//!
//! The orchestrator only sees the [`ChatProvider`] trait. Real
//! implementations: [`DiscordProvider`] (serenity gateway bot) and
//! [`TerminalProvider`] (local readline REPL). [`testing::MockProvider`]
//! is the scripted double used by the relay crate's tests.

mod discord;
mod terminal;
pub mod testing;
mod traits;

pub use discord::DiscordProvider;
pub use terminal::TerminalProvider;
pub use traits::ChatProvider;
