//! Inbound line classification.
//!
//! One pure function turns a raw chat line into either a bridge command or
//! LLM input. Unrecognised slash-words are deliberately passed through to
//! the LLM so users can drive the agent's own slash commands, and the `::`
//! prefix escapes a line into a literal leading slash for the cases where
//! the agent's command happens to collide with a bridge command.

/// The fixed bridge command set. Matching is case-insensitive.
pub const COMMANDS: &[&str] = &[
    "status",
    "cancel",
    "restart",
    "help",
    "select",
    "worktrees",
    "list-repos",
    "remove-repo",
    "clone",
    "add-worktree",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// A bridge command with its lowercased name and argument rest.
    Command { name: String, args: String },
    /// Input for the LLM session.
    Llm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub kind: RouteKind,
    /// The text to forward when the route is LLM-bound; the original
    /// trimmed line for commands.
    pub raw: String,
}

/// Classify one inbound line.
pub fn parse(input: &str) -> Route {
    let trimmed = input.trim();

    if let Some(rest) = trimmed.strip_prefix("::") {
        return Route {
            kind: RouteKind::Llm,
            raw: format!("/{rest}"),
        };
    }

    if let Some(rest) = trimmed.strip_prefix('/') {
        let (word, args) = match rest.split_once(' ') {
            Some((w, a)) => (w, a.trim()),
            None => (rest, ""),
        };
        let name = word.to_ascii_lowercase();
        if COMMANDS.contains(&name.as_str()) {
            return Route {
                kind: RouteKind::Command {
                    name,
                    args: args.to_string(),
                },
                raw: trimmed.to_string(),
            };
        }
    }

    Route {
        kind: RouteKind::Llm,
        raw: trimmed.to_string(),
    }
}
