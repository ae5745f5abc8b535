/// Shared error type used across all CodeRelay crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("spawning LLM: {0}")]
    Spawn(String),

    #[error("LLM: {0}")]
    Llm(String),

    #[error("git: {0}")]
    Git(String),

    #[error("transport: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
