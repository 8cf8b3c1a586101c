use std::path::PathBuf;

use thiserror::Error;

use crate::command::StageRole;

#[derive(Error, Debug)]
pub enum GxsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Profile error: {0}")]
    Profile(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The executable could not be resolved or the OS refused to spawn it.
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A stage exited with the sentinel code reserved for a bad command line.
    #[error("Invalid command line for {role} stage")]
    InvalidInvocation { role: StageRole },

    #[error("Input file no longer exists: {}", .0.display())]
    MissingInputFile(PathBuf),

    #[error("{role} stage failed with {}", exit_label(.code))]
    StageFailed { role: StageRole, code: Option<i32> },

    #[error("Process is not running")]
    NotRunning,

    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Metadata lookup error: {0}")]
    Metadata(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, GxsError>;
