//! Error types for the chatbot core

use thiserror::Error;

/// Main error type for the chatbot core
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid user pattern: {0}")]
    InvalidUser(String),

    #[error("Invalid connection info: {0}")]
    ConnectInfo(String),

    #[error("No more available nicknames for {server}:{port}")]
    NoMoreNicks { server: String, port: u16 },

    #[error("Module {name} failed: {reason}")]
    Module { name: String, reason: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a module error from anything printable
    pub fn module(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Module {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends the connection it was raised on
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NoMoreNicks { .. } | Error::Io(_) | Error::Tls(_) | Error::Connection(_)
        )
    }
}
