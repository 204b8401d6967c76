use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("user '{0}' does not exist")]
    UserNotFound(String),

    #[error("feed with URL '{0}' not found")]
    FeedNotFound(String),

    #[error("failed to create HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to fetch {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("malformed feed: {0}")]
    MalformedFeed(String),

    #[error("user '{user}' already follows '{feed}'")]
    DuplicateFollow { user: String, feed: String },

    #[error("storage constraint violated: {0}")]
    Constraint(String),

    #[error("invalid duration format: {0}")]
    InvalidDuration(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns true when the storage layer rejected a write because of a UNIQUE constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

/// Returns true when the storage layer rejected a write because a referenced row is missing.
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_foreign_key_violation())
        .unwrap_or(false)
}
