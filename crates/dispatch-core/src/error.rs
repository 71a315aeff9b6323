use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the dispatch layer
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected configuration, caught before anything starts
    #[error("Invalid dispatch configuration: {0}")]
    InvalidConfig(String),

    /// A lane index outside the configured lane count
    #[error("Lane {lane} out of range ({lanes} lanes)")]
    LaneOutOfRange { lane: usize, lanes: usize },

    /// Start called on a component that is already running
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// An operation that needs a running component found it stopped
    #[error("{0} is not running")]
    NotRunning(&'static str),

    /// OS refused to give us a thread
    #[error("Thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}
