use thiserror::Error;

/// Faults that end a serving loop.
///
/// Per-call failures never surface here; they become `Failure` outcomes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The session channel failed to receive or send.
    #[error(transparent)]
    Channel(#[from] channel::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
