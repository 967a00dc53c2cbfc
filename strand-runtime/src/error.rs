use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Task(#[from] strand_core::Error),

    #[error("Native task failed: {0}")]
    Join(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Join(error.to_string())
    }
}

/// Lets dispatched operations be used with `?` inside strand task bodies.
impl From<Error> for strand_core::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Task(error) => error,
            other => anyhow::Error::new(other).into(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Self::Task(strand_core::Error::from(error))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
