use thiserror::Error;

pub type Result<T> = std::result::Result<T, TetherErr>;

#[derive(Debug, Error)]
pub enum TetherErr {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The config document could not be read or parsed.
    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    ExecutionState(#[from] ExecutionStateError),

    /// The output stream failed before a terminal event arrived.
    #[error("output stream fault: {0}")]
    StreamFault(String),

    #[error("no live transport to write to")]
    TransportUnavailable,

    #[error("failed to spawn model process: {0}")]
    Spawn(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unrecognized model identifier `{0}`")]
    UnknownModel(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutionStateError {
    #[error("no live process")]
    NoLiveProcess,
    #[error("wrong mode: the live process is an interactive terminal")]
    WrongMode,
}

impl TetherErr {
    pub(crate) fn spawn(error: impl Into<anyhow::Error>) -> Self {
        Self::Spawn(error.into())
    }

    pub fn execution_state(&self) -> Option<&ExecutionStateError> {
        match self {
            TetherErr::ExecutionState(err) => Some(err),
            _ => None,
        }
    }
}
