use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Engine call failed: {0}")]
    EngineFailed(String),

    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("Teardown failed: {0}")]
    TeardownFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
