use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timed out waiting for condition: {0}")]
    ConditionTimeout(String),

    #[error("JavaScript execution failed: {0}")]
    JavaScriptFailed(String),

    #[error("Screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("Element '{0}' has no session attached")]
    SessionNotAttached(String),

    #[error("No download folder configured and none could be derived from the session")]
    DownloadFolderUnresolved,

    #[error("The download did not start within {0:?}")]
    DownloadNeverStarted(Duration),

    #[error("The download was not completed within {0:?}")]
    DownloadDidNotFinish(Duration),

    #[error("{0} new entries qualify as the finished download, refusing to guess")]
    AmbiguousDownload(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chrome error: {0}")]
    ChromeError(String),

    #[error("Anyhow error: {0}")]
    AnyhowError(String),
}

pub type Result<T> = std::result::Result<T, BrowserError>;

// Convert anyhow::Error to BrowserError
impl From<anyhow::Error> for BrowserError {
    fn from(err: anyhow::Error) -> Self {
        BrowserError::AnyhowError(err.to_string())
    }
}
