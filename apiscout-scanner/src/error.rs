use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid rule pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Could not launch page driver: {0}")]
    DriverLaunch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Navigation timed out after {0} ms")]
    Timeout(u64),

    #[error("Page context lost: {0}")]
    PageClosed(String),

    #[error("Unsupported by this page driver: {0}")]
    Unsupported(&'static str),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Report write failed: {0}")]
    Report(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    /// Whether the page (or its browser target) is no longer usable and must
    /// be replaced before the crawl can continue.
    pub fn is_page_context_failure(&self) -> bool {
        match self {
            ScanError::PageClosed(_) => true,
            ScanError::Navigation(msg) | ScanError::Script(msg) | ScanError::Other(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("detached") || msg.contains("closed")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_closed_is_context_failure() {
        assert!(ScanError::PageClosed("gone".into()).is_page_context_failure());
    }

    #[test]
    fn test_driver_messages_mentioning_detached_frames() {
        assert!(ScanError::Navigation("Navigating frame was detached".into()).is_page_context_failure());
        assert!(ScanError::Other("Target closed".into()).is_page_context_failure());
    }

    #[test]
    fn test_plain_navigation_errors_are_recoverable_in_place() {
        assert!(!ScanError::Navigation("net::ERR_NAME_NOT_RESOLVED".into()).is_page_context_failure());
        assert!(!ScanError::Timeout(30000).is_page_context_failure());
        assert!(!ScanError::Unsupported("evaluate").is_page_context_failure());
    }
}
