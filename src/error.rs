//! Domain error taxonomy for check-in runs.

use std::path::PathBuf;

use thiserror::Error;

/// Stable error codes written to history rows, log events, and email
/// subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The check-in page did not finish loading in time.
    NavTimeout,
    /// The session is no longer authenticated; the operator must re-run the
    /// manual authorize flow.
    NeedAuth,
    /// No configured trigger selector matched; the site's markup changed.
    SelectorChanged,
    /// Post-click state could not be classified, or an unclassified failure.
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NavTimeout => "NAV_TIMEOUT",
            ErrorCode::NeedAuth => "NEED_AUTH",
            ErrorCode::SelectorChanged => "SELECTOR_CHANGED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed check-in attempt.
///
/// Carries the machine-readable code, whether the orchestrator may retry,
/// and the failure screenshot path once one has been captured.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct CheckinError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub screenshot: Option<PathBuf>,
}

impl CheckinError {
    fn new(code: ErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
            screenshot: None,
        }
    }

    pub fn nav_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NavTimeout, message, true)
    }

    pub fn need_auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NeedAuth, message, false)
    }

    pub fn selector_changed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SelectorChanged, message, false)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message, true)
    }

    pub fn with_screenshot(mut self, path: PathBuf) -> Self {
        self.screenshot = Some(path);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability_per_code() {
        assert!(CheckinError::nav_timeout("x").retryable);
        assert!(CheckinError::unknown("x").retryable);
        assert!(!CheckinError::need_auth("x").retryable);
        assert!(!CheckinError::selector_changed("x").retryable);
    }

    #[test]
    fn test_display_carries_code_and_message() {
        let err = CheckinError::selector_changed("unable to locate a check-in trigger");
        assert_eq!(
            err.to_string(),
            "SELECTOR_CHANGED: unable to locate a check-in trigger"
        );
    }

    #[test]
    fn test_with_screenshot_attaches_path() {
        let err = CheckinError::unknown("boom").with_screenshot(PathBuf::from("/tmp/shot.png"));
        assert_eq!(err.screenshot.as_deref(), Some(std::path::Path::new("/tmp/shot.png")));
    }
}
