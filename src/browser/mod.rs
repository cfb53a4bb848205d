//! Browser capability seam.
//!
//! The check-in logic only ever talks to [`BrowserPage`]; the concrete
//! implementation drives a WebDriver endpoint (see [`webdriver`]), and tests
//! substitute scripted fakes.

pub mod launcher;
pub mod webdriver;

pub use launcher::{BrowserSession, SessionLauncher};
pub use webdriver::WebDriverPage;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Element state a selector probe waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// Present in the DOM.
    Attached,
    /// Present and rendered.
    Visible,
}

/// Transport-level failure talking to the browser. Distinct from a probe
/// timing out, which is an ordinary `Ok(false)`.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("navigation timed out after {0:?}")]
    NavTimeout(Duration),
    #[error("webdriver command failed: {0}")]
    Command(String),
}

/// A loaded page the check-in flow can probe and act on.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate, bounded by `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), PageError>;

    async fn current_url(&self) -> Option<String>;

    /// Wait until `selector` reaches `state`. `Ok(false)` means the
    /// per-selector timeout elapsed first.
    async fn wait_for(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<bool, PageError>;

    /// Wait for `selector` to be attached and click it. `Ok(false)` means it
    /// never became clickable within `timeout`.
    async fn try_click(&self, selector: &str, timeout: Duration) -> Result<bool, PageError>;

    /// PNG capture of the current page.
    async fn screenshot(&self) -> Result<Vec<u8>, PageError>;

    /// Rendered HTML source of the current page.
    async fn page_source(&self) -> Result<String, PageError>;
}
