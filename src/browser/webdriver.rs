//! WebDriver-backed implementation of the page capability.
//!
//! Probes are deadline-bounded poll loops rather than races: each selector
//! gets its own timeout and a fixed re-check interval.

use std::time::Duration;

use async_trait::async_trait;
use fantoccini::error::CmdError;
use fantoccini::{Client, Locator};
use tokio::time::{sleep, timeout, Instant};

use super::{BrowserPage, PageError, WaitState};

const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// A live page driven over the WebDriver protocol.
pub struct WebDriverPage {
    client: Client,
}

impl WebDriverPage {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }
}

fn command_failed(err: CmdError) -> PageError {
    PageError::Command(err.to_string())
}

/// Errors that mean "not there yet, keep polling": the element is missing,
/// stale, or not interactable at this instant. Anything else (lost
/// connection, protocol breakage) is a transport failure.
fn transient(err: &CmdError) -> bool {
    matches!(err, CmdError::Standard(_))
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn goto(&self, url: &str, nav_timeout: Duration) -> Result<(), PageError> {
        match timeout(nav_timeout, self.client.goto(url)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(command_failed(err)),
            Err(_) => Err(PageError::NavTimeout(nav_timeout)),
        }
    }

    async fn current_url(&self) -> Option<String> {
        self.client.current_url().await.ok().map(|url| url.to_string())
    }

    async fn wait_for(
        &self,
        selector: &str,
        state: WaitState,
        wait_timeout: Duration,
    ) -> Result<bool, PageError> {
        let deadline = Instant::now() + wait_timeout;
        loop {
            match self.client.find(Locator::Css(selector)).await {
                Ok(element) => match state {
                    WaitState::Attached => return Ok(true),
                    WaitState::Visible => match element.is_displayed().await {
                        Ok(true) => return Ok(true),
                        Ok(false) => {}
                        Err(err) if transient(&err) => {}
                        Err(err) => return Err(command_failed(err)),
                    },
                },
                Err(err) if transient(&err) => {}
                Err(err) => return Err(command_failed(err)),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(PROBE_INTERVAL).await;
        }
    }

    async fn try_click(&self, selector: &str, click_timeout: Duration) -> Result<bool, PageError> {
        let deadline = Instant::now() + click_timeout;
        loop {
            match self.client.find(Locator::Css(selector)).await {
                Ok(element) => match element.click().await {
                    Ok(()) => return Ok(true),
                    Err(err) if transient(&err) => {}
                    Err(err) => return Err(command_failed(err)),
                },
                Err(err) if transient(&err) => {}
                Err(err) => return Err(command_failed(err)),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(PROBE_INTERVAL).await;
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        self.client.screenshot().await.map_err(command_failed)
    }

    async fn page_source(&self) -> Result<String, PageError> {
        self.client.source().await.map_err(command_failed)
    }
}
