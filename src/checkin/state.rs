//! Page-state classification and check-in execution.
//!
//! Classifies a loaded page into one of {needs authentication, already
//! checked in, check-in available} using ordered selector probes, then
//! performs the click when one is due.

use std::time::Duration;

use crate::browser::{BrowserPage, PageError, WaitState};
use crate::config::Config;
use crate::error::CheckinError;

/// Terminal status of a completed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinStatus {
    Ok,
    Already,
}

impl CheckinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckinStatus::Ok => "CHECKIN_OK",
            CheckinStatus::Already => "CHECKIN_ALREADY",
        }
    }
}

impl std::fmt::Display for CheckinStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a check-in attempt that reached a terminal page state.
#[derive(Debug, Clone)]
pub struct CheckinOutcome {
    pub status: CheckinStatus,
    pub notes: String,
    pub url: Option<String>,
}

/// Probe an ordered selector list for `state`. Each selector gets its own
/// independent timeout; the first success wins. Order is a priority list,
/// not a race.
pub async fn wait_for_any(
    page: &dyn BrowserPage,
    selectors: &[String],
    state: WaitState,
    timeout: Duration,
) -> Result<bool, PageError> {
    for selector in selectors {
        if page.wait_for(selector, state, timeout).await? {
            tracing::debug!(selector = %selector, ?state, "selector probe matched");
            return Ok(true);
        }
    }
    Ok(false)
}

fn page_failure(err: PageError) -> CheckinError {
    CheckinError::unknown(format!("browser failure: {err}"))
}

/// Fail fast when the page demands a fresh login.
///
/// A visible `login_required` selector, or a configured-but-absent
/// `login_confirmed` one, means the persisted session has expired and the
/// operator must re-run the authorize flow; retrying cannot help. With
/// neither list configured, authentication is assumed valid.
pub async fn ensure_logged_in(page: &dyn BrowserPage, config: &Config) -> Result<(), CheckinError> {
    let selectors = &config.selectors;
    let timeout = config.run.action_timeout();

    if !selectors.login_required.is_empty()
        && wait_for_any(page, &selectors.login_required, WaitState::Visible, timeout)
            .await
            .map_err(page_failure)?
    {
        return Err(CheckinError::need_auth(
            "login indicator detected; session renewal required",
        ));
    }

    if !selectors.login_confirmed.is_empty()
        && !wait_for_any(page, &selectors.login_confirmed, WaitState::Visible, timeout)
            .await
            .map_err(page_failure)?
    {
        return Err(CheckinError::need_auth(
            "unable to confirm authenticated session",
        ));
    }

    Ok(())
}

/// Check for the already-done indicator without clicking anything.
pub async fn evaluate_checkin_state(
    page: &dyn BrowserPage,
    config: &Config,
) -> Result<Option<CheckinOutcome>, CheckinError> {
    let selectors = &config.selectors;
    let timeout = config.run.action_timeout();

    if !selectors.already_checked.is_empty()
        && wait_for_any(page, &selectors.already_checked, WaitState::Visible, timeout)
            .await
            .map_err(page_failure)?
    {
        return Ok(Some(CheckinOutcome {
            status: CheckinStatus::Already,
            notes: "already checked in today".to_string(),
            url: page.current_url().await,
        }));
    }
    Ok(None)
}

/// Execute the check-in on a page that passed the authentication check.
///
/// Repeated runs on a day that is already checked in never re-trigger the
/// click. After a successful click the site may reveal either the success
/// or the already-checked indicator; if neither appears the attempt fails
/// with a retryable unknown error -- deliberately not classified further.
pub async fn perform_checkin(
    page: &dyn BrowserPage,
    config: &Config,
) -> Result<CheckinOutcome, CheckinError> {
    if let Some(outcome) = evaluate_checkin_state(page, config).await? {
        return Ok(outcome);
    }

    let selectors = &config.selectors;
    let timeout = config.run.action_timeout();

    let mut clicked = false;
    for selector in &selectors.checkin_triggers {
        if page.try_click(selector, timeout).await.map_err(page_failure)? {
            tracing::info!(step = "click", selector = %selector, "check-in trigger clicked");
            clicked = true;
            break;
        }
    }
    if !clicked {
        return Err(CheckinError::selector_changed(
            "unable to locate a check-in trigger",
        ));
    }

    if !selectors.success_indicators.is_empty()
        && wait_for_any(page, &selectors.success_indicators, WaitState::Visible, timeout)
            .await
            .map_err(page_failure)?
    {
        return Ok(CheckinOutcome {
            status: CheckinStatus::Ok,
            notes: "success indicator detected".to_string(),
            url: page.current_url().await,
        });
    }

    if !selectors.already_checked.is_empty()
        && wait_for_any(page, &selectors.already_checked, WaitState::Visible, timeout)
            .await
            .map_err(page_failure)?
    {
        return Ok(CheckinOutcome {
            status: CheckinStatus::Already,
            notes: "check-in already completed".to_string(),
            url: page.current_url().await,
        });
    }

    Err(CheckinError::unknown("no success indicator after click"))
}
