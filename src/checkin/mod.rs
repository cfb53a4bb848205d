//! Scheduled check-in orchestration: attempt loop, retry policy, reporting.
//!
//! One call to [`run`] performs a full scheduled run: up to `max_retries`
//! browser attempts with backoff in between, exactly one history row, and at
//! most one notification email.

pub mod backoff;
pub mod state;

pub use state::{CheckinOutcome, CheckinStatus};

use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::browser::{BrowserPage, PageError, SessionLauncher};
use crate::config::{Config, RunConfig};
use crate::error::CheckinError;
use crate::history::{append_history, HistoryEntry};
use crate::notify::EmailNotifier;

pub const STAGE_CHECKIN: &str = "CHECKIN";
pub const RESULT_FAIL: &str = "CHECKIN_FAIL";

/// What the attempt loop ended with.
struct RunReport {
    outcome: Option<CheckinOutcome>,
    error: Option<CheckinError>,
    attempts_used: u32,
}

/// Run one scheduled check-in. Returns the process exit code: 0 for
/// success or already-done, 1 for any unresolved failure.
pub async fn run(config: &Config) -> i32 {
    let run_id = Uuid::new_v4().simple().to_string();
    let span = tracing::info_span!("checkin_run", run_id = %run_id);
    run_inner(config, &run_id).instrument(span).await
}

async fn run_inner(config: &Config, run_id: &str) -> i32 {
    let tz = match config.tz() {
        Ok(tz) => tz,
        Err(err) => {
            error!(error = %err, "invalid timezone in configuration");
            return 1;
        }
    };
    if let Err(err) = config.paths.ensure_data_tree() {
        error!(error = %err, "failed to create data directories");
        return 1;
    }

    info!(step = "start", "starting scheduled check-in");
    let started = Instant::now();

    let report = execute(&config.run, |attempt, headless| {
        attempt_checkin(config, run_id, tz, attempt, headless)
    })
    .await;

    let duration_ms = started.elapsed().as_millis() as u64;
    finalize(config, tz, run_id, duration_ms, report).await
}

/// The attempt loop. Headless on the first attempt, optionally forced
/// headed on retries; backoff between attempts; stops on success, a
/// non-retryable error, or budget exhaustion.
async fn execute<F, Fut>(run: &RunConfig, mut attempt_fn: F) -> RunReport
where
    F: FnMut(u32, bool) -> Fut,
    Fut: Future<Output = Result<CheckinOutcome, CheckinError>>,
{
    let max_retries = run.max_retries.max(1);
    let mut outcome = None;
    let mut last_error = None;
    let mut attempts_used = 0;

    for attempt in 1..=max_retries {
        let headless = if attempt > 1 && run.fallback_to_headed_on_retry {
            false
        } else {
            run.headless_preferred
        };
        info!(step = "attempt", attempt, headless, "attempting check-in");
        attempts_used = attempt;

        match attempt_fn(attempt, headless).await {
            Ok(result) => {
                outcome = Some(result);
                break;
            }
            Err(err) => {
                error!(
                    step = "attempt",
                    attempt,
                    error_code = %err.code,
                    retryable = err.retryable,
                    "check-in attempt failed: {err}"
                );
                let retryable = err.retryable;
                last_error = Some(err);
                if !retryable || attempt >= max_retries {
                    break;
                }
                let delay = backoff::backoff_delay(&run.retry_backoff_seconds, attempt);
                info!(
                    step = "retry",
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "sleeping before retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    RunReport {
        outcome,
        error: last_error,
        attempts_used,
    }
}

/// Record the run and dispatch at most one notification.
async fn finalize(
    config: &Config,
    tz: Tz,
    run_id: &str,
    duration_ms: u64,
    report: RunReport,
) -> i32 {
    let finished = Utc::now().with_timezone(&tz);
    let notifier = EmailNotifier::new(config);

    let (result, error_code, notes) = match (&report.outcome, &report.error) {
        (Some(outcome), _) => (
            outcome.status.as_str().to_string(),
            String::new(),
            outcome.notes.clone(),
        ),
        (None, Some(err)) => (
            RESULT_FAIL.to_string(),
            err.code.as_str().to_string(),
            err.to_string(),
        ),
        (None, None) => (
            RESULT_FAIL.to_string(),
            "UNKNOWN".to_string(),
            "no attempt completed".to_string(),
        ),
    };

    let entry = HistoryEntry {
        ts: finished.to_rfc3339(),
        run_id: run_id.to_string(),
        stage: STAGE_CHECKIN.to_string(),
        result: result.clone(),
        error_code: error_code.clone(),
        retry_count: report.attempts_used.saturating_sub(1),
        duration_ms,
        notes: notes.clone(),
    };
    if let Err(err) = append_history(&config.paths.history_file, config.run.history_limit, entry) {
        warn!(error = %err, "failed to append history row");
    }

    match &report.outcome {
        Some(outcome) if outcome.status == CheckinStatus::Ok => {
            info!(step = "done", result = outcome.status.as_str(), "check-in completed");
            let subject = format!("[checkinpilot][OK] {}", finished.date_naive());
            let body = format!(
                "Daily check-in succeeded.\nRun ID: {run_id}\nAttempts: {}\nDuration: {duration_ms} ms\nURL: {}\n",
                report.attempts_used,
                outcome
                    .url
                    .clone()
                    .unwrap_or_else(|| config.site.checkin_url.clone()),
            );
            notifier.send_success(&subject, &body, finished).await;
            0
        }
        Some(outcome) => {
            info!(
                step = "done",
                result = outcome.status.as_str(),
                "already checked in today; no success email sent"
            );
            0
        }
        None => {
            if let Some(err) = &report.error {
                error!(
                    step = "done",
                    result = RESULT_FAIL,
                    error_code = %err.code,
                    "check-in failed: {err}"
                );
                let subject =
                    format!("[checkinpilot][FAIL][{}] {}", err.code, finished.to_rfc3339());
                let body = format!(
                    "Check-in failed with error {}.\nRun ID: {run_id}\nAttempts used: {}\nDuration: {duration_ms} ms\nNotes: {notes}\nURL: {}\n",
                    err.code, report.attempts_used, config.site.checkin_url,
                );
                notifier
                    .send_failure(&subject, &body, err.screenshot.as_deref())
                    .await;
            }
            1
        }
    }
}

/// One attempt, scoped to its own browser session. The session is shut down
/// on every exit path before the caller considers a retry.
async fn attempt_checkin(
    config: &Config,
    run_id: &str,
    tz: Tz,
    attempt: u32,
    headless: bool,
) -> Result<CheckinOutcome, CheckinError> {
    let launcher = SessionLauncher::new(config);
    let session = launcher
        .launch(headless)
        .await
        .map_err(|err| CheckinError::unknown(format!("failed to launch browser session: {err}")))?;

    let page = session.page();
    let result = match drive_checkin(&page, config, attempt).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => Err(capture_failure_artifacts(&page, config, run_id, tz, attempt, err).await),
    };
    session.shutdown().await;
    result
}

async fn drive_checkin(
    page: &dyn BrowserPage,
    config: &Config,
    attempt: u32,
) -> Result<CheckinOutcome, CheckinError> {
    info!(
        step = "navigate",
        url = %config.site.checkin_url,
        attempt,
        "navigating to check-in page"
    );
    page.goto(&config.site.checkin_url, config.run.nav_timeout())
        .await
        .map_err(|err| match err {
            PageError::NavTimeout(_) => {
                CheckinError::nav_timeout("timed out waiting for page load")
            }
            other => CheckinError::unknown(format!("navigation failed: {other}")),
        })?;

    state::ensure_logged_in(page, config).await?;
    let outcome = state::perform_checkin(page, config).await?;
    info!(
        step = "outcome",
        result = outcome.status.as_str(),
        attempt,
        "attempt outcome"
    );
    Ok(outcome)
}

/// Best-effort failure artifacts: a screenshot tagged with run id, attempt,
/// and error code, plus the page source when tracing is enabled. Capture
/// failures are logged and never mask the original error.
async fn capture_failure_artifacts(
    page: &dyn BrowserPage,
    config: &Config,
    run_id: &str,
    tz: Tz,
    attempt: u32,
    err: CheckinError,
) -> CheckinError {
    if !config.run.screenshot_on_failure {
        return err;
    }
    if let Err(e) = config.paths.ensure_data_tree() {
        warn!(error = %e, "failed to prepare screenshot directory");
        return err;
    }

    let now = Utc::now().with_timezone(&tz);
    let slug = format!(
        "{}_{}_a{}_{}",
        now.format("%Y%m%dT%H%M%S"),
        run_id,
        attempt,
        err.code.as_str().to_lowercase()
    );

    if config.run.trace_on_failure {
        match page.page_source().await {
            Ok(source) => {
                let html_path = config.paths.screenshots_dir.join(format!("{slug}.html"));
                if let Err(e) = tokio::fs::write(&html_path, source).await {
                    warn!(error = %e, "failed to write page source dump");
                }
            }
            Err(e) => warn!(error = %e, "failed to capture page source"),
        }
    }

    let path = config.paths.screenshots_dir.join(format!("{slug}.png"));
    match page.screenshot().await {
        Ok(bytes) => match tokio::fs::write(&path, &bytes).await {
            Ok(()) => {
                info!(step = "screenshot", path = %path.display(), "failure screenshot captured");
                return err.with_screenshot(path);
            }
            Err(e) => warn!(error = %e, "failed to write failure screenshot"),
        },
        Err(e) => warn!(error = %e, "failed to capture failure screenshot"),
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    use std::sync::Mutex;

    fn fast_run_config() -> RunConfig {
        RunConfig {
            max_retries: 3,
            retry_backoff_seconds: vec![0.0],
            ..RunConfig::default()
        }
    }

    fn ok_outcome() -> CheckinOutcome {
        CheckinOutcome {
            status: CheckinStatus::Ok,
            notes: "success indicator detected".to_string(),
            url: None,
        }
    }

    #[tokio::test]
    async fn test_execute_stops_on_first_success() {
        let run = fast_run_config();
        let report = execute(&run, |_, _| async { Ok(ok_outcome()) }).await;

        assert_eq!(report.attempts_used, 1);
        assert!(report.outcome.is_some());
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_execute_retries_retryable_until_exhaustion() {
        let run = fast_run_config();
        let report = execute(&run, |_, _| async {
            Err(CheckinError::unknown("no success indicator after click"))
        })
        .await;

        assert_eq!(report.attempts_used, 3);
        assert!(report.outcome.is_none());
        assert_eq!(report.error.unwrap().code, ErrorCode::Unknown);
    }

    #[tokio::test]
    async fn test_execute_stops_on_non_retryable() {
        let run = fast_run_config();
        let report = execute(&run, |_, _| async {
            Err(CheckinError::need_auth("login indicator detected"))
        })
        .await;

        assert_eq!(report.attempts_used, 1);
        assert_eq!(report.error.unwrap().code, ErrorCode::NeedAuth);
    }

    #[tokio::test]
    async fn test_execute_recovers_on_later_attempt() {
        let run = fast_run_config();
        let report = execute(&run, |attempt, _| async move {
            if attempt < 3 {
                Err(CheckinError::nav_timeout("timed out waiting for page load"))
            } else {
                Ok(ok_outcome())
            }
        })
        .await;

        assert_eq!(report.attempts_used, 3);
        assert!(report.outcome.is_some());
    }

    #[tokio::test]
    async fn test_execute_falls_back_to_headed_on_retry() {
        let run = fast_run_config();
        let modes = Mutex::new(Vec::new());
        let report = execute(&run, |_, headless| {
            modes.lock().unwrap().push(headless);
            async { Err(CheckinError::unknown("boom")) }
        })
        .await;

        assert_eq!(report.attempts_used, 3);
        assert_eq!(*modes.lock().unwrap(), vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_execute_keeps_headless_without_fallback() {
        let mut run = fast_run_config();
        run.fallback_to_headed_on_retry = false;

        let modes = Mutex::new(Vec::new());
        execute(&run, |_, headless| {
            modes.lock().unwrap().push(headless);
            async { Err(CheckinError::unknown("boom")) }
        })
        .await;

        assert_eq!(*modes.lock().unwrap(), vec![true, true, true]);
    }

    #[tokio::test]
    async fn test_finalize_success_writes_history_and_exits_zero() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths = crate::config::DataPaths::rooted(dir.path());
        config.timezone = "UTC".to_string();

        let report = RunReport {
            outcome: Some(ok_outcome()),
            error: None,
            attempts_used: 1,
        };
        let code = finalize(&config, chrono_tz::UTC, "run-123", 5000, report).await;
        assert_eq!(code, 0);

        let rows = crate::history::read_history(&config.paths.history_file).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, "CHECKIN_OK");
        assert_eq!(rows[0].run_id, "run-123");
        assert_eq!(rows[0].retry_count, 0);
        assert_eq!(rows[0].duration_ms, 5000);
    }

    #[tokio::test]
    async fn test_finalize_failure_records_error_code_and_exits_one() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths = crate::config::DataPaths::rooted(dir.path());

        let report = RunReport {
            outcome: None,
            error: Some(CheckinError::selector_changed(
                "unable to locate a check-in trigger",
            )),
            attempts_used: 2,
        };
        let code = finalize(&config, chrono_tz::UTC, "run-456", 800, report).await;
        assert_eq!(code, 1);

        let rows = crate::history::read_history(&config.paths.history_file).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, RESULT_FAIL);
        assert_eq!(rows[0].error_code, "SELECTOR_CHANGED");
        assert_eq!(rows[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_finalize_already_done_exits_zero_without_success_mail() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths = crate::config::DataPaths::rooted(dir.path());

        let report = RunReport {
            outcome: Some(CheckinOutcome {
                status: CheckinStatus::Already,
                notes: "already checked in today".to_string(),
                url: None,
            }),
            error: None,
            attempts_used: 1,
        };
        let code = finalize(&config, chrono_tz::UTC, "run-789", 100, report).await;
        assert_eq!(code, 0);

        // No success marker may appear for an already-done run.
        assert!(!config
            .paths
            .meta_dir
            .join("last_success_email.json")
            .exists());
    }
}
