//! Manual authorization flow that seeds the persistent browser profile.
//!
//! Run once (and again whenever the site invalidates the session): opens a
//! headed browser on the base URL, waits for the operator to complete the
//! site's login, then snapshots the session cookies and records an `AUTH`
//! history row.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::browser::{BrowserPage, BrowserSession, PageError, SessionLauncher};
use crate::config::Config;
use crate::error::{CheckinError, ErrorCode};
use crate::history::{append_history, HistoryEntry};

pub const STAGE_AUTH: &str = "AUTH";
pub const RESULT_AUTH_OK: &str = "AUTH_OK";
pub const RESULT_AUTH_FAIL: &str = "AUTH_FAIL";

/// Interactive seeding of the persisted session. Returns the process exit
/// code.
pub async fn run(config: &Config) -> i32 {
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

    let run_id = Uuid::new_v4().simple().to_string();
    let started = Instant::now();

    info!(
        step = "authorize",
        run_id = %run_id,
        url = %config.site.base_url,
        "launching headed browser for manual authorization"
    );

    let (result, error_code, notes) = match seed_session(config).await {
        Ok(cookie_count) => (
            RESULT_AUTH_OK,
            String::new(),
            format!("manual authorization completed; {cookie_count} cookies captured"),
        ),
        Err(err) => {
            error!(step = "authorize", error_code = %err.code, "authorization failed: {err}");
            (RESULT_AUTH_FAIL, err.code.as_str().to_string(), err.to_string())
        }
    };

    let finished = Utc::now().with_timezone(&tz);
    let entry = HistoryEntry {
        ts: finished.to_rfc3339(),
        run_id: run_id.clone(),
        stage: STAGE_AUTH.to_string(),
        result: result.to_string(),
        error_code,
        retry_count: 0,
        duration_ms: started.elapsed().as_millis() as u64,
        notes,
    };
    if let Err(err) = append_history(&config.paths.history_file, config.run.history_limit, entry) {
        warn!(error = %err, "failed to append history row");
    }

    info!(step = "authorize", result, "authorization finished");
    if result == RESULT_AUTH_OK {
        0
    } else {
        1
    }
}

async fn seed_session(config: &Config) -> Result<usize, CheckinError> {
    let launcher = SessionLauncher::new(config);
    let session = launcher.launch(false).await.map_err(|err| {
        CheckinError::unknown(format!("failed to launch browser session: {err}"))
    })?;

    let result = drive_authorization(&session, config).await;
    session.shutdown().await;
    result
}

async fn drive_authorization(
    session: &BrowserSession,
    config: &Config,
) -> Result<usize, CheckinError> {
    let page = session.page();
    page.goto(&config.site.base_url, config.run.nav_timeout())
        .await
        .map_err(|err| match err {
            PageError::NavTimeout(_) => CheckinError {
                code: ErrorCode::NavTimeout,
                message: "timed out opening base URL".to_string(),
                retryable: false,
                screenshot: None,
            },
            other => CheckinError::unknown(format!("failed to open base URL: {other}")),
        })?;

    println!(
        "\n================================================================================\n\
         Manual authorization required.\n\
         1. Use the opened browser window to log in at {}.\n\
         2. Verify the dashboard loads successfully.\n\
         3. Return to this terminal and press ENTER when finished.\n\
         ================================================================================\n",
        config.site.base_url
    );
    wait_for_enter()
        .await
        .map_err(|err| CheckinError::unknown(format!("{err:#}")))?;

    let cookies = session
        .cookie_inventory()
        .await
        .map_err(|err| CheckinError::unknown(format!("{err:#}")))?;
    let snapshot = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "cookie_count": cookies.len(),
        "cookies": cookies,
    });
    write_snapshot(config, &snapshot).map_err(|err| CheckinError::unknown(format!("{err:#}")))?;

    info!(
        step = "authorize",
        cookies = cookies.len(),
        path = %config.paths.auth_state_file.display(),
        "session snapshot written"
    );
    Ok(cookies.len())
}

fn write_snapshot(config: &Config, snapshot: &serde_json::Value) -> Result<()> {
    let path = &config.paths.auth_state_file;
    std::fs::write(path, serde_json::to_string_pretty(snapshot)?)
        .with_context(|| format!("failed to write auth snapshot: {}", path.display()))?;
    Ok(())
}

async fn wait_for_enter() -> Result<()> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read confirmation from stdin")?;
    Ok(())
}
