//! Session launch and teardown around a chromedriver subprocess.
//!
//! One launcher serves both the scheduled check-in run and the manual
//! authorize flow; the only difference between them is headless/headed mode.
//! Every session points Chrome at the persistent profile directory, which is
//! what keeps the site login alive across runs.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use fantoccini::{Client, ClientBuilder};
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::webdriver::WebDriverPage;
use crate::config::Config;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);
const READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Name/domain/path of one live session cookie, for the auth snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CookieInfo {
    pub name: String,
    pub domain: String,
    pub path: String,
}

/// Launches browser sessions against the persistent user profile.
pub struct SessionLauncher<'a> {
    config: &'a Config,
}

impl<'a> SessionLauncher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Open a fresh WebDriver session, spawning chromedriver first unless
    /// the config points at an externally managed endpoint.
    pub async fn launch(&self, headless: bool) -> Result<BrowserSession> {
        let browser = &self.config.browser;
        let (endpoint, driver) = match &browser.webdriver_url {
            Some(url) => (url.clone(), None),
            None => {
                let child = Command::new(&browser.webdriver_bin)
                    .arg(format!("--port={}", browser.webdriver_port))
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .with_context(|| {
                        format!("failed to spawn webdriver binary: {}", browser.webdriver_bin)
                    })?;
                debug!(bin = %browser.webdriver_bin, port = browser.webdriver_port, "spawned chromedriver");
                (
                    format!("http://127.0.0.1:{}", browser.webdriver_port),
                    Some(child),
                )
            }
        };

        if let Err(err) = wait_until_ready(&endpoint).await {
            stop_driver(driver).await;
            return Err(err);
        }

        let capabilities = chrome_capabilities(self.config, headless);
        match ClientBuilder::native()
            .capabilities(capabilities)
            .connect(&endpoint)
            .await
        {
            Ok(client) => Ok(BrowserSession { client, driver }),
            Err(err) => {
                stop_driver(driver).await;
                Err(anyhow!("failed to open webdriver session at {endpoint}: {err}"))
            }
        }
    }
}

/// A live browser session scoped to one attempt. Must be explicitly shut
/// down on every exit path; `kill_on_drop` on the driver process is only the
/// panic backstop.
pub struct BrowserSession {
    client: Client,
    driver: Option<Child>,
}

impl BrowserSession {
    /// Handle for the page the session is showing.
    pub fn page(&self) -> WebDriverPage {
        WebDriverPage::new(self.client.clone())
    }

    /// Inventory of the session's cookies (names only, no values).
    pub async fn cookie_inventory(&self) -> Result<Vec<CookieInfo>> {
        let cookies = self
            .client
            .get_all_cookies()
            .await
            .map_err(|e| anyhow!("failed to list session cookies: {e}"))?;
        Ok(cookies
            .iter()
            .map(|cookie| CookieInfo {
                name: cookie.name().to_string(),
                domain: cookie.domain().unwrap_or_default().to_string(),
                path: cookie.path().unwrap_or_default().to_string(),
            })
            .collect())
    }

    /// Close the WebDriver session and stop the spawned driver. Best
    /// effort: failures are logged, never escalated.
    pub async fn shutdown(mut self) {
        if let Err(err) = self.client.clone().close().await {
            warn!(error = %err, "failed to close webdriver session");
        }
        stop_driver(self.driver.take()).await;
    }
}

async fn stop_driver(driver: Option<Child>) {
    if let Some(mut child) = driver {
        if let Err(err) = child.kill().await {
            warn!(error = %err, "failed to stop webdriver process");
        }
    }
}

fn chrome_capabilities(
    config: &Config,
    headless: bool,
) -> serde_json::Map<String, serde_json::Value> {
    let mut args: Vec<String> = config.browser.chrome_args.clone();
    args.push(format!(
        "--user-data-dir={}",
        config.paths.userdata_dir.display()
    ));
    if headless {
        args.push("--headless=new".to_string());
    }
    if let Some(locale) = &config.browser.locale {
        if !args.iter().any(|arg| arg.starts_with("--lang=")) {
            args.push(format!("--lang={locale}"));
        }
    }

    let mut capabilities = serde_json::Map::new();
    capabilities.insert(
        "goog:chromeOptions".to_string(),
        serde_json::json!({ "args": args }),
    );
    capabilities
}

/// Poll the WebDriver `/status` endpoint until it reports ready.
async fn wait_until_ready(endpoint: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .context("failed to build webdriver status client")?;
    let status_url = format!("{}/status", endpoint.trim_end_matches('/'));
    let deadline = Instant::now() + READY_TIMEOUT;

    loop {
        match client.get(&status_url).send().await {
            Ok(response) => {
                if let Ok(body) = response.json::<serde_json::Value>().await {
                    if body["value"]["ready"].as_bool().unwrap_or(false) {
                        return Ok(());
                    }
                }
            }
            Err(err) => debug!(error = %err, "webdriver endpoint not ready yet"),
        }
        if Instant::now() >= deadline {
            return Err(anyhow!(
                "webdriver endpoint never became ready: {status_url}"
            ));
        }
        sleep(READY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_capabilities_compose_args() {
        let mut config = Config::default();
        config.browser.chrome_args = vec!["--no-first-run".to_string()];
        config.browser.locale = Some("fi-FI".to_string());

        let caps = chrome_capabilities(&config, true);
        let args = caps["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect::<Vec<_>>();

        assert!(args.contains(&"--no-first-run".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--lang=fi-FI".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-data-dir=")));
    }

    #[test]
    fn test_chrome_capabilities_headed_omits_headless() {
        let config = Config::default();
        let caps = chrome_capabilities(&config, false);
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(!args.iter().any(|v| v.as_str() == Some("--headless=new")));
    }

    #[test]
    fn test_chrome_capabilities_respect_explicit_lang() {
        let mut config = Config::default();
        config.browser.chrome_args = vec!["--lang=sv".to_string()];
        config.browser.locale = Some("fi-FI".to_string());

        let caps = chrome_capabilities(&config, false);
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        let langs: Vec<_> = args
            .iter()
            .filter(|v| v.as_str().unwrap_or_default().starts_with("--lang="))
            .collect();
        assert_eq!(langs.len(), 1);
    }
}
