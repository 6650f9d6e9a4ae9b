use anyhow::{Result, anyhow};
use headless_chrome::{Browser, LaunchOptions, Tab};
use promptcaster::SiteAdapter;
use reqwest::Client;
use serde_json::Value;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// A tab dedicated to one site.
pub struct SiteTab {
    pub site: &'static SiteAdapter,
    pub tab: Arc<Tab>,
}

/// Browser session holding one tab per enabled site. Dropping it closes a
/// browser we launched; an attached browser keeps running.
pub struct BrowserSession {
    browser: Browser,
    tabs: Vec<SiteTab>,
}

impl BrowserSession {
    /// Attach to the browser behind `ws_url`, or launch one with a shadow
    /// profile, then open (or reuse) a tab for each site.
    pub fn open(ws_url: Option<String>, headless: bool, sites: &[&'static SiteAdapter]) -> Result<Self> {
        let browser = match ws_url {
            Some(url) => match Browser::connect(url.clone()) {
                Ok(browser) => {
                    info!(%url, "attached to running Chrome");
                    browser
                }
                Err(e) => {
                    warn!(%url, "could not attach, launching instead: {e}");
                    launch(headless)?
                }
            },
            None => launch(headless)?,
        };

        let mut session = Self {
            browser,
            tabs: Vec::new(),
        };
        for &site in sites {
            match session.tab_for(site) {
                Ok(tab) => session.tabs.push(SiteTab { site, tab }),
                Err(e) => warn!(site = site.id, "failed to open tab: {e:#}"),
            }
        }
        info!(tabs = session.tabs.len(), "site tabs ready");
        Ok(session)
    }

    pub fn tabs(&self) -> &[SiteTab] {
        &self.tabs
    }

    fn tab_for(&self, site: &SiteAdapter) -> Result<Arc<Tab>> {
        let existing = {
            let tabs = self
                .browser
                .get_tabs()
                .lock()
                .map_err(|_| anyhow!("tab list lock poisoned"))?;
            tabs.iter()
                .find(|tab| host_of(&tab.get_url()).is_some_and(|host| site.matches_host(&host)))
                .cloned()
        };
        if let Some(tab) = existing {
            info!(site = site.id, "reusing open tab");
            return Ok(tab);
        }

        debug!(site = site.id, url = site.canonical_url, "opening tab");
        let tab = self.browser.new_tab()?;
        tab.navigate_to(site.canonical_url)?;
        tab.wait_until_navigated()?;
        Ok(tab)
    }
}

/// Resolve a DevTools endpoint to its browser websocket URL.
/// `http://host:port` is looked up through `/json/version`; `ws://` URLs pass through.
pub async fn websocket_url(endpoint: &str) -> Option<String> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Some(endpoint.to_string());
    }
    let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    let response = match Client::new()
        .get(&url)
        .timeout(Duration::from_secs(2))
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            debug!(%url, "no DevTools endpoint: {e}");
            return None;
        }
    };
    if !response.status().is_success() {
        warn!(%url, status = %response.status(), "DevTools endpoint refused");
        return None;
    }
    match response.json::<Value>().await {
        Ok(body) => body["webSocketDebuggerUrl"].as_str().map(str::to_string),
        Err(e) => {
            warn!(%url, "unexpected DevTools response: {e}");
            None
        }
    }
}

fn launch(headless: bool) -> Result<Browser> {
    let chrome_path = headless_chrome::browser::default_executable()
        .map_err(|e| anyhow!("Chrome executable not found: {e}"))?;
    // A separate profile so site logins persist without locking the user's own.
    let profile = shadow_profile()?;

    let options = LaunchOptions {
        headless,
        path: Some(chrome_path),
        user_data_dir: Some(profile),
        args: vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--password-store=basic"),
        ],
        idle_browser_timeout: Duration::from_secs(60 * 60),
        ..Default::default()
    };

    info!(headless, "launching Chrome");
    Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {e}"))
}

fn shadow_profile() -> Result<PathBuf> {
    let base = dirs::data_local_dir().ok_or_else(|| anyhow!("No local data directory"))?;
    let profile = base.join("promptcaster").join("profile");
    if !profile.exists() {
        info!(path = %profile.display(), "creating shadow profile");
        std::fs::create_dir_all(&profile)?;
    }
    Ok(profile)
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}
