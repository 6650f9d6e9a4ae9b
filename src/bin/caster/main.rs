mod face;
mod hands;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use promptcaster::dom::chrome::ChromeDocument;
use promptcaster::logging;
use promptcaster::relay::RelayConfig;
use promptcaster::settings::SettingsStore;
use promptcaster::{Orchestrator, SiteAdapter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Send one prompt to several AI chat sites at once and compare their answers.
#[derive(Debug, Parser)]
#[command(name = "promptcaster", version)]
struct Cli {
    /// Comma-separated site ids to open, overriding the enabled sites in settings.
    #[arg(long, value_delimiter = ',')]
    sites: Option<Vec<String>>,

    /// Port for the local web UI. The next free port up to +9 is used if taken.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// DevTools endpoint of a running Chrome to attach to.
    #[arg(long, env = "PROMPTCASTER_CHROME", default_value = "http://127.0.0.1:9222")]
    attach: String,

    /// Launch Chrome headless when nothing is running at the attach endpoint.
    #[arg(long)]
    headless: bool,

    /// Settings file. Defaults to the platform config directory.
    #[arg(long, env = "PROMPTCASTER_SETTINGS")]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    logging::init();
    let cli = Cli::parse();

    let store = cli
        .settings
        .clone()
        .map(SettingsStore::new)
        .unwrap_or_else(SettingsStore::default_location);
    let mut settings = store.load();
    if let Some(sites) = cli.sites.clone() {
        settings.enabled_site_ids = sites;
    }
    let sites: Vec<&'static SiteAdapter> = settings.enabled_sites();
    if sites.is_empty() {
        anyhow::bail!("No known sites enabled. Known ids: {}", promptcaster::adapters::ids().join(", "));
    }
    info!(sites = ?sites.iter().map(|s| s.id).collect::<Vec<_>>(), "starting promptcaster");

    let ws_url = hands::websocket_url(&cli.attach).await;
    let headless = cli.headless;
    // Opening tabs waits on page loads; keep it off the async workers.
    let session = tokio::task::spawn_blocking(move || hands::BrowserSession::open(ws_url, headless, &sites))
        .await
        .map_err(|e| anyhow::anyhow!("Browser launch panicked: {}", e))??;

    let mut orchestrator = Orchestrator::new(RelayConfig::default());
    for site_tab in session.tabs() {
        match ChromeDocument::attach(site_tab.tab.clone()) {
            Ok(doc) => {
                orchestrator.attach(Arc::new(doc))?;
            }
            Err(e) => warn!(site = site_tab.site.id, "could not attach to tab: {e}"),
        }
    }
    info!(attached = ?orchestrator.attached_sites(), "site contexts ready");

    let state = face::AppState::new(orchestrator, store, settings);
    face::serve(state, cli.port).await?;

    drop(session);
    Ok(())
}
