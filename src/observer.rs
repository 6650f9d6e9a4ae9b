//! Watching a site stream its answer.
//!
//! One observation session per document: [`ResponseObserver::start`] stops the
//! previous session before subscribing again, so a document never has two
//! live subscriptions feeding the same sink.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::adapters::SiteAdapter;
use crate::dom::{Document, MutationSubscription};
use crate::query::{first_match, last_match};

/// Quiet period after the last mutation before the page is read.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

/// The state of one site's latest answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseObservation {
    pub site_id: String,
    pub text: String,
    pub is_complete: bool,
    pub observed_at_epoch_millis: i64,
}

impl ResponseObservation {
    /// Read the page now.
    pub fn capture(doc: &dyn Document, adapter: &SiteAdapter) -> Self {
        Self {
            site_id: adapter.id.to_string(),
            text: extract_response(doc, adapter),
            is_complete: is_response_complete(doc, adapter),
            observed_at_epoch_millis: Utc::now().timestamp_millis(),
        }
    }
}

/// Trimmed text of the last response container, or empty when there is none.
pub fn extract_response(doc: &dyn Document, adapter: &SiteAdapter) -> String {
    let Some(last) = last_match(doc, adapter.queries.response_container) else {
        return String::new();
    };
    doc.text_content(last)
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

/// No loading indicator on the page. Sites without one always read as complete.
pub fn is_response_complete(doc: &dyn Document, adapter: &SiteAdapter) -> bool {
    match adapter.queries.loading_indicator {
        Some(indicator) => first_match(doc, indicator).is_none(),
        None => true,
    }
}

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub debounce: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            debounce: DEBOUNCE_WINDOW,
        }
    }
}

/// A single re-armable timer.
#[derive(Debug)]
struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    /// Resolves once the armed deadline passes; never resolves while disarmed.
    async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

/// Decides which passes are worth relaying for one turn.
///
/// The answer already on the page when the session starts is the baseline:
/// passes that still read it belong to the previous turn. Once a completion
/// has been relayed the turn is over and nothing else gets through.
#[derive(Debug, Default)]
struct EmissionGate {
    baseline: String,
    last_text: String,
    finished: bool,
}

impl EmissionGate {
    fn after(baseline: String) -> Self {
        Self {
            last_text: baseline.clone(),
            baseline,
            finished: false,
        }
    }

    /// Emit on new text, or on the first complete pass of the new answer.
    fn admit(&mut self, text: &str, is_complete: bool) -> bool {
        if self.finished || text.is_empty() || text == self.baseline {
            return false;
        }
        if is_complete {
            self.finished = true;
            self.last_text = text.to_string();
            return true;
        }
        if text == self.last_text {
            return false;
        }
        self.last_text = text.to_string();
        true
    }
}

/// A running observation session.
#[derive(Debug)]
pub struct ObserverHandle {
    site: &'static str,
    task: JoinHandle<()>,
}

impl ObserverHandle {
    /// Stop the session and wait until its subscription is released.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
        debug!(site = self.site, "observer stopped");
    }
}

/// Owner of at most one observation session for a document.
#[derive(Debug, Default)]
pub struct ResponseObserver {
    config: ObserverConfig,
    active: Option<ObserverHandle>,
}

impl ResponseObserver {
    pub fn new(config: ObserverConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    pub fn is_observing(&self) -> bool {
        self.active.is_some()
    }

    /// Start a fresh session, stopping the current one first.
    pub async fn start(
        &mut self,
        doc: Arc<dyn Document>,
        adapter: &'static SiteAdapter,
        sink: mpsc::UnboundedSender<ResponseObservation>,
    ) {
        self.stop().await;
        // Subscribe here, not in the task, so mutations from this point on are seen.
        let mutations = doc.mutations();
        let gate = EmissionGate::after(extract_response(doc.as_ref(), adapter));
        let task = tokio::spawn(observe(doc, adapter, mutations, gate, self.config.debounce, sink));
        info!(site = adapter.id, "observing responses");
        self.active = Some(ObserverHandle {
            site: adapter.id,
            task,
        });
    }

    pub async fn stop(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.stop().await;
        }
    }
}

impl Drop for ResponseObserver {
    fn drop(&mut self) {
        if let Some(handle) = &self.active {
            handle.task.abort();
        }
    }
}

async fn observe(
    doc: Arc<dyn Document>,
    adapter: &'static SiteAdapter,
    mut mutations: MutationSubscription,
    mut gate: EmissionGate,
    window: Duration,
    sink: mpsc::UnboundedSender<ResponseObservation>,
) {
    let mut debounce = Debouncer::new(window);
    loop {
        tokio::select! {
            alive = mutations.changed() => {
                if !alive {
                    debug!(site = adapter.id, "document gone, observer exiting");
                    return;
                }
                debounce.arm();
            }
            () = debounce.fired() => {
                let observation = ResponseObservation::capture(doc.as_ref(), adapter);
                if !gate.admit(&observation.text, observation.is_complete) {
                    continue;
                }
                debug!(
                    site = adapter.id,
                    chars = observation.text.len(),
                    complete = observation.is_complete,
                    "response observed"
                );
                if sink.send(observation).is_err() {
                    debug!(site = adapter.id, "observation sink closed, dropping update");
                }
            }
        }
    }
}
