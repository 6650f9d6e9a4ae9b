//! Request/response plumbing between the orchestrator, the per-site contexts
//! and the page-world broker.
//!
//! Every participant owns an mpsc mailbox of [`Envelope`]s. A request carries a
//! oneshot [`Responder`] that is consumed by answering, so a request is
//! answered at most once; the requesting side turns a dropped responder or an
//! elapsed deadline into a failure reply, so it is answered at least once too.
//! Unsolicited pushes (`RESPONSE_UPDATE`/`RESPONSE_COMPLETE`) carry no responder
//! and their delivery failures are swallowed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::adapters::{self, SiteAdapter, adapter_by_id, resolve_adapter};
use crate::attachment::AttachmentDescriptor;
use crate::conversation::{ConversationMessage, extract_conversation};
use crate::dom::Document;
use crate::error::{CasterError, Result};
use crate::files::{FileInjectionConfig, FileInjectionOutcome, inject_files};
use crate::observer::{
    ObserverConfig, ResponseObservation, ResponseObserver, extract_response, is_response_complete,
};
use crate::prompt::{PromptConfig, inject_prompt};

/// Upper bound on one request round trip. Covers the slowest handler
/// (prompt injection waits for both the input and the send control).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

pub const MISSING_SENDER_ERROR: &str = "Missing sender context";

const MAILBOX_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

/// Messages exchanged between contexts, as `{ "type": ..., "payload": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayMessage {
    Ping,
    InjectPrompt {
        prompt: String,
    },
    InjectFiles {
        files: Vec<AttachmentDescriptor>,
    },
    GetResponse,
    GetConversation,
    /// Broker only: run the file injector in the sender's page.
    #[serde(rename_all = "camelCase")]
    ExecuteFileInjection {
        files_data: Vec<AttachmentDescriptor>,
    },
    ResponseUpdate(ResponseObservation),
    ResponseComplete(ResponseObservation),
}

impl RelayMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Ping => "PING",
            RelayMessage::InjectPrompt { .. } => "INJECT_PROMPT",
            RelayMessage::InjectFiles { .. } => "INJECT_FILES",
            RelayMessage::GetResponse => "GET_RESPONSE",
            RelayMessage::GetConversation => "GET_CONVERSATION",
            RelayMessage::ExecuteFileInjection { .. } => "EXECUTE_FILE_INJECTION",
            RelayMessage::ResponseUpdate(_) => "RESPONSE_UPDATE",
            RelayMessage::ResponseComplete(_) => "RESPONSE_COMPLETE",
        }
    }

    /// The push that reports `observation`.
    pub fn for_observation(observation: ResponseObservation) -> Self {
        if observation.is_complete {
            RelayMessage::ResponseComplete(observation)
        } else {
            RelayMessage::ResponseUpdate(observation)
        }
    }
}

/// Answers to [`RelayMessage`] requests, serialized without a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RelayReply {
    #[serde(rename_all = "camelCase")]
    Status {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        site_id: Option<String>,
    },
    Done {
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        text: String,
        is_complete: bool,
        site_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Conversation {
        messages: Vec<ConversationMessage>,
        site_id: Option<String>,
    },
    FileInjection(FileInjectionOutcome),
    Failure {
        success: bool,
        error: String,
    },
    /// Acknowledges a push.
    Ack,
}

impl RelayReply {
    pub fn status_ok(site_id: Option<String>) -> Self {
        RelayReply::Status {
            status: "ok".to_string(),
            site_id,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        RelayReply::Failure {
            success: false,
            error: error.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        match self {
            RelayReply::Done { success } => *success,
            RelayReply::FileInjection(outcome) => outcome.success,
            RelayReply::Failure { .. } => false,
            RelayReply::Status { .. }
            | RelayReply::Response { .. }
            | RelayReply::Conversation { .. }
            | RelayReply::Ack => true,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RelayReply::Failure { error, .. } => Some(error),
            RelayReply::FileInjection(outcome) => outcome.error.as_deref(),
            _ => None,
        }
    }
}

/// The answering half of one request. Consumed by [`Responder::respond`].
#[derive(Debug)]
pub struct Responder(oneshot::Sender<RelayReply>);

impl Responder {
    pub fn respond(self, reply: RelayReply) {
        if self.0.send(reply).is_err() {
            debug!("requester went away before the reply");
        }
    }
}

#[derive(Debug)]
pub struct Envelope {
    pub message: RelayMessage,
    /// Hostname of the site context that sent the message, if any.
    pub sender: Option<String>,
    /// Absent for pushes.
    pub responder: Option<Responder>,
}

fn answer(responder: Option<Responder>, reply: RelayReply) {
    if let Some(responder) = responder {
        responder.respond(reply);
    }
}

/// Knobs for every participant of the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub request_timeout: Duration,
    pub prompt: PromptConfig,
    pub files: FileInjectionConfig,
    pub observer: ObserverConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            prompt: PromptConfig::default(),
            files: FileInjectionConfig::default(),
            observer: ObserverConfig::default(),
        }
    }
}

/// Sending half of a participant's mailbox.
#[derive(Debug, Clone)]
pub struct RelayClient {
    peer: String,
    tx: mpsc::Sender<Envelope>,
    timeout: Duration,
}

impl RelayClient {
    pub(crate) fn new(peer: impl Into<String>, tx: mpsc::Sender<Envelope>, timeout: Duration) -> Self {
        Self {
            peer: peer.into(),
            tx,
            timeout,
        }
    }

    /// Send a request and wait for its reply. Never fails: a closed peer, a
    /// dropped responder or the deadline all come back as [`RelayReply::Failure`].
    pub async fn request(&self, message: RelayMessage, sender: Option<&str>) -> RelayReply {
        let kind = message.kind();
        let (tx, rx) = oneshot::channel();
        let envelope = Envelope {
            message,
            sender: sender.map(str::to_string),
            responder: Some(Responder(tx)),
        };
        if self.tx.send(envelope).await.is_err() {
            let err = CasterError::TransportClosed(self.peer.clone());
            debug!(peer = %self.peer, kind, "{err}");
            return RelayReply::failure(err.to_string());
        }
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                warn!(peer = %self.peer, kind, "request dropped without a reply");
                RelayReply::failure(format!("{kind} was dropped without a reply"))
            }
            Err(_) => {
                let err = CasterError::Timeout(format!("{kind} to {}", self.peer));
                warn!(peer = %self.peer, kind, "{err}");
                RelayReply::failure(err.to_string())
            }
        }
    }

    /// Deliver a push. A closed peer is not an error.
    pub async fn post(&self, message: RelayMessage, sender: Option<&str>) {
        let kind = message.kind();
        let envelope = Envelope {
            message,
            sender: sender.map(str::to_string),
            responder: None,
        };
        if self.tx.send(envelope).await.is_err() {
            debug!(peer = %self.peer, kind, "peer closed, push dropped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Orchestrator-side handle to one site context.
#[derive(Debug, Clone)]
pub struct SiteHandle {
    hostname: String,
    client: RelayClient,
}

impl SiteHandle {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub async fn request(&self, message: RelayMessage) -> RelayReply {
        self.client.request(message, None).await
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

/// The adapter instance living next to one page.
pub struct SiteContext {
    doc: Arc<dyn Document>,
    hostname: String,
    broker: RelayClient,
    observer: ResponseObserver,
    observations: mpsc::UnboundedSender<ResponseObservation>,
    config: RelayConfig,
}

impl SiteContext {
    /// Start a context for `doc` and return the handle that addresses it.
    pub fn spawn(doc: Arc<dyn Document>, broker: RelayClient, config: RelayConfig) -> Result<SiteHandle> {
        let hostname = doc.hostname()?;
        let (tx, inbox) = mpsc::channel(MAILBOX_CAPACITY);
        let (observations, observed) = mpsc::unbounded_channel();
        tokio::spawn(forward_observations(observed, broker.clone(), hostname.clone()));

        let handle = SiteHandle {
            hostname: hostname.clone(),
            client: RelayClient::new(hostname.clone(), tx, config.request_timeout),
        };
        let context = Self {
            doc,
            hostname,
            broker,
            observer: ResponseObserver::new(config.observer.clone()),
            observations,
            config,
        };
        tokio::spawn(context.run(inbox));
        Ok(handle)
    }

    /// Resolved on every message: the page may have navigated since the last one.
    fn adapter(&self) -> Option<&'static SiteAdapter> {
        match self.doc.hostname() {
            Ok(host) => resolve_adapter(&host).filter(|a| a.is_participating()),
            Err(e) => {
                warn!(host = %self.hostname, "hostname lookup failed: {e}");
                None
            }
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = inbox.recv().await {
            self.handle(envelope).await;
        }
        self.observer.stop().await;
        debug!(host = %self.hostname, "site context closed");
    }

    async fn handle(&mut self, envelope: Envelope) {
        let Envelope { message, responder, .. } = envelope;
        let adapter = self.adapter();
        let site_id = adapter.map(|a| a.id.to_string());
        debug!(host = %self.hostname, kind = message.kind(), "site context request");

        match message {
            RelayMessage::Ping => answer(responder, RelayReply::status_ok(site_id)),
            RelayMessage::InjectPrompt { prompt } => {
                if let Some(adapter) = adapter {
                    self.observer
                        .start(self.doc.clone(), adapter, self.observations.clone())
                        .await;
                }
                let doc = self.doc.clone();
                let config = self.config.prompt.clone();
                tokio::spawn(async move {
                    let success = inject_prompt(doc.as_ref(), adapter, &prompt, &config).await;
                    answer(responder, RelayReply::Done { success });
                });
            }
            RelayMessage::InjectFiles { files } => {
                if adapter.is_none() {
                    answer(responder, RelayReply::Done { success: false });
                    return;
                }
                let broker = self.broker.clone();
                let host = self.hostname.clone();
                tokio::spawn(async move {
                    let message = RelayMessage::ExecuteFileInjection { files_data: files };
                    let reply = broker.request(message, Some(&host)).await;
                    if let Some(error) = reply.error() {
                        warn!(host = %host, "file injection failed: {error}");
                    }
                    answer(responder, RelayReply::Done { success: reply.succeeded() });
                });
            }
            RelayMessage::GetResponse => {
                let reply = match adapter {
                    Some(adapter) => RelayReply::Response {
                        text: extract_response(self.doc.as_ref(), adapter),
                        is_complete: is_response_complete(self.doc.as_ref(), adapter),
                        site_id,
                    },
                    None => RelayReply::Response {
                        text: String::new(),
                        is_complete: true,
                        site_id: None,
                    },
                };
                answer(responder, reply);
            }
            RelayMessage::GetConversation => {
                let messages = adapter
                    .map(|adapter| extract_conversation(self.doc.as_ref(), adapter))
                    .unwrap_or_default();
                answer(responder, RelayReply::Conversation { messages, site_id });
            }
            other => answer(
                responder,
                RelayReply::failure(format!("{} is not handled by site contexts", other.kind())),
            ),
        }
    }
}

async fn forward_observations(
    mut observed: mpsc::UnboundedReceiver<ResponseObservation>,
    broker: RelayClient,
    hostname: String,
) {
    while let Some(observation) = observed.recv().await {
        broker
            .post(RelayMessage::for_observation(observation), Some(&hostname))
            .await;
    }
}

/// Runs page-world work for site contexts and fans their pushes out to listeners.
pub struct Broker {
    pages: Arc<Mutex<HashMap<String, Arc<dyn Document>>>>,
    events: broadcast::Sender<RelayMessage>,
    files: FileInjectionConfig,
}

/// Shared access to a running [`Broker`].
#[derive(Clone)]
pub struct BrokerHandle {
    client: RelayClient,
    pages: Arc<Mutex<HashMap<String, Arc<dyn Document>>>>,
    events: broadcast::Sender<RelayMessage>,
}

impl Broker {
    pub fn spawn(config: &RelayConfig) -> BrokerHandle {
        let (tx, inbox) = mpsc::channel(MAILBOX_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let pages: Arc<Mutex<HashMap<String, Arc<dyn Document>>>> = Arc::default();
        let broker = Self {
            pages: pages.clone(),
            events: events.clone(),
            files: config.files.clone(),
        };
        tokio::spawn(broker.run(inbox));
        BrokerHandle {
            client: RelayClient::new("broker", tx, config.request_timeout),
            pages,
            events,
        }
    }

    async fn run(self, mut inbox: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = inbox.recv().await {
            self.handle(envelope);
        }
        debug!("broker closed");
    }

    fn handle(&self, envelope: Envelope) {
        let Envelope {
            message,
            sender,
            responder,
        } = envelope;
        match message {
            RelayMessage::Ping => answer(responder, RelayReply::status_ok(None)),
            RelayMessage::ExecuteFileInjection { files_data } => {
                let page = sender
                    .as_deref()
                    .and_then(|host| self.pages.lock().get(host).cloned());
                let (Some(host), Some(doc)) = (sender, page) else {
                    warn!("file injection requested without a known sender");
                    answer(responder, RelayReply::failure(MISSING_SENDER_ERROR));
                    return;
                };
                let adapter = resolve_adapter(&host);
                let config = self.files.clone();
                tokio::spawn(async move {
                    let outcome = inject_files(doc.as_ref(), adapter, &files_data, &config).await;
                    answer(responder, RelayReply::FileInjection(outcome));
                });
            }
            push @ (RelayMessage::ResponseUpdate(_) | RelayMessage::ResponseComplete(_)) => {
                if self.events.send(push).is_err() {
                    debug!("no listeners for response updates");
                }
                answer(responder, RelayReply::Ack);
            }
            other => answer(
                responder,
                RelayReply::failure(format!("{} is not handled by the broker", other.kind())),
            ),
        }
    }
}

impl BrokerHandle {
    /// Make `doc` the page behind requests sent from `hostname`.
    pub fn register(&self, hostname: &str, doc: Arc<dyn Document>) {
        self.pages.lock().insert(hostname.to_string(), doc);
    }

    pub fn unregister(&self, hostname: &str) {
        self.pages.lock().remove(hostname);
    }

    pub fn client(&self) -> RelayClient {
        self.client.clone()
    }

    pub async fn request(&self, message: RelayMessage, sender: Option<&str>) -> RelayReply {
        self.client.request(message, sender).await
    }

    pub async fn post(&self, message: RelayMessage, sender: Option<&str>) {
        self.client.post(message, sender).await
    }

    /// Pushes forwarded by the broker, from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayMessage> {
        self.events.subscribe()
    }
}

/// Per-site result of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub site_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Delivery {
    fn from_reply(site_id: String, reply: &RelayReply) -> Self {
        Self {
            site_id,
            success: reply.succeeded(),
            error: reply.error().map(str::to_string),
        }
    }
}

/// The orchestrating surface: addresses site contexts and keeps the latest
/// observation per site. Must be created inside a tokio runtime.
pub struct Orchestrator {
    broker: BrokerHandle,
    contexts: Vec<SiteHandle>,
    board: Arc<Mutex<HashMap<String, ResponseObservation>>>,
    config: RelayConfig,
}

impl Orchestrator {
    pub fn new(config: RelayConfig) -> Self {
        let broker = Broker::spawn(&config);
        let board = Arc::default();
        tokio::spawn(track_responses(broker.subscribe(), Arc::clone(&board)));
        Self {
            broker,
            contexts: Vec::new(),
            board,
            config,
        }
    }

    /// Start a site context for `doc`. Returns the site it serves, if any.
    /// A context already attached for the same hostname is replaced.
    pub fn attach(&mut self, doc: Arc<dyn Document>) -> Result<Option<&'static str>> {
        let hostname = doc.hostname()?;
        self.broker.register(&hostname, doc.clone());
        let handle = SiteContext::spawn(doc, self.broker.client(), self.config.clone())?;
        self.contexts.retain(|c| c.hostname() != hostname);
        self.contexts.push(handle);

        let site = resolve_adapter(&hostname).map(|a| a.id);
        info!(host = %hostname, site = site.unwrap_or("none"), "context attached");
        Ok(site)
    }

    /// The live context whose hostname belongs to `site_id`.
    pub fn context_for(&self, site_id: &str) -> Option<&SiteHandle> {
        let adapter = adapter_by_id(site_id)?;
        self.contexts
            .iter()
            .find(|c| !c.is_closed() && adapter.matches_host(c.hostname()))
    }

    /// Registered sites with a live context, in registry order.
    pub fn attached_sites(&self) -> Vec<&'static str> {
        adapters::all()
            .iter()
            .filter(|a| self.context_for(a.id).is_some())
            .map(|a| a.id)
            .collect()
    }

    pub async fn send(&self, site_id: &str, message: RelayMessage) -> RelayReply {
        match self.context_for(site_id) {
            Some(handle) => handle.request(message).await,
            None => RelayReply::failure(format!("No context for {site_id}")),
        }
    }

    /// Send `prompt` to every site in `site_ids` at once. Clears the response board first.
    pub async fn broadcast_prompt(&self, site_ids: &[String], prompt: &str) -> Vec<Delivery> {
        self.board.lock().clear();
        info!(sites = site_ids.len(), "broadcasting prompt");
        let message = RelayMessage::InjectPrompt {
            prompt: prompt.to_string(),
        };
        self.broadcast(site_ids, message).await
    }

    pub async fn broadcast_files(&self, site_ids: &[String], files: Vec<AttachmentDescriptor>) -> Vec<Delivery> {
        info!(sites = site_ids.len(), files = files.len(), "broadcasting files");
        self.broadcast(site_ids, RelayMessage::InjectFiles { files }).await
    }

    async fn broadcast(&self, site_ids: &[String], message: RelayMessage) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        let mut pending = JoinSet::new();
        for (index, site_id) in site_ids.iter().enumerate() {
            if adapter_by_id(site_id).is_none() {
                debug!(site = %site_id, "unknown site id skipped");
                continue;
            }
            let Some(handle) = self.context_for(site_id).cloned() else {
                deliveries.push((
                    index,
                    Delivery {
                        site_id: site_id.clone(),
                        success: false,
                        error: Some(format!("No context for {site_id}")),
                    },
                ));
                continue;
            };
            let message = message.clone();
            let site_id = site_id.clone();
            pending.spawn(async move {
                let reply = handle.request(message).await;
                (index, Delivery::from_reply(site_id, &reply))
            });
        }
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok(delivery) => deliveries.push(delivery),
                Err(e) => warn!("delivery task failed: {e}"),
            }
        }
        deliveries.sort_by_key(|(index, _)| *index);
        deliveries.into_iter().map(|(_, delivery)| delivery).collect()
    }

    /// Latest observation per site, in registry order.
    pub fn responses(&self) -> Vec<ResponseObservation> {
        let board = self.board.lock();
        adapters::all()
            .iter()
            .filter_map(|a| board.get(a.id).cloned())
            .collect()
    }

    pub fn response(&self, site_id: &str) -> Option<ResponseObservation> {
        self.board.lock().get(site_id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayMessage> {
        self.broker.subscribe()
    }

    pub fn broker(&self) -> &BrokerHandle {
        &self.broker
    }
}

async fn track_responses(
    mut events: broadcast::Receiver<RelayMessage>,
    board: Arc<Mutex<HashMap<String, ResponseObservation>>>,
) {
    loop {
        match events.recv().await {
            Ok(RelayMessage::ResponseUpdate(observation) | RelayMessage::ResponseComplete(observation)) => {
                board.lock().insert(observation.site_id.clone(), observation);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "response board fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation(text: &str, is_complete: bool) -> ResponseObservation {
        ResponseObservation {
            site_id: "claude".into(),
            text: text.into(),
            is_complete,
            observed_at_epoch_millis: 1_700_000_000_000,
        }
    }

    #[test]
    fn messages_use_type_and_payload() {
        assert_eq!(serde_json::to_value(RelayMessage::Ping).unwrap(), json!({ "type": "PING" }));
        assert_eq!(
            serde_json::to_value(RelayMessage::InjectPrompt { prompt: "Hi".into() }).unwrap(),
            json!({ "type": "INJECT_PROMPT", "payload": { "prompt": "Hi" } })
        );
        assert_eq!(
            serde_json::to_value(RelayMessage::ExecuteFileInjection { files_data: vec![] }).unwrap(),
            json!({ "type": "EXECUTE_FILE_INJECTION", "payload": { "filesData": [] } })
        );
        assert_eq!(
            serde_json::to_value(RelayMessage::for_observation(observation("done", true))).unwrap(),
            json!({
                "type": "RESPONSE_COMPLETE",
                "payload": {
                    "siteId": "claude",
                    "text": "done",
                    "isComplete": true,
                    "observedAtEpochMillis": 1_700_000_000_000i64
                }
            })
        );
    }

    #[test]
    fn messages_parse_from_the_wire() {
        let parsed: RelayMessage =
            serde_json::from_value(json!({ "type": "GET_CONVERSATION" })).unwrap();
        assert_eq!(parsed, RelayMessage::GetConversation);
        let parsed: RelayMessage = serde_json::from_value(json!({
            "type": "INJECT_FILES",
            "payload": { "files": [{ "name": "a.txt", "type": "text/plain", "size": 1, "data": "YQ==", "lastModified": 5 }] }
        }))
        .unwrap();
        assert!(matches!(parsed, RelayMessage::InjectFiles { ref files } if files[0].name == "a.txt"));
    }

    #[test]
    fn replies_serialize_to_their_shapes() {
        assert_eq!(
            serde_json::to_value(RelayReply::status_ok(Some("grok".into()))).unwrap(),
            json!({ "status": "ok", "siteId": "grok" })
        );
        assert_eq!(serde_json::to_value(RelayReply::status_ok(None)).unwrap(), json!({ "status": "ok" }));
        assert_eq!(
            serde_json::to_value(RelayReply::Done { success: true }).unwrap(),
            json!({ "success": true })
        );
        assert_eq!(
            serde_json::to_value(RelayReply::failure("nope")).unwrap(),
            json!({ "success": false, "error": "nope" })
        );
        assert!(!RelayReply::failure("nope").succeeded());
        assert_eq!(RelayReply::failure("nope").error(), Some("nope"));
    }

    #[tokio::test]
    async fn dropped_responder_becomes_a_failure() {
        let (tx, mut inbox) = mpsc::channel(1);
        let client = RelayClient::new("test", tx, Duration::from_secs(1));
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                drop(envelope);
            }
        });
        let reply = client.request(RelayMessage::Ping, None).await;
        assert!(!reply.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let (tx, mut inbox) = mpsc::channel(1);
        let client = RelayClient::new("test", tx, Duration::from_millis(500));
        let parked = tokio::spawn(async move { inbox.recv().await });
        let reply = client.request(RelayMessage::GetResponse, None).await;
        assert!(reply.error().is_some_and(|e| e.starts_with("Timed out")));
        drop(parked);
    }

    #[tokio::test]
    async fn closed_peer_is_a_soft_failure() {
        let (tx, inbox) = mpsc::channel(1);
        drop(inbox);
        let client = RelayClient::new("gone", tx, Duration::from_secs(1));
        assert!(client.is_closed());
        client.post(RelayMessage::Ping, None).await;
        let reply = client.request(RelayMessage::Ping, None).await;
        assert_eq!(reply.error(), Some("Transport closed: gone"));
    }

    #[tokio::test]
    async fn broker_forwards_pushes_and_answers_pings() {
        let broker = Broker::spawn(&RelayConfig::default());
        // Nobody listening yet: the push is dropped quietly.
        broker.post(RelayMessage::for_observation(observation("a", false)), None).await;

        let mut events = broker.subscribe();
        broker.post(RelayMessage::for_observation(observation("b", false)), None).await;
        assert_eq!(
            events.recv().await.unwrap(),
            RelayMessage::ResponseUpdate(observation("b", false))
        );
        assert_eq!(broker.request(RelayMessage::Ping, None).await, RelayReply::status_ok(None));
    }

    #[tokio::test]
    async fn broker_rejects_unknown_senders() {
        let broker = Broker::spawn(&RelayConfig::default());
        let message = RelayMessage::ExecuteFileInjection { files_data: vec![] };
        let reply = broker.request(message.clone(), None).await;
        assert_eq!(reply.error(), Some(MISSING_SENDER_ERROR));
        let reply = broker.request(message, Some("claude.ai")).await;
        assert_eq!(reply.error(), Some(MISSING_SENDER_ERROR));
    }
}
