use anyhow::{Result, bail};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use promptcaster::judge::{self, JudgeError};
use promptcaster::relay::Delivery;
use promptcaster::settings::{Settings, SettingsStore};
use promptcaster::{AttachmentDescriptor, Orchestrator, RelayMessage, RelayReply, ResponseObservation};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

const PORT_ATTEMPTS: u16 = 10;

pub struct AppState {
    orchestrator: Orchestrator,
    store: SettingsStore,
    settings: Mutex<Settings>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, store: SettingsStore, settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            store,
            settings: Mutex::new(settings),
        })
    }
}

#[derive(Deserialize)]
struct PromptPayload {
    prompt: String,
}

#[derive(Deserialize)]
struct FilesPayload {
    files: Vec<AttachmentDescriptor>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JudgePayload {
    judge_site_id: Option<String>,
    full_conversation: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SitesView {
    attached: Vec<&'static str>,
    enabled: Vec<String>,
    judge_site_id: Option<String>,
}

/// Bind the first free port from `port` upward and serve the UI until shutdown.
pub async fn serve(state: Arc<AppState>, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/sites", get(sites_handler))
        .route("/prompt", post(prompt_handler))
        .route("/files", post(files_handler))
        .route("/judge", post(judge_handler))
        .route("/responses", get(responses_handler))
        .route("/conversation/{site}", get(conversation_handler))
        .route("/settings", get(settings_handler).post(update_settings_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(PORT_ATTEMPTS) {
        match tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            Ok(listener) => {
                bound = Some((listener, p));
                break;
            }
            Err(e) => debug!(port = p, "port unavailable: {e}"),
        }
    }
    let Some((listener, port)) = bound else {
        bail!("Could not bind to any port {port}-{}", port.saturating_add(PORT_ATTEMPTS - 1));
    };

    info!("Web UI running at http://localhost:{port}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn sites_handler(State(state): State<Arc<AppState>>) -> Json<SitesView> {
    let (enabled, judge_site_id) = {
        let settings = state.settings.lock();
        (settings.enabled_ids(), settings.judge_site_id.clone())
    };
    Json(SitesView {
        attached: state.orchestrator.attached_sites(),
        enabled,
        judge_site_id,
    })
}

async fn prompt_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PromptPayload>,
) -> Response {
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Prompt is empty");
    }
    let sites = state.settings.lock().enabled_ids();
    info!(chars = prompt.len(), "POST /prompt");
    let deliveries: Vec<Delivery> = state.orchestrator.broadcast_prompt(&sites, prompt).await;
    Json(deliveries).into_response()
}

async fn files_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FilesPayload>,
) -> Response {
    if payload.files.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No files given");
    }
    let sites = state.settings.lock().enabled_ids();
    info!(files = payload.files.len(), "POST /files");
    let deliveries = state.orchestrator.broadcast_files(&sites, payload.files).await;
    Json(deliveries).into_response()
}

async fn judge_handler(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<JudgePayload>>,
) -> Response {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let (judge_id, full_conversation) = {
        let settings = state.settings.lock();
        (
            payload.judge_site_id.or_else(|| settings.judge_site_id.clone()),
            payload
                .full_conversation
                .unwrap_or(settings.judge_uses_full_conversation),
        )
    };
    match judge::send_to_judge(&state.orchestrator, judge_id.as_deref(), full_conversation).await {
        Ok(delivery) => Json(delivery).into_response(),
        Err(e @ (JudgeError::NoJudge | JudgeError::NotEnoughResponses { .. })) => {
            error_response(StatusCode::CONFLICT, &e.to_string())
        }
        Err(e @ JudgeError::UnknownJudge(_)) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn responses_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ResponseObservation>> {
    Json(state.orchestrator.responses())
}

async fn conversation_handler(
    State(state): State<Arc<AppState>>,
    Path(site): Path<String>,
) -> Response {
    match state.orchestrator.send(&site, RelayMessage::GetConversation).await {
        reply @ RelayReply::Conversation { .. } => Json(reply).into_response(),
        other => {
            let error = other.error().unwrap_or("Unexpected reply").to_string();
            warn!(site = %site, "conversation unavailable: {error}");
            error_response(StatusCode::NOT_FOUND, &error)
        }
    }
}

async fn settings_handler(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(state.settings.lock().clone())
}

async fn update_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<Value>,
) -> Response {
    match state.store.update(patch) {
        Ok(settings) => {
            *state.settings.lock() = settings.clone();
            Json(settings).into_response()
        }
        Err(e) => {
            warn!("settings update rejected: {e}");
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.orchestrator.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(message) => Event::default()
            .event(message.kind())
            .json_data(&message)
            .ok()
            .map(Ok::<_, Infallible>),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>PromptCaster</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    min-height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 24px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  header .sites { margin-left: auto; font-size: 13px; color: #888; }
  .main {
    flex: 1;
    width: 100%;
    max-width: 1200px;
    margin: 0 auto;
    padding: 24px 32px;
    display: flex;
    flex-direction: column;
    gap: 16px;
  }
  .input-area { display: flex; gap: 8px; }
  #prompt {
    flex: 1;
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 16px;
    color: #fff;
    font-size: 16px;
    outline: none;
    resize: vertical;
    min-height: 48px;
  }
  #prompt:focus { border-color: #6366f1; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 12px 20px;
    font-size: 15px;
    font-weight: 600;
    cursor: pointer;
  }
  button:hover { background: #4f46e5; }
  button.secondary { background: #1a1a2e; }
  #grid {
    display: grid;
    grid-template-columns: repeat(auto-fill, minmax(320px, 1fr));
    gap: 12px;
  }
  .card {
    background: #111118;
    border-left: 3px solid #3b82f6;
    border-radius: 8px;
    padding: 12px 14px;
    font-size: 14px;
    line-height: 1.5;
    white-space: pre-wrap;
  }
  .card.done { border-left-color: #22c55e; }
  .card h2 { font-size: 13px; color: #a5b4fc; margin-bottom: 6px; }
  #status { font-size: 13px; color: #fca5a5; min-height: 18px; }
</style>
</head>
<body>
  <header>
    <h1>PromptCaster</h1>
    <span class="sites" id="sites"></span>
  </header>
  <div class="main">
    <div class="input-area">
      <textarea id="prompt" placeholder="Ask every enabled assistant..." autofocus></textarea>
      <button onclick="cast()">Send</button>
      <button class="secondary" onclick="judge()">Judge</button>
    </div>
    <div id="status"></div>
    <div id="grid"></div>
  </div>
<script>
  const grid = document.getElementById('grid');
  const status = document.getElementById('status');
  const cards = {};

  function card(siteId) {
    if (!cards[siteId]) {
      const div = document.createElement('div');
      div.className = 'card';
      div.innerHTML = '<h2></h2><div class="body"></div>';
      div.querySelector('h2').textContent = siteId;
      grid.appendChild(div);
      cards[siteId] = div;
    }
    return cards[siteId];
  }

  function show(obs) {
    const div = card(obs.siteId);
    div.querySelector('.body').textContent = obs.text;
    div.className = obs.isComplete ? 'card done' : 'card';
  }

  function report(deliveries) {
    const failed = deliveries.filter(d => !d.success);
    status.textContent = failed.map(d => d.siteId + ': ' + (d.error || 'failed')).join('  ');
  }

  async function cast() {
    const prompt = document.getElementById('prompt').value.trim();
    if (!prompt) return;
    status.textContent = '';
    const res = await fetch('/prompt', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({prompt}),
    });
    report(await res.json());
  }

  async function judge() {
    const res = await fetch('/judge', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: '{}',
    });
    const body = await res.json();
    status.textContent = res.ok ? (body.success ? 'Sent to ' + body.siteId : body.error || 'Judge failed') : body.error;
  }

  fetch('/sites').then(r => r.json()).then(s => {
    document.getElementById('sites').textContent = s.attached.join(' · ');
  });
  fetch('/responses').then(r => r.json()).then(list => list.forEach(show));

  const es = new EventSource('/events');
  es.addEventListener('RESPONSE_UPDATE', e => show(JSON.parse(e.data).payload));
  es.addEventListener('RESPONSE_COMPLETE', e => show(JSON.parse(e.data).payload));
</script>
</body>
</html>
"##;
