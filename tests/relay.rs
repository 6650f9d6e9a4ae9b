use promptcaster::attachment::encode_all;
use promptcaster::conversation::{ConversationMessage, Role};
use promptcaster::dom::Document;
use promptcaster::dom::memory::{El, MemoryDocument};
use promptcaster::dom::NodeId;
use promptcaster::files::NOT_FOUND_ERROR;
use promptcaster::judge::{self, JudgeError};
use promptcaster::relay::{Delivery, RelayConfig};
use promptcaster::{Attachment, Orchestrator, RelayMessage, RelayReply, ResponseObservation};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn chatgpt_page() -> (Arc<MemoryDocument>, NodeId, NodeId) {
    let doc = Arc::new(MemoryDocument::new("chatgpt.com"));
    let body = doc.body_id();
    let input = doc.append(body, El::new("textarea").attr("id", "prompt-textarea"));
    let send = doc.append(body, El::new("button").attr("data-testid", "send-button"));
    (doc, input, send)
}

fn turn(role: &str, text: &str) -> El {
    El::new("div").attr("data-message-author-role", role).text(text)
}

fn answer(site: &str, text: &str) -> ResponseObservation {
    ResponseObservation {
        site_id: site.into(),
        text: text.into(),
        is_complete: true,
        observed_at_epoch_millis: 0,
    }
}

fn notes() -> Vec<promptcaster::AttachmentDescriptor> {
    encode_all(&[Attachment::new("notes.txt", "text/plain", b"hello".to_vec(), 1)])
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

async fn next_answer(events: &mut broadcast::Receiver<RelayMessage>, text: &str) -> ResponseObservation {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                RelayMessage::ResponseUpdate(o) | RelayMessage::ResponseComplete(o) if o.text == text => {
                    return o;
                }
                _ => {}
            }
        }
    })
    .await
    .expect("answer never observed")
}

#[tokio::test]
async fn ping_reports_the_site_behind_each_context() {
    let mut orchestrator = Orchestrator::new(RelayConfig::default());
    let (doc, _, _) = chatgpt_page();

    assert_eq!(orchestrator.attach(doc).unwrap(), Some("chatgpt"));
    let stranger = Arc::new(MemoryDocument::new("example.com"));
    assert_eq!(orchestrator.attach(stranger).unwrap(), None);

    assert_eq!(orchestrator.attached_sites(), vec!["chatgpt"]);
    assert_eq!(
        orchestrator.send("chatgpt", RelayMessage::Ping).await,
        RelayReply::status_ok(Some("chatgpt".into()))
    );
    assert_eq!(
        orchestrator.send("claude", RelayMessage::Ping).await.error(),
        Some("No context for claude")
    );
}

#[tokio::test(start_paused = true)]
async fn broadcast_prompt_reaches_the_page_and_the_answer_reaches_the_board() {
    let mut orchestrator = Orchestrator::new(RelayConfig::default());
    let (doc, input, send) = chatgpt_page();
    orchestrator.attach(doc.clone()).unwrap();
    let mut events = orchestrator.subscribe();

    let sites = vec!["chatgpt".to_string(), "bard".to_string(), "perplexity".to_string()];
    let deliveries = orchestrator.broadcast_prompt(&sites, "What is 2+2?").await;
    assert_eq!(
        deliveries,
        vec![
            Delivery {
                site_id: "chatgpt".into(),
                success: true,
                error: None,
            },
            Delivery {
                site_id: "perplexity".into(),
                success: false,
                error: Some("No context for perplexity".into()),
            },
        ]
    );
    assert_eq!(doc.value_of(input), "What is 2+2?");
    assert_eq!(doc.clicks_of(send), 1);

    doc.append(doc.body_id(), turn("assistant", "4"));
    let observed = next_answer(&mut events, "4").await;
    assert_eq!(observed.site_id, "chatgpt");
    assert!(observed.is_complete);

    eventually(|| orchestrator.response("chatgpt").is_some_and(|o| o.text == "4")).await;
    assert_eq!(orchestrator.responses().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn files_reach_the_page_through_the_broker() {
    let mut orchestrator = Orchestrator::new(RelayConfig::default());
    let (doc, _, _) = chatgpt_page();
    let upload = doc.append(doc.body_id(), El::new("input").attr("type", "file"));
    orchestrator.attach(doc.clone()).unwrap();

    let deliveries = orchestrator.broadcast_files(&["chatgpt".to_string()], notes()).await;
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].success);
    assert_eq!(doc.files_of(upload), vec!["notes.txt"]);
}

#[tokio::test(start_paused = true)]
async fn page_without_an_upload_surface_reports_not_found() {
    let mut orchestrator = Orchestrator::new(RelayConfig::default());
    let doc = Arc::new(MemoryDocument::new("chatgpt.com"));
    doc.append(doc.body_id(), El::new("div").text("nothing to upload into"));
    orchestrator.attach(doc).unwrap();

    let message = RelayMessage::ExecuteFileInjection { files_data: notes() };
    let reply = orchestrator.broker().request(message, Some("chatgpt.com")).await;
    assert!(matches!(reply, RelayReply::FileInjection(_)));
    assert!(!reply.succeeded());
    assert_eq!(reply.error(), Some(NOT_FOUND_ERROR));

    let deliveries = orchestrator.broadcast_files(&["chatgpt".to_string()], notes()).await;
    assert!(!deliveries[0].success);
}

#[tokio::test]
async fn conversation_comes_back_in_page_order() {
    let mut orchestrator = Orchestrator::new(RelayConfig::default());
    let (doc, _, _) = chatgpt_page();
    let thread = doc.append(doc.body_id(), El::new("main"));
    doc.append(thread, turn("user", "What is 2+2?"));
    doc.append(thread, turn("assistant", "4"));
    doc.append(thread, turn("user", "And 3+3?"));
    orchestrator.attach(doc).unwrap();

    let reply = orchestrator.send("chatgpt", RelayMessage::GetConversation).await;
    let RelayReply::Conversation { messages, site_id } = reply else {
        panic!("unexpected reply: {reply:?}");
    };
    assert_eq!(site_id.as_deref(), Some("chatgpt"));
    assert_eq!(
        messages,
        vec![
            ConversationMessage {
                role: Role::User,
                content: "What is 2+2?".into(),
            },
            ConversationMessage {
                role: Role::Assistant,
                content: "4".into(),
            },
            ConversationMessage {
                role: Role::User,
                content: "And 3+3?".into(),
            },
        ]
    );
}

#[tokio::test]
async fn reattaching_a_host_replaces_its_context() {
    let mut orchestrator = Orchestrator::new(RelayConfig::default());
    let (first, _, _) = chatgpt_page();
    first.append(first.body_id(), turn("assistant", "old tab"));
    orchestrator.attach(first).unwrap();

    let (second, _, _) = chatgpt_page();
    second.append(second.body_id(), turn("assistant", "new tab"));
    orchestrator.attach(second).unwrap();

    assert_eq!(orchestrator.attached_sites(), vec!["chatgpt"]);
    let reply = orchestrator.send("chatgpt", RelayMessage::GetResponse).await;
    assert_eq!(
        reply,
        RelayReply::Response {
            text: "new tab".into(),
            is_complete: true,
            site_id: Some("chatgpt".into()),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn judge_waits_for_two_answers_then_receives_the_transcripts() {
    let mut orchestrator = Orchestrator::new(RelayConfig::default());
    let (chatgpt, _, _) = chatgpt_page();
    chatgpt.append(chatgpt.body_id(), turn("user", "What is 2+2?"));
    chatgpt.append(chatgpt.body_id(), turn("assistant", "4"));
    orchestrator.attach(chatgpt).unwrap();

    let claude = Arc::new(MemoryDocument::new("claude.ai"));
    let editor = claude.append(
        claude.body_id(),
        El::new("div").attr("contenteditable", "true").attr("class", "ProseMirror"),
    );
    let send = claude.append(claude.body_id(), El::new("button").attr("aria-label", "Send message"));
    orchestrator.attach(claude.clone()).unwrap();

    let broker = orchestrator.broker();
    broker
        .post(RelayMessage::ResponseComplete(answer("chatgpt", "4")), Some("chatgpt.com"))
        .await;
    eventually(|| orchestrator.responses().len() == 1).await;
    assert_eq!(
        judge::send_to_judge(&orchestrator, Some("claude"), false).await,
        Err(JudgeError::NotEnoughResponses { found: 1 })
    );

    broker
        .post(RelayMessage::ResponseComplete(answer("grok", "four")), Some("grok.com"))
        .await;
    eventually(|| orchestrator.responses().len() == 2).await;
    assert_eq!(
        judge::send_to_judge(&orchestrator, None, false).await,
        Err(JudgeError::NoJudge)
    );

    let delivery = judge::send_to_judge(&orchestrator, Some("claude"), true).await.unwrap();
    assert!(delivery.success);
    assert_eq!(claude.clicks_of(send), 1);

    let prompt = claude.text_content(editor).unwrap();
    assert!(prompt.contains("## ChatGPT\n**User:** What is 2+2?\n\n**Assistant:** 4"));
    // No grok tab is attached, so its last answer stands in for the transcript.
    assert!(prompt.contains("## Grok\nfour"));
}
