//! Handing the collected answers to one site acting as judge.

use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::{self, adapter_by_id};
use crate::conversation::render_transcript;
use crate::observer::ResponseObservation;
use crate::relay::{Delivery, Orchestrator, RelayMessage, RelayReply};

pub const MIN_RESPONSES: usize = 2;

const PREAMBLE: &str = "You are a judge evaluating responses from different AI assistants. \
Your task is to synthesize the best answer from the responses below.";

const INSTRUCTIONS: &str = "Analyze each response for accuracy, completeness, clarity, and helpfulness. \
You may include your reasoning and critical thinking. Then provide a final consolidated answer that \
combines the best elements from all responses. Always end with a clear \"## Final Answer\" section \
containing the synthesized response.";

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JudgeError {
    #[error("No judge site selected")]
    NoJudge,

    #[error("Unknown judge site: {0}")]
    UnknownJudge(String),

    #[error("Need at least 2 complete responses to judge, have {found}")]
    NotEnoughResponses { found: usize },
}

/// One answer as the judge will see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeSection {
    pub site_id: String,
    pub display_name: String,
    pub body: String,
}

/// Complete answers from every site but the judge, in registry order.
pub fn judge_sections(
    responses: &[ResponseObservation],
    judge_id: &str,
) -> Result<Vec<JudgeSection>, JudgeError> {
    let mut eligible: Vec<&ResponseObservation> = responses
        .iter()
        .filter(|r| r.site_id != judge_id && r.is_complete)
        .collect();
    if eligible.len() < MIN_RESPONSES {
        return Err(JudgeError::NotEnoughResponses {
            found: eligible.len(),
        });
    }
    let rank = |site_id: &str| {
        adapters::all()
            .iter()
            .position(|a| a.id == site_id)
            .unwrap_or(usize::MAX)
    };
    eligible.sort_by_key(|r| rank(&r.site_id));

    Ok(eligible
        .into_iter()
        .map(|r| JudgeSection {
            site_id: r.site_id.clone(),
            display_name: adapter_by_id(&r.site_id)
                .map(|a| a.display_name.to_string())
                .unwrap_or_else(|| r.site_id.clone()),
            body: r.text.clone(),
        })
        .collect())
}

pub fn compose_judge_prompt(sections: &[JudgeSection]) -> String {
    let responses = sections
        .iter()
        .map(|s| format!("## {}\n{}", s.display_name, s.body))
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);
    format!("{PREAMBLE}\n\n{responses}\n\n---\n\n{INSTRUCTIONS}")
}

/// Compose the judge prompt from the response board and send it to `judge_id`.
///
/// With `full_conversation`, each section is the site's whole transcript
/// instead of its last answer (falling back to the answer when the site
/// cannot produce one).
pub async fn send_to_judge(
    orchestrator: &Orchestrator,
    judge_id: Option<&str>,
    full_conversation: bool,
) -> Result<Delivery, JudgeError> {
    let judge_id = judge_id.ok_or(JudgeError::NoJudge)?;
    if adapter_by_id(judge_id).is_none() {
        return Err(JudgeError::UnknownJudge(judge_id.to_string()));
    }
    let mut sections = judge_sections(&orchestrator.responses(), judge_id)?;

    if full_conversation {
        for section in &mut sections {
            match orchestrator.send(&section.site_id, RelayMessage::GetConversation).await {
                RelayReply::Conversation { messages, .. } if !messages.is_empty() => {
                    section.body = render_transcript(&messages);
                }
                RelayReply::Conversation { .. } => {}
                other => warn!(site = %section.site_id, ?other, "transcript unavailable, using last answer"),
            }
        }
    }

    let prompt = compose_judge_prompt(&sections);
    info!(judge = judge_id, sections = sections.len(), "sending to judge");
    let reply = orchestrator
        .send(judge_id, RelayMessage::InjectPrompt { prompt })
        .await;
    Ok(Delivery {
        site_id: judge_id.to_string(),
        success: reply.succeeded(),
        error: reply.error().map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(site: &str, text: &str, is_complete: bool) -> ResponseObservation {
        ResponseObservation {
            site_id: site.into(),
            text: text.into(),
            is_complete,
            observed_at_epoch_millis: 0,
        }
    }

    #[test]
    fn prompt_lists_each_answer_under_its_site_name() {
        let sections = vec![
            JudgeSection {
                site_id: "chatgpt".into(),
                display_name: "ChatGPT".into(),
                body: "4".into(),
            },
            JudgeSection {
                site_id: "grok".into(),
                display_name: "Grok".into(),
                body: "four".into(),
            },
        ];
        let prompt = compose_judge_prompt(&sections);
        assert!(prompt.starts_with("You are a judge evaluating responses"));
        assert!(prompt.contains("below.\n\n## ChatGPT\n4\n\n---\n\n## Grok\nfour\n\n---\n\nAnalyze each response"));
        assert!(prompt.ends_with("containing the synthesized response."));
        assert!(prompt.contains("\"## Final Answer\""));
    }

    #[test]
    fn judge_and_incomplete_answers_are_left_out() {
        let board = vec![
            response("grok", "g", true),
            response("claude", "c", true),
            response("gemini", "streaming", false),
            response("chatgpt", "o", true),
        ];
        let sections = judge_sections(&board, "claude").unwrap();
        let ids: Vec<&str> = sections.iter().map(|s| s.site_id.as_str()).collect();
        assert_eq!(ids, vec!["chatgpt", "grok"]);
        assert_eq!(sections[0].display_name, "ChatGPT");
    }

    #[test]
    fn fewer_than_two_answers_is_refused() {
        let board = vec![response("claude", "c", true), response("grok", "g", true)];
        assert_eq!(
            judge_sections(&board, "claude"),
            Err(JudgeError::NotEnoughResponses { found: 1 })
        );
    }
}
