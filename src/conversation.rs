//! Rebuilding a site's transcript from the page.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapters::SiteAdapter;
use crate::dom::{Document, NodeId, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

/// The user and assistant turns on the page, in document order.
///
/// Empty when the site has no user-message selector. Turns with no text are dropped.
pub fn extract_conversation(doc: &dyn Document, adapter: &SiteAdapter) -> Vec<ConversationMessage> {
    let Some(user_query) = adapter.queries.user_message else {
        debug!(site = adapter.id, "no user-message selector, transcript unsupported");
        return Vec::new();
    };

    let mut turns: Vec<(Role, NodeId)> = Vec::new();
    for (role, selector) in [
        (Role::User, user_query),
        (Role::Assistant, adapter.queries.response_container),
    ] {
        match doc.query_all(Scope::Document, selector) {
            Ok(nodes) => turns.extend(nodes.into_iter().map(|node| (role, node))),
            Err(e) => warn!(site = adapter.id, ?role, "transcript query failed: {e}"),
        }
    }

    // The two collections interleave on the page; only the DOM knows the order.
    let nodes: Vec<NodeId> = turns.iter().map(|(_, node)| *node).collect();
    let positions = match doc.document_positions(&nodes) {
        Ok(positions) => positions,
        Err(e) => {
            warn!(site = adapter.id, "could not order transcript: {e}");
            return Vec::new();
        }
    };
    let mut turns: Vec<(usize, Role, NodeId)> = turns
        .into_iter()
        .zip(positions)
        .filter_map(|((role, node), position)| Some((position?, role, node)))
        .collect();
    turns.sort_by_key(|(position, _, _)| *position);
    turns.dedup_by_key(|(_, _, node)| *node);

    turns
        .into_iter()
        .filter_map(|(_, role, node)| {
            let content = doc.text_content(node).ok()?.trim().to_string();
            (!content.is_empty()).then_some(ConversationMessage { role, content })
        })
        .collect()
}

/// Render a transcript as `**User:**` / `**Assistant:**` paragraphs.
pub fn render_transcript(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("**{speaker}:** {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
