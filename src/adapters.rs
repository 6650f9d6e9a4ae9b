//! Registry of the chat sites the pipeline knows how to drive.
//!
//! Each [`SiteAdapter`] is pure data: where the site lives and which selectors
//! find its input, send control, responses and streaming indicator. Adding a
//! site means adding an entry to [`REGISTRY`]; nothing else branches on site ids.

use serde::Serialize;
use url::Url;

/// Structural selectors for one site. Each is a CSS selector list.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SiteQueries {
    pub input_surface: &'static str,
    pub send_control: &'static str,
    pub response_container: &'static str,
    pub loading_indicator: Option<&'static str>,
    pub user_message: Option<&'static str>,
}

/// How a site expects attachments to arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UploadStrategy {
    /// An upload input is present in the document up front.
    DirectInput,
    /// Attachments go through a menu: open it, then pick the first button in the group.
    MenuDriven {
        menu_button: &'static str,
        menu_group: &'static str,
    },
    /// Try the generic attach buttons.
    GenericFallback,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteAdapter {
    pub id: &'static str,
    pub display_name: &'static str,
    pub canonical_url: &'static str,
    /// Hostnames served by this site. The first is the canonical one.
    pub hostnames: &'static [&'static str],
    pub queries: SiteQueries,
    pub upload: UploadStrategy,
    pub accent_color: &'static str,
}

impl SiteAdapter {
    pub fn canonical_hostname(&self) -> &'static str {
        self.hostnames[0]
    }

    /// An adapter missing any mandatory selector cannot take part in injection or extraction.
    pub fn is_participating(&self) -> bool {
        !self.queries.input_surface.trim().is_empty()
            && !self.queries.send_control.trim().is_empty()
            && !self.queries.response_container.trim().is_empty()
    }

    /// True when `host` is one of this site's hostnames or a subdomain of one.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.hostnames.iter().any(|known| {
            host == *known
                || host
                    .strip_suffix(known)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

pub static REGISTRY: [SiteAdapter; 5] = [
    SiteAdapter {
        id: "chatgpt",
        display_name: "ChatGPT",
        canonical_url: "https://chatgpt.com/",
        hostnames: &["chatgpt.com", "chat.openai.com"],
        queries: SiteQueries {
            input_surface: "#prompt-textarea",
            send_control: r#"button[data-testid="send-button"], button[aria-label="Send prompt"]"#,
            response_container: r#"[data-message-author-role="assistant"]"#,
            loading_indicator: Some(r#"[data-testid="send-button"][disabled]"#),
            user_message: Some(r#"[data-message-author-role="user"]"#),
        },
        upload: UploadStrategy::DirectInput,
        accent_color: "#10a37f",
    },
    SiteAdapter {
        id: "claude",
        display_name: "Claude",
        canonical_url: "https://claude.ai/new",
        hostnames: &["claude.ai"],
        queries: SiteQueries {
            input_surface: r#"[contenteditable="true"].ProseMirror, div[contenteditable="true"]"#,
            send_control: r#"button[aria-label="Send message"], button[aria-label="Send Message"]"#,
            response_container: "[data-is-streaming], .font-claude-message",
            loading_indicator: Some(r#"[data-is-streaming="true"]"#),
            user_message: Some(".font-user-message"),
        },
        upload: UploadStrategy::DirectInput,
        accent_color: "#d97706",
    },
    SiteAdapter {
        id: "gemini",
        display_name: "Gemini",
        canonical_url: "https://gemini.google.com/app",
        hostnames: &["gemini.google.com"],
        queries: SiteQueries {
            input_surface: ".ql-editor, rich-textarea .ql-editor",
            send_control: r#"button[aria-label="Send message"], .send-button"#,
            response_container: ".response-content, .model-response-text",
            loading_indicator: Some(".loading-indicator"),
            user_message: Some(r#".user-query, [class*="user-message"]"#),
        },
        upload: UploadStrategy::MenuDriven {
            menu_button: r#"button[aria-label="Open upload file menu"]"#,
            menu_group: r#"[aria-label="Upload file options"]"#,
        },
        accent_color: "#4285f4",
    },
    SiteAdapter {
        id: "perplexity",
        display_name: "Perplexity",
        canonical_url: "https://www.perplexity.ai/",
        hostnames: &["www.perplexity.ai", "perplexity.ai"],
        queries: SiteQueries {
            input_surface: r#"textarea[placeholder*="Ask"]"#,
            send_control: r#"button[aria-label="Submit"], button[type="submit"]"#,
            response_container: r#".prose, [class*="answer"]"#,
            loading_indicator: Some(r#"[class*="loading"]"#),
            user_message: Some(r#"[class*="query"], [class*="question"]"#),
        },
        upload: UploadStrategy::GenericFallback,
        accent_color: "#20b8cd",
    },
    SiteAdapter {
        id: "grok",
        display_name: "Grok",
        canonical_url: "https://grok.com/",
        hostnames: &["grok.com"],
        queries: SiteQueries {
            input_surface: r#"[contenteditable="true"].ProseMirror"#,
            send_control: r#"button[type="submit"][aria-label="Submit"]"#,
            response_container: ".message-bubble:not(.bg-surface-l1)",
            // Grok exposes nothing that tracks streaming.
            loading_indicator: None,
            user_message: Some(".message-bubble.bg-surface-l1"),
        },
        upload: UploadStrategy::GenericFallback,
        accent_color: "#f97316",
    },
];

/// Find the adapter for a document origin. Accepts a full URL, an origin, or a bare hostname.
pub fn resolve_adapter(origin: &str) -> Option<&'static SiteAdapter> {
    let host = match Url::parse(origin) {
        Ok(url) => url.host_str()?.to_string(),
        Err(_) => origin.trim().to_string(),
    };
    if host.is_empty() {
        return None;
    }
    REGISTRY.iter().find(|adapter| adapter.matches_host(&host))
}

pub fn adapter_by_id(id: &str) -> Option<&'static SiteAdapter> {
    REGISTRY.iter().find(|adapter| adapter.id == id)
}

pub fn all() -> &'static [SiteAdapter] {
    &REGISTRY
}

pub fn ids() -> Vec<&'static str> {
    REGISTRY.iter().map(|adapter| adapter.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<_> = REGISTRY.iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), REGISTRY.len());
    }

    #[test]
    fn every_registered_adapter_participates() {
        for adapter in all() {
            assert!(adapter.is_participating(), "{} is missing selectors", adapter.id);
        }
    }

    #[test]
    fn resolves_every_declared_hostname() {
        for adapter in all() {
            for host in adapter.hostnames {
                let resolved = resolve_adapter(host).map(|a| a.id);
                assert_eq!(resolved, Some(adapter.id), "host {host}");
            }
            let from_url = resolve_adapter(adapter.canonical_url).map(|a| a.id);
            assert_eq!(from_url, Some(adapter.id));
        }
    }

    #[test]
    fn resolves_aliases_and_subdomains() {
        assert_eq!(resolve_adapter("https://chat.openai.com/c/123").map(|a| a.id), Some("chatgpt"));
        assert_eq!(resolve_adapter("labs.perplexity.ai").map(|a| a.id), Some("perplexity"));
        assert_eq!(resolve_adapter("CLAUDE.AI").map(|a| a.id), Some("claude"));
    }

    #[test]
    fn unknown_hosts_are_not_participating() {
        for host in ["example.com", "notclaude.ai", "claude.ai.evil.com", "", "about:blank"] {
            assert!(resolve_adapter(host).is_none(), "host {host:?}");
        }
    }

    #[test]
    fn grok_has_no_loading_indicator() {
        let grok = adapter_by_id("grok").unwrap();
        assert!(grok.queries.loading_indicator.is_none());
    }

    #[test]
    fn only_gemini_uses_the_upload_menu() {
        let menu_driven: Vec<_> = all()
            .iter()
            .filter(|a| matches!(a.upload, UploadStrategy::MenuDriven { .. }))
            .map(|a| a.id)
            .collect();
        assert_eq!(menu_driven, vec!["gemini"]);
    }
}
