//! Site-agnostic element lookup.

use std::time::Duration;
use tracing::{debug, warn};

use crate::attachment::Attachment;
use crate::dom::{Document, NodeId, Scope};

/// Default wait for an element that should already be on screen.
pub const AWAIT_DEFAULT: Duration = Duration::from_millis(10_000);

pub const UPLOAD_INPUT: &str = r#"input[type="file"]"#;

/// First element matching `selector` in document order. Lookup errors count as "not found".
pub fn first_match(doc: &dyn Document, selector: &str) -> Option<NodeId> {
    match doc.query_all(Scope::Document, selector) {
        Ok(nodes) => nodes.into_iter().next(),
        Err(e) => {
            warn!(selector, "query failed: {e}");
            None
        }
    }
}

/// Last element matching `selector` in document order.
pub fn last_match(doc: &dyn Document, selector: &str) -> Option<NodeId> {
    match doc.query_all(Scope::Document, selector) {
        Ok(nodes) => nodes.into_iter().last(),
        Err(e) => {
            warn!(selector, "query failed: {e}");
            None
        }
    }
}

/// Resolve to the first element matching `selector`, waiting up to `timeout`
/// for one to appear. The mutation subscription is released on every path.
pub async fn await_element(
    doc: &dyn Document,
    selector: &str,
    timeout: Duration,
) -> Option<NodeId> {
    // Subscribe before the first look so an insertion in between is not missed.
    let mut mutations = doc.mutations();
    if let Some(node) = first_match(doc, selector) {
        return Some(node);
    }

    let wait = async {
        while mutations.changed().await {
            if let Some(node) = first_match(doc, selector) {
                return Some(node);
            }
        }
        None
    };
    let found = tokio::time::timeout(timeout, wait).await.ok().flatten();
    if found.is_none() {
        debug!(selector, timeout_ms = timeout.as_millis() as u64, "element did not appear");
    }
    found
}

/// Every element matching `selector`, descending into open shadow trees.
pub fn find_all_matches(doc: &dyn Document, selector: &str, scope: Scope) -> Vec<NodeId> {
    let mut found = match doc.query_all(scope, selector) {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!(selector, "query failed: {e}");
            return Vec::new();
        }
    };
    let hosts = doc.shadow_hosts(scope).unwrap_or_else(|e| {
        warn!("shadow host lookup failed: {e}");
        Vec::new()
    });
    for host in hosts {
        found.extend(find_all_matches(doc, selector, Scope::Shadow(host)));
    }
    found
}

/// An upload input and its `accept` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCandidate {
    pub node: NodeId,
    pub accept: Option<String>,
}

impl UploadCandidate {
    pub fn read(doc: &dyn Document, node: NodeId) -> Self {
        let accept = doc.attribute(node, "accept").ok().flatten();
        Self { node, accept }
    }

    /// Accepts any file type.
    pub fn is_unrestricted(&self) -> bool {
        match self.accept.as_deref().map(str::trim) {
            None | Some("") | Some("*") | Some("*/*") => true,
            Some(_) => false,
        }
    }
}

/// Pick the upload input to use for `attachments`.
///
/// One candidate is used as is. If any attachment is not an image, the first
/// unrestricted candidate wins. Otherwise the last candidate in document
/// order wins, which on the sites seen so far is the most specific control.
/// This is a best-effort policy, not a guarantee.
pub fn select_best_match(
    candidates: &[UploadCandidate],
    attachments: &[Attachment],
) -> Option<NodeId> {
    match candidates {
        [] => None,
        [only] => Some(only.node),
        _ => {
            let has_non_image = attachments.iter().any(|a| !a.is_image());
            if has_non_image {
                if let Some(general) = candidates.iter().find(|c| c.is_unrestricted()) {
                    debug!(node = general.node.0, "using unrestricted upload input for non-image files");
                    return Some(general.node);
                }
            }
            candidates.last().map(|c| c.node)
        }
    }
}

/// Find every upload input in the document and pick the best one.
pub fn best_upload_input(doc: &dyn Document, attachments: &[Attachment]) -> Option<NodeId> {
    let candidates: Vec<UploadCandidate> = find_all_matches(doc, UPLOAD_INPUT, Scope::Document)
        .into_iter()
        .map(|node| UploadCandidate::read(doc, node))
        .collect();
    debug!(count = candidates.len(), "upload inputs found");
    select_best_match(&candidates, attachments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::memory::{El, MemoryDocument};

    fn candidate(node: u64, accept: Option<&str>) -> UploadCandidate {
        UploadCandidate {
            node: NodeId(node),
            accept: accept.map(str::to_string),
        }
    }

    fn image() -> Attachment {
        Attachment::new("cat.png", "image/png", vec![1], 0)
    }

    fn pdf() -> Attachment {
        Attachment::new("paper.pdf", "application/pdf", vec![1], 0)
    }

    #[test]
    fn non_image_prefers_unrestricted_input() {
        let candidates = [candidate(1, Some("image/*")), candidate(2, None)];
        assert_eq!(select_best_match(&candidates, &[pdf()]), Some(NodeId(2)));
        assert_eq!(select_best_match(&candidates, &[image(), pdf()]), Some(NodeId(2)));
    }

    #[test]
    fn images_take_the_last_candidate() {
        let candidates = [candidate(2, None), candidate(1, Some("image/*"))];
        assert_eq!(select_best_match(&candidates, &[image()]), Some(NodeId(1)));
        let candidates = [candidate(1, Some("image/*")), candidate(2, None)];
        assert_eq!(select_best_match(&candidates, &[image()]), Some(NodeId(2)));
    }

    #[test]
    fn non_image_without_unrestricted_input_takes_the_last() {
        let candidates = [candidate(1, Some("image/*")), candidate(2, Some(".png"))];
        assert_eq!(select_best_match(&candidates, &[pdf()]), Some(NodeId(2)));
    }

    #[test]
    fn wildcard_accept_counts_as_unrestricted() {
        assert!(candidate(1, Some("*/*")).is_unrestricted());
        assert!(candidate(1, Some("*")).is_unrestricted());
        assert!(candidate(1, Some("")).is_unrestricted());
        assert!(!candidate(1, Some("image/*")).is_unrestricted());
    }

    #[test]
    fn single_and_empty_candidate_sets() {
        assert_eq!(select_best_match(&[], &[pdf()]), None);
        assert_eq!(select_best_match(&[candidate(7, Some("image/*"))], &[pdf()]), Some(NodeId(7)));
    }

    #[test]
    fn find_all_matches_descends_into_nested_shadow_trees() {
        let doc = MemoryDocument::new("example.com");
        let body = doc.body_id();
        let light = doc.append(body, El::new("input").attr("type", "file"));
        let outer = doc.append(body, El::new("upload-widget"));
        let outer_root = doc.attach_shadow(outer);
        let inner = doc.append(outer_root, El::new("file-picker"));
        let inner_root = doc.attach_shadow(inner);
        let deep = doc.append(inner_root, El::new("input").attr("type", "file"));

        let found = find_all_matches(&doc, UPLOAD_INPUT, Scope::Document);
        assert_eq!(found, vec![light, deep]);
    }

    #[tokio::test]
    async fn await_element_returns_existing_element_immediately() {
        let doc = MemoryDocument::new("example.com");
        let node = doc.append(doc.body_id(), El::new("textarea").attr("id", "prompt"));
        let found = await_element(&doc, "#prompt", Duration::from_millis(50)).await;
        assert_eq!(found, Some(node));
        assert_eq!(doc.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn await_element_sees_late_insertions() {
        let doc = std::sync::Arc::new(MemoryDocument::new("example.com"));
        let writer = doc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer.append(writer.body_id(), El::new("div").attr("class", "late"));
        });
        let found = await_element(doc.as_ref(), ".late", Duration::from_millis(1_000)).await;
        assert!(found.is_some());
        assert_eq!(doc.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn await_element_times_out_and_disconnects() {
        let doc = std::sync::Arc::new(MemoryDocument::new("example.com"));
        let writer = doc.clone();
        let inserted = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            writer.append(writer.body_id(), El::new("div").attr("class", "late"));
        });

        let started = tokio::time::Instant::now();
        let found = await_element(doc.as_ref(), ".late", Duration::from_millis(50)).await;
        assert_eq!(found, None);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(50) && waited < Duration::from_millis(200));
        assert_eq!(doc.active_subscriptions(), 0);

        inserted.await.unwrap();
        assert_eq!(doc.active_subscriptions(), 0);
    }
}
