//! In-process document used by tests and dry runs.
//!
//! The page is a [`scraper::Html`] tree that gets edited in place, and queries
//! run through [`scraper::Selector`]. Shadow roots and detached elements are
//! orphan nodes of the same tree, so document-scoped queries never see them.
//! Per-element page state (field values, file lists, recorded events, scripted
//! click side effects) lives next to the tree, keyed by [`NodeId`].

use ego_tree::NodeRef;
use parking_lot::Mutex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashMap;

use super::{DispatchOutcome, DomEvent, Document, MutationHub, MutationSubscription, NodeId, Scope};
use crate::attachment::Attachment;
use crate::error::{CasterError, Result};

const SHADOW_ROOT_TAG: &str = "#shadow-root";

/// Element description used to build a [`MemoryDocument`].
#[derive(Debug, Clone, Default)]
pub struct El {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    handles_paste: bool,
}

impl El {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// The element's paste handler consumes pasted files and prevents the default.
    pub fn handles_paste(mut self) -> Self {
        self.handles_paste = true;
        self
    }
}

/// Scripted consequence of clicking an element.
#[derive(Debug, Clone, Copy)]
pub enum ClickEffect {
    /// Click another element, as a button wired to a hidden upload input does.
    Click(NodeId),
    /// Insert a detached element under `parent`.
    Attach { parent: NodeId, node: NodeId },
}

/// Page state the markup tree does not carry.
#[derive(Debug)]
struct Slot {
    node: ego_tree::NodeId,
    shadow_root: Option<NodeId>,
    value: String,
    files: Vec<String>,
    events: Vec<String>,
    clicks: usize,
    submits: usize,
    handles_paste: bool,
    on_click: Vec<ClickEffect>,
}

impl Slot {
    fn new(node: ego_tree::NodeId) -> Self {
        Self {
            node,
            shadow_root: None,
            value: String::new(),
            files: Vec::new(),
            events: Vec::new(),
            clicks: 0,
            submits: 0,
            handles_paste: false,
            on_click: Vec::new(),
        }
    }
}

struct Page {
    hostname: String,
    html: Html,
    slots: Vec<Slot>,
    ids: HashMap<ego_tree::NodeId, NodeId>,
    body: NodeId,
    /// `Some(captured)` while upload-input clicks are intercepted.
    intercept: Option<Option<NodeId>>,
    pickers_opened: usize,
    focused: Option<NodeId>,
    editing_command_enabled: bool,
}

pub struct MemoryDocument {
    page: Mutex<Page>,
    hub: MutationHub,
}

/// First top-level node of a body-context fragment.
fn parse_one(markup: &str) -> Option<Node> {
    let fragment = Html::parse_fragment(markup);
    let first = fragment.root_element().first_child()?;
    Some(first.value().clone())
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn element_node(tag: &str, attrs: &[(String, String)]) -> Node {
    let mut markup = format!("<{tag}");
    for (name, value) in attrs {
        markup.push_str(&format!(" {name}=\"{}\"", escape(value)));
    }
    markup.push_str(&format!("></{tag}>"));
    match parse_one(&markup) {
        Some(node @ Node::Element(_)) => node,
        _ => {
            tracing::warn!(tag, "tag cannot stand in a body fragment, using a bare fragment node");
            Node::Fragment
        }
    }
}

fn text_node(text: &str) -> Option<Node> {
    parse_one(&escape(text)).filter(Node::is_text)
}

impl Page {
    fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.slots.get(id.0 as usize).ok_or(CasterError::StaleNode(id.0))
    }

    fn slot_mut(&mut self, id: NodeId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.0 as usize)
            .ok_or(CasterError::StaleNode(id.0))
    }

    fn node(&self, id: NodeId) -> Result<NodeRef<'_, Node>> {
        let slot = self.slot(id)?;
        self.html.tree.get(slot.node).ok_or(CasterError::StaleNode(id.0))
    }

    fn element(&self, id: NodeId) -> Result<ElementRef<'_>> {
        ElementRef::wrap(self.node(id)?).ok_or(CasterError::StaleNode(id.0))
    }

    fn register(&mut self, node: ego_tree::NodeId) -> NodeId {
        let id = NodeId(self.slots.len() as u64);
        self.slots.push(Slot::new(node));
        self.ids.insert(node, id);
        id
    }

    fn create(&mut self, el: El) -> NodeId {
        let mut orphan = self.html.tree.orphan(element_node(&el.tag, &el.attrs));
        if let Some(text) = text_node(&el.text) {
            orphan.append(text);
        }
        let node = orphan.id();
        let id = self.register(node);
        self.slots[id.0 as usize].handles_paste = el.handles_paste;
        id
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let child = self.slot(child)?.node;
        let parent_node = self.slot(parent)?.node;
        let mut parent = self
            .html
            .tree
            .get_mut(parent_node)
            .ok_or(CasterError::StaleNode(parent.0))?;
        parent.append_id(child);
        Ok(())
    }

    fn detach(&mut self, node: ego_tree::NodeId) {
        if let Some(mut node) = self.html.tree.get_mut(node) {
            node.detach();
        }
    }

    /// Drop the direct children of `id` that `remove` selects.
    fn clear_children(&mut self, id: NodeId, remove: impl Fn(&Node) -> bool) -> Result<()> {
        let doomed: Vec<_> = self
            .node(id)?
            .children()
            .filter(|c| remove(c.value()))
            .map(|c| c.id())
            .collect();
        for child in doomed {
            self.detach(child);
        }
        Ok(())
    }

    fn replace_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        self.clear_children(id, |_| true)?;
        if let Some(text) = text_node(text) {
            let node = self.slot(id)?.node;
            if let Some(mut node) = self.html.tree.get_mut(node) {
                node.append(text);
            }
        }
        Ok(())
    }

    fn scope_root(&self, scope: Scope) -> Result<Option<NodeRef<'_, Node>>> {
        Ok(match scope {
            Scope::Document => Some(self.html.tree.root()),
            Scope::Subtree(node) => Some(self.node(node)?),
            Scope::Shadow(host) => match self.slot(host)?.shadow_root {
                Some(root) => Some(self.node(root)?),
                None => None,
            },
        })
    }

    /// Registered light-DOM elements below `root`, in document order.
    fn descendants<'a>(&'a self, root: NodeRef<'a, Node>) -> impl Iterator<Item = (NodeId, ElementRef<'a>)> {
        root.descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .filter_map(|el| self.ids.get(&el.id()).map(|id| (*id, el)))
    }

    /// Composed-tree preorder positions: a shadow tree sits right after its host.
    fn positions(&self) -> HashMap<NodeId, usize> {
        let mut order = HashMap::new();
        let mut stack = vec![self.html.tree.root().id()];
        while let Some(current) = stack.pop() {
            let Some(node) = self.html.tree.get(current) else {
                continue;
            };
            stack.extend(node.children().rev().map(|c| c.id()));
            let Some(id) = self.ids.get(&current).copied() else {
                continue;
            };
            order.insert(id, order.len());
            if let Some(shadow) = self.slots[id.0 as usize].shadow_root {
                stack.push(self.slots[shadow.0 as usize].node);
            }
        }
        order
    }

    fn is_file_input(&self, id: NodeId) -> bool {
        self.element(id).is_ok_and(|el| {
            let el = el.value();
            el.name() == "input" && el.attr("type") == Some("file")
        })
    }

    fn form_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)
            .ok()?
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "form")
            .and_then(|form| self.ids.get(&form.id()).copied())
    }

    fn set_attrs(&mut self, id: NodeId, edit: impl FnOnce(&mut Vec<(String, String)>)) -> Result<()> {
        let (tag, mut attrs) = {
            let el = self.element(id)?;
            let el = el.value();
            let attrs: Vec<(String, String)> = el
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            (el.name().to_string(), attrs)
        };
        edit(&mut attrs);
        let rebuilt = element_node(&tag, &attrs);
        let node = self.slot(id)?.node;
        if let Some(mut node) = self.html.tree.get_mut(node) {
            *node.value() = rebuilt;
        }
        Ok(())
    }

    /// Returns true if the tree structure changed.
    fn click(&mut self, id: NodeId) -> Result<bool> {
        let file_input = self.is_file_input(id);
        let slot = self.slot_mut(id)?;
        slot.clicks += 1;
        slot.events.push("click".to_string());
        let effects = slot.on_click.clone();

        if file_input {
            if self.intercept == Some(None) {
                self.intercept = Some(Some(id));
            } else {
                self.pickers_opened += 1;
            }
        }

        let mut mutated = false;
        for effect in effects {
            match effect {
                ClickEffect::Click(other) => mutated |= self.click(other)?,
                ClickEffect::Attach { parent, node } => {
                    self.attach(parent, node)?;
                    mutated = true;
                }
            }
        }
        Ok(mutated)
    }
}

impl MemoryDocument {
    pub fn new(hostname: &str) -> Self {
        let html = Html::parse_document("<html><head></head><body></body></html>");
        let elements: Vec<(ego_tree::NodeId, bool)> = html
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .map(|el| (el.id(), el.value().name() == "body"))
            .collect();
        let mut page = Page {
            hostname: hostname.to_string(),
            html,
            slots: Vec::new(),
            ids: HashMap::new(),
            body: NodeId(0),
            intercept: None,
            pickers_opened: 0,
            focused: None,
            editing_command_enabled: true,
        };
        for (node, is_body) in elements {
            let id = page.register(node);
            if is_body {
                page.body = id;
            }
        }
        Self {
            page: Mutex::new(page),
            hub: MutationHub::default(),
        }
    }

    pub fn body_id(&self) -> NodeId {
        self.page.lock().body
    }

    /// Append a new element under `parent` and notify observers.
    pub fn append(&self, parent: NodeId, el: El) -> NodeId {
        let id = {
            let mut page = self.page.lock();
            let id = page.create(el);
            if let Err(e) = page.attach(parent, id) {
                tracing::warn!("append failed: {e}");
            }
            id
        };
        self.hub.notify();
        id
    }

    /// Create an element that is not yet in the document.
    pub fn create_detached(&self, el: El) -> NodeId {
        self.page.lock().create(el)
    }

    pub fn attach(&self, parent: NodeId, node: NodeId) {
        if let Err(e) = self.page.lock().attach(parent, node) {
            tracing::warn!("attach failed: {e}");
        }
        self.hub.notify();
    }

    /// Give `host` an open shadow tree and return its root.
    pub fn attach_shadow(&self, host: NodeId) -> NodeId {
        let mut page = self.page.lock();
        let node = page.html.tree.orphan(Node::Fragment).id();
        let root = page.register(node);
        if let Ok(slot) = page.slot_mut(host) {
            slot.shadow_root = Some(root);
        }
        root
    }

    pub fn remove(&self, node: NodeId) {
        {
            let mut page = self.page.lock();
            if let Ok(slot) = page.slot(node) {
                let node = slot.node;
                page.detach(node);
            }
        }
        self.hub.notify();
    }

    /// Replace the element's own text, keeping its child elements.
    pub fn write_text(&self, node: NodeId, text: &str) {
        {
            let mut page = self.page.lock();
            let written = page.clear_children(node, Node::is_text).and_then(|()| {
                let target = page.slot(node)?.node;
                if let (Some(text), Some(mut target)) = (text_node(text), page.html.tree.get_mut(target)) {
                    target.prepend(text);
                }
                Ok(())
            });
            if let Err(e) = written {
                tracing::warn!("write_text failed: {e}");
            }
        }
        self.hub.notify();
    }

    pub fn set_attr(&self, node: NodeId, name: &str, value: &str) {
        let result = self.page.lock().set_attrs(node, |attrs| {
            match attrs.iter_mut().find(|(k, _)| k == name) {
                Some(slot) => slot.1 = value.to_string(),
                None => attrs.push((name.to_string(), value.to_string())),
            }
        });
        if let Err(e) = result {
            tracing::warn!("set_attr failed: {e}");
        }
        self.hub.notify();
    }

    pub fn remove_attr(&self, node: NodeId, name: &str) {
        let result = self
            .page
            .lock()
            .set_attrs(node, |attrs| attrs.retain(|(k, _)| k != name));
        if let Err(e) = result {
            tracing::warn!("remove_attr failed: {e}");
        }
        self.hub.notify();
    }

    pub fn on_click(&self, node: NodeId, effect: ClickEffect) {
        if let Ok(slot) = self.page.lock().slot_mut(node) {
            slot.on_click.push(effect);
        }
    }

    /// Make the editing command fail, as a page without an editor would.
    pub fn disable_editing_command(&self) {
        self.page.lock().editing_command_enabled = false;
    }

    fn read<T>(&self, node: NodeId, f: impl FnOnce(&Slot) -> T) -> T
    where
        T: Default,
    {
        self.page.lock().slot(node).map(f).unwrap_or_default()
    }

    pub fn value_of(&self, node: NodeId) -> String {
        self.read(node, |s| s.value.clone())
    }

    pub fn files_of(&self, node: NodeId) -> Vec<String> {
        self.read(node, |s| s.files.clone())
    }

    pub fn events_of(&self, node: NodeId) -> Vec<String> {
        self.read(node, |s| s.events.clone())
    }

    pub fn clicks_of(&self, node: NodeId) -> usize {
        self.read(node, |s| s.clicks)
    }

    pub fn submits_of(&self, node: NodeId) -> usize {
        self.read(node, |s| s.submits)
    }

    pub fn pickers_opened(&self) -> usize {
        self.page.lock().pickers_opened
    }

    pub fn is_intercepting(&self) -> bool {
        self.page.lock().intercept.is_some()
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.page.lock().focused
    }

    pub fn active_subscriptions(&self) -> usize {
        self.hub.active()
    }
}

impl Document for MemoryDocument {
    fn hostname(&self) -> Result<String> {
        Ok(self.page.lock().hostname.clone())
    }

    fn query_all(&self, scope: Scope, selector: &str) -> Result<Vec<NodeId>> {
        let parsed = Selector::parse(selector)
            .map_err(|e| CasterError::Script(format!("invalid selector {selector:?}: {e:?}")))?;
        let page = self.page.lock();
        let Some(root) = page.scope_root(scope)? else {
            return Ok(Vec::new());
        };
        Ok(page
            .descendants(root)
            .filter(|(_, el)| parsed.matches(el))
            .map(|(id, _)| id)
            .collect())
    }

    fn shadow_hosts(&self, scope: Scope) -> Result<Vec<NodeId>> {
        let page = self.page.lock();
        let Some(root) = page.scope_root(scope)? else {
            return Ok(Vec::new());
        };
        Ok(page
            .descendants(root)
            .map(|(id, _)| id)
            .filter(|id| page.slots[id.0 as usize].shadow_root.is_some())
            .collect())
    }

    fn body(&self) -> Result<Option<NodeId>> {
        Ok(Some(self.page.lock().body))
    }

    fn tag_name(&self, node: NodeId) -> Result<String> {
        let page = self.page.lock();
        Ok(match page.node(node)?.value() {
            Node::Element(el) => el.name().to_string(),
            _ => SHADOW_ROOT_TAG.to_string(),
        })
    }

    fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>> {
        let page = self.page.lock();
        let el = page.element(node)?;
        Ok(el.value().attr(name).map(str::to_string))
    }

    fn text_content(&self, node: NodeId) -> Result<String> {
        let page = self.page.lock();
        Ok(page
            .node(node)?
            .descendants()
            .filter_map(|n| n.value().as_text())
            .map(|t| &**t)
            .collect())
    }

    fn document_positions(&self, nodes: &[NodeId]) -> Result<Vec<Option<usize>>> {
        let positions = self.page.lock().positions();
        Ok(nodes.iter().map(|id| positions.get(id).copied()).collect())
    }

    fn set_value(&self, node: NodeId, value: &str) -> Result<()> {
        self.page.lock().slot_mut(node)?.value = value.to_string();
        Ok(())
    }

    fn set_text(&self, node: NodeId, text: &str) -> Result<()> {
        self.page.lock().replace_text(node, text)?;
        self.hub.notify();
        Ok(())
    }

    fn focus(&self, node: NodeId) -> Result<()> {
        let mut page = self.page.lock();
        page.slot(node)?;
        page.focused = Some(node);
        Ok(())
    }

    fn replace_with_editing_command(&self, node: NodeId, text: &str) -> Result<bool> {
        {
            let mut page = self.page.lock();
            if !page.editing_command_enabled || page.focused != Some(node) {
                return Ok(false);
            }
            page.replace_text(node, text)?;
            let slot = page.slot_mut(node)?;
            slot.events.push("beforeinput".to_string());
            slot.events.push("input".to_string());
        }
        self.hub.notify();
        Ok(true)
    }

    fn click(&self, node: NodeId) -> Result<()> {
        let mutated = self.page.lock().click(node)?;
        if mutated {
            self.hub.notify();
        }
        Ok(())
    }

    fn request_submit(&self, node: NodeId) -> Result<bool> {
        let mut page = self.page.lock();
        page.slot(node)?;
        let Some(form) = page.form_of(node) else {
            return Ok(false);
        };
        let form = page.slot_mut(form)?;
        form.submits += 1;
        form.events.push("submit".to_string());
        Ok(true)
    }

    fn dispatch(&self, node: NodeId, event: DomEvent<'_>) -> Result<DispatchOutcome> {
        let mut page = self.page.lock();
        let target = page.slot_mut(node)?;
        target.events.push(event.name().to_string());
        let default_prevented = match event {
            DomEvent::Paste(files) => target.handles_paste && !files.is_empty(),
            _ => false,
        };
        Ok(DispatchOutcome { default_prevented })
    }

    /// Detached upload inputs accept files too, as a page-created input the
    /// site never inserts does.
    fn assign_files(&self, node: NodeId, files: &[Attachment]) -> Result<()> {
        let mut page = self.page.lock();
        if !page.is_file_input(node) {
            return Err(CasterError::Script(format!("node {} is not an upload input", node.0)));
        }
        page.slot_mut(node)?.files = files.iter().map(|f| f.name.clone()).collect();
        Ok(())
    }

    fn install_picker_intercept(&self) -> Result<()> {
        self.page.lock().intercept = Some(None);
        Ok(())
    }

    fn take_intercepted(&self) -> Result<Option<NodeId>> {
        Ok(self
            .page
            .lock()
            .intercept
            .as_mut()
            .and_then(Option::take))
    }

    fn uninstall_picker_intercept(&self) -> Result<()> {
        self.page.lock().intercept = None;
        Ok(())
    }

    fn mutations(&self) -> MutationSubscription {
        self.hub.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_skip_detached_and_shadow_content() {
        let doc = MemoryDocument::new("example.com");
        let body = doc.body_id();
        let host = doc.append(body, El::new("div"));
        let shadow = doc.attach_shadow(host);
        doc.append(shadow, El::new("input").attr("type", "file"));
        doc.create_detached(El::new("input").attr("type", "file"));

        assert!(doc.query_all(Scope::Document, "input").unwrap().is_empty());
        assert_eq!(doc.query_all(Scope::Shadow(host), "input").unwrap().len(), 1);
        assert_eq!(doc.shadow_hosts(Scope::Document).unwrap(), vec![host]);
    }

    #[test]
    fn selectors_cover_attribute_operators_and_combinators() {
        let doc = MemoryDocument::new("example.com");
        let body = doc.body_id();
        let form = doc.append(body, El::new("form").attr("class", "composer wide"));
        let send = doc.append(form, El::new("button").attr("aria-label", "Send Message"));
        let upload = doc.append(body, El::new("button").attr("aria-label", "Upload files"));

        let q = |s: &str| doc.query_all(Scope::Document, s).unwrap();
        assert_eq!(q("form.composer > button"), vec![send]);
        assert_eq!(q("button[aria-label*='send' i]"), vec![send]);
        assert_eq!(q("button[aria-label^=\"Upload\"]"), vec![upload]);
        assert_eq!(q("button:not([aria-label*='Send'])"), vec![upload]);
        assert_eq!(q("form button, body > button"), vec![send, upload]);
        assert!(doc.query_all(Scope::Document, "button[").is_err());
    }

    #[test]
    fn attribute_edits_are_visible_to_queries() {
        let doc = MemoryDocument::new("example.com");
        let msg = doc.append(doc.body_id(), El::new("div").attr("data-is-streaming", "true").text("Hi"));
        assert_eq!(doc.query_all(Scope::Document, "[data-is-streaming='true']").unwrap(), vec![msg]);

        doc.set_attr(msg, "data-is-streaming", "false");
        assert!(doc.query_all(Scope::Document, "[data-is-streaming='true']").unwrap().is_empty());
        doc.remove_attr(msg, "data-is-streaming");
        assert!(doc.query_all(Scope::Document, "[data-is-streaming]").unwrap().is_empty());
        assert_eq!(doc.text_content(msg).unwrap(), "Hi");
    }

    #[test]
    fn click_effects_reveal_and_forward() {
        let doc = MemoryDocument::new("example.com");
        let body = doc.body_id();
        let button = doc.append(body, El::new("button"));
        let input = doc.create_detached(El::new("input").attr("type", "file"));
        doc.on_click(button, ClickEffect::Attach { parent: body, node: input });
        doc.on_click(button, ClickEffect::Click(input));

        doc.click(button).unwrap();
        assert_eq!(doc.query_all(Scope::Document, "input").unwrap(), vec![input]);
        assert_eq!(doc.pickers_opened(), 1);
    }

    #[test]
    fn detached_upload_input_accepts_files() {
        let doc = MemoryDocument::new("example.com");
        let input = doc.create_detached(El::new("input").attr("type", "file"));
        let file = Attachment::new("a.pdf", "application/pdf", vec![1], 1);

        doc.assign_files(input, std::slice::from_ref(&file)).unwrap();
        assert_eq!(doc.files_of(input), vec!["a.pdf"]);

        let div = doc.append(doc.body_id(), El::new("div"));
        assert!(doc.assign_files(div, &[file]).is_err());
    }

    #[test]
    fn text_content_concatenates_descendants() {
        let doc = MemoryDocument::new("example.com");
        let body = doc.body_id();
        let outer = doc.append(body, El::new("div").text("Hello, "));
        doc.append(outer, El::new("span").text("world & <friends>"));
        assert_eq!(doc.text_content(outer).unwrap(), "Hello, world & <friends>");

        doc.write_text(outer, "Bye, ");
        assert_eq!(doc.text_content(outer).unwrap(), "Bye, world & <friends>");
        doc.set_text(outer, "gone").unwrap();
        assert_eq!(doc.text_content(outer).unwrap(), "gone");
    }

    #[test]
    fn positions_follow_the_composed_tree() {
        let doc = MemoryDocument::new("example.com");
        let body = doc.body_id();
        let host = doc.append(body, El::new("div"));
        let after = doc.append(body, El::new("p"));
        let shadow = doc.attach_shadow(host);
        let inside = doc.append(shadow, El::new("span"));
        let detached = doc.create_detached(El::new("span"));

        let positions = doc.document_positions(&[after, inside, host, detached]).unwrap();
        let (after, inside, host) = (positions[0].unwrap(), positions[1].unwrap(), positions[2].unwrap());
        assert!(host < inside && inside < after);
        assert_eq!(positions[3], None);
    }

    #[test]
    fn dropping_a_subscription_detaches_it() {
        let doc = MemoryDocument::new("example.com");
        let sub = doc.mutations();
        assert_eq!(doc.active_subscriptions(), 1);
        drop(sub);
        assert_eq!(doc.active_subscriptions(), 0);
    }
}
