//! [`Document`] backed by a live Chrome tab.
//!
//! Every call evaluates a small script in the page's main world, so file
//! assignment and synthetic events carry the same trust as the site's own
//! scripts. Elements are tracked in a page-side registry (`window.__promptcaster`)
//! and addressed by their index there. Elements stay addressable after they
//! leave the page (a site's own detached upload input, for one); a navigation
//! clears the registry and handles from before it surface as
//! [`CasterError::StaleNode`].

use headless_chrome::Tab;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use url::Url;

use super::{DispatchOutcome, DomEvent, Document, MutationHub, MutationSubscription, NodeId, Scope};
use crate::attachment::{Attachment, encode_all};
use crate::error::{CasterError, Result};

const MUTATION_BINDING: &str = "__promptcasterMutation";

/// Installs the registry once per document. Idempotent.
const BOOTSTRAP_JS: &str = r#"
if (!window.__promptcaster) {
  const nodes = [];
  const ids = new WeakMap();
  const pc = {
    id(el) {
      if (!el) return null;
      let id = ids.get(el);
      if (id === undefined) {
        id = nodes.length;
        nodes.push(el);
        ids.set(el, id);
      }
      return id;
    },
    find(id) {
      return nodes[id] || null;
    },
    node(id) {
      const el = nodes[id];
      if (!el) throw new Error('stale:' + id);
      return el;
    },
    scope(s) {
      if (s.kind === 'document') return document;
      const host = pc.node(s.node);
      return s.kind === 'shadow' ? host.shadowRoot : host;
    },
    transfer(files) {
      const dt = new DataTransfer();
      for (const f of files) {
        const bin = atob(f.data);
        const bytes = new Uint8Array(bin.length);
        for (let i = 0; i < bin.length; i++) bytes[i] = bin.charCodeAt(i);
        dt.items.add(new File([bytes], f.name, { type: f.type, lastModified: f.lastModified }));
      }
      return dt;
    },
    intercepted: null,
    originalClick: null,
  };
  window.__promptcaster = pc;
  if (typeof window.__promptcasterMutation === 'function') {
    let queued = false;
    new MutationObserver(() => {
      if (queued) return;
      queued = true;
      setTimeout(() => { queued = false; window.__promptcasterMutation(''); }, 25);
    }).observe(document, { childList: true, subtree: true, characterData: true });
  }
}
"#;

pub struct ChromeDocument {
    tab: Arc<Tab>,
    hub: MutationHub,
}

impl ChromeDocument {
    /// Wrap a tab and start forwarding its DOM mutations.
    pub fn attach(tab: Arc<Tab>) -> Result<Self> {
        let hub = MutationHub::default();
        let notify = hub.clone();
        tab.expose_function(
            MUTATION_BINDING,
            Arc::new(move |_: Value| notify.notify()),
        )?;
        let doc = Self { tab, hub };
        doc.eval_raw("return true;")?;
        Ok(doc)
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    fn eval_raw(&self, body: &str) -> Result<Value> {
        let script = format!(
            "{BOOTSTRAP_JS}\n(() => {{ const pc = window.__promptcaster; {body} }})()"
        );
        let tab = self.tab.clone();
        let result = tokio::task::block_in_place(move || tab.evaluate(&script, false));
        match result {
            Ok(remote) => Ok(remote.value.unwrap_or(Value::Null)),
            Err(e) => {
                let message = e.to_string();
                match message
                    .split("stale:")
                    .nth(1)
                    .and_then(|rest| rest.split(|c: char| !c.is_ascii_digit()).next())
                    .and_then(|id| id.parse().ok())
                {
                    Some(id) => Err(CasterError::StaleNode(id)),
                    None => Err(CasterError::Browser(e)),
                }
            }
        }
    }

    fn eval<T: DeserializeOwned>(&self, body: &str) -> Result<T> {
        let value = self.eval_raw(body)?;
        serde_json::from_value(value)
            .map_err(|e| CasterError::Script(format!("unexpected script result: {e}")))
    }
}

fn scope_json(scope: Scope) -> String {
    match scope {
        Scope::Document => json!({ "kind": "document" }),
        Scope::Subtree(node) => json!({ "kind": "subtree", "node": node.0 }),
        Scope::Shadow(node) => json!({ "kind": "shadow", "node": node.0 }),
    }
    .to_string()
}

fn lit(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

impl Document for ChromeDocument {
    fn hostname(&self) -> Result<String> {
        let url = self.tab.get_url();
        Ok(Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default())
    }

    fn query_all(&self, scope: Scope, selector: &str) -> Result<Vec<NodeId>> {
        let ids: Vec<u64> = self.eval(&format!(
            "const root = pc.scope({}); if (!root) return [];
             return Array.from(root.querySelectorAll({})).map(el => pc.id(el));",
            scope_json(scope),
            lit(selector)
        ))?;
        Ok(ids.into_iter().map(NodeId).collect())
    }

    fn shadow_hosts(&self, scope: Scope) -> Result<Vec<NodeId>> {
        let ids: Vec<u64> = self.eval(&format!(
            "const root = pc.scope({}); if (!root) return [];
             return Array.from(root.querySelectorAll('*')).filter(el => el.shadowRoot).map(el => pc.id(el));",
            scope_json(scope)
        ))?;
        Ok(ids.into_iter().map(NodeId).collect())
    }

    fn body(&self) -> Result<Option<NodeId>> {
        let id: Option<u64> = self.eval("return pc.id(document.body);")?;
        Ok(id.map(NodeId))
    }

    fn tag_name(&self, node: NodeId) -> Result<String> {
        self.eval(&format!("return pc.node({}).tagName.toLowerCase();", node.0))
    }

    fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>> {
        self.eval(&format!(
            "return pc.node({}).getAttribute({});",
            node.0,
            lit(name)
        ))
    }

    fn text_content(&self, node: NodeId) -> Result<String> {
        self.eval(&format!("return pc.node({}).textContent || '';", node.0))
    }

    fn document_positions(&self, nodes: &[NodeId]) -> Result<Vec<Option<usize>>> {
        let ids: Vec<u64> = nodes.iter().map(|n| n.0).collect();
        self.eval(&format!(
            "const ids = {};
             const live = [];
             ids.forEach((id, i) => {{
               const el = pc.find(id);
               if (el && el.isConnected) live.push([i, el]);
             }});
             live.sort(([, a], [, b]) => a === b ? 0
               : (a.compareDocumentPosition(b) & Node.DOCUMENT_POSITION_FOLLOWING) ? -1 : 1);
             const out = ids.map(() => null);
             live.forEach(([i], rank) => {{ out[i] = rank; }});
             return out;",
            json!(ids)
        ))
    }

    fn is_disabled(&self, node: NodeId) -> Result<bool> {
        self.eval(&format!(
            "const el = pc.node({}); return el.hasAttribute('disabled') || el.disabled === true;",
            node.0
        ))
    }

    fn set_value(&self, node: NodeId, value: &str) -> Result<()> {
        // Go through the prototype setter so framework-tracked inputs see the change.
        self.eval::<Value>(&format!(
            "const el = pc.node({});
             const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
             const setter = Object.getOwnPropertyDescriptor(proto, 'value');
             if (setter && setter.set) setter.set.call(el, {v}); else el.value = {v};
             return null;",
            node.0,
            v = lit(value)
        ))?;
        Ok(())
    }

    fn set_text(&self, node: NodeId, text: &str) -> Result<()> {
        self.eval::<Value>(&format!(
            "pc.node({}).innerText = {}; return null;",
            node.0,
            lit(text)
        ))?;
        Ok(())
    }

    fn focus(&self, node: NodeId) -> Result<()> {
        self.eval::<Value>(&format!("pc.node({}).focus(); return null;", node.0))?;
        Ok(())
    }

    fn replace_with_editing_command(&self, node: NodeId, text: &str) -> Result<bool> {
        self.eval(&format!(
            "const el = pc.node({});
             el.focus();
             const selection = window.getSelection();
             const range = document.createRange();
             range.selectNodeContents(el);
             selection.removeAllRanges();
             selection.addRange(range);
             return document.execCommand('insertText', false, {});",
            node.0,
            lit(text)
        ))
    }

    fn click(&self, node: NodeId) -> Result<()> {
        self.eval::<Value>(&format!("pc.node({}).click(); return null;", node.0))?;
        Ok(())
    }

    fn request_submit(&self, node: NodeId) -> Result<bool> {
        self.eval(&format!(
            "const el = pc.node({});
             const form = el.form || el.closest('form');
             if (!form) return false;
             if (typeof form.requestSubmit === 'function') form.requestSubmit(el.type === 'submit' ? el : undefined);
             else form.submit();
             return true;",
            node.0
        ))
    }

    fn dispatch(&self, node: NodeId, event: DomEvent<'_>) -> Result<DispatchOutcome> {
        let files = serde_json::to_string(&encode_all(event.files()))?;
        let construct = match event {
            DomEvent::Input | DomEvent::Change => {
                format!("new Event({}, {{ bubbles: true }})", lit(event.name()))
            }
            DomEvent::Paste(_) => "new ClipboardEvent('paste', { bubbles: true, cancelable: true, clipboardData: pc.transfer(files) })".to_string(),
            DomEvent::DragEnter(_) | DomEvent::DragOver(_) | DomEvent::Drop(_) => format!(
                "new DragEvent({}, {{ bubbles: true, cancelable: true, dataTransfer: pc.transfer(files) }})",
                lit(event.name())
            ),
        };
        self.eval(&format!(
            "const files = {files};
             const event = {construct};
             pc.node({}).dispatchEvent(event);
             return {{ defaultPrevented: event.defaultPrevented }};",
            node.0
        ))
    }

    fn assign_files(&self, node: NodeId, files: &[Attachment]) -> Result<()> {
        let files = serde_json::to_string(&encode_all(files))?;
        let assigned: usize = self.eval(&format!(
            "const el = pc.node({});
             el.files = pc.transfer({files}).files;
             return el.files ? el.files.length : 0;",
            node.0
        ))?;
        tracing::debug!(node = node.0, assigned, "files assigned to upload input");
        Ok(())
    }

    fn install_picker_intercept(&self) -> Result<()> {
        self.eval::<Value>(
            "if (pc.originalClick) return null;
             pc.intercepted = null;
             pc.originalClick = HTMLInputElement.prototype.click;
             const original = pc.originalClick;
             HTMLInputElement.prototype.click = function () {
               if (this.type === 'file' && pc.intercepted === null) {
                 pc.intercepted = pc.id(this);
                 return;
               }
               return original.call(this);
             };
             return null;",
        )?;
        Ok(())
    }

    fn take_intercepted(&self) -> Result<Option<NodeId>> {
        let id: Option<u64> =
            self.eval("const id = pc.intercepted; pc.intercepted = null; return id;")?;
        Ok(id.map(NodeId))
    }

    fn uninstall_picker_intercept(&self) -> Result<()> {
        self.eval::<Value>(
            "if (pc.originalClick) {
               HTMLInputElement.prototype.click = pc.originalClick;
               pc.originalClick = null;
             }
             pc.intercepted = null;
             return null;",
        )?;
        Ok(())
    }

    fn mutations(&self) -> MutationSubscription {
        self.hub.subscribe()
    }
}
