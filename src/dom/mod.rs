//! The seam between pipeline logic and a live page.
//!
//! Everything the injectors, observer and extractor do to a site goes through
//! [`Document`]. [`chrome::ChromeDocument`] drives a real tab over CDP;
//! [`memory::MemoryDocument`] is an in-process tree used by tests and dry runs.

pub mod chrome;
pub mod memory;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::attachment::Attachment;
use crate::error::Result;

/// Opaque handle to an element inside one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Where a query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The light DOM of the whole document.
    Document,
    /// Descendants of an element (light DOM only).
    Subtree(NodeId),
    /// The shadow tree attached to a host element.
    Shadow(NodeId),
}

/// Synthetic events the pipeline dispatches. File-carrying events hold the
/// attachments that make up their data transfer.
#[derive(Debug, Clone, Copy)]
pub enum DomEvent<'a> {
    Input,
    Change,
    Paste(&'a [Attachment]),
    DragEnter(&'a [Attachment]),
    DragOver(&'a [Attachment]),
    Drop(&'a [Attachment]),
}

impl DomEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            DomEvent::Input => "input",
            DomEvent::Change => "change",
            DomEvent::Paste(_) => "paste",
            DomEvent::DragEnter(_) => "dragenter",
            DomEvent::DragOver(_) => "dragover",
            DomEvent::Drop(_) => "drop",
        }
    }

    pub fn files(&self) -> &[Attachment] {
        match self {
            DomEvent::Paste(files)
            | DomEvent::DragEnter(files)
            | DomEvent::DragOver(files)
            | DomEvent::Drop(files) => files,
            DomEvent::Input | DomEvent::Change => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    /// A page handler called `preventDefault()`.
    pub default_prevented: bool,
}

/// A page the pipeline can read and drive.
///
/// Lookups that find nothing return empty results; `Err` is reserved for a
/// broken connection to the page or a stale handle.
pub trait Document: Send + Sync {
    /// Hostname of the document's current URL.
    fn hostname(&self) -> Result<String>;

    /// Elements matching a selector list in `scope`, in document order.
    fn query_all(&self, scope: Scope, selector: &str) -> Result<Vec<NodeId>>;

    /// Elements in `scope` that host an open shadow tree.
    fn shadow_hosts(&self, scope: Scope) -> Result<Vec<NodeId>>;

    fn body(&self) -> Result<Option<NodeId>>;

    /// Lowercase tag name.
    fn tag_name(&self, node: NodeId) -> Result<String>;

    fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>>;

    fn text_content(&self, node: NodeId) -> Result<String>;

    /// Document-order index of each element, or `None` for one that is no
    /// longer in the page. Indexes are only comparable within one call.
    fn document_positions(&self, nodes: &[NodeId]) -> Result<Vec<Option<usize>>>;

    fn is_disabled(&self, node: NodeId) -> Result<bool> {
        Ok(self.attribute(node, "disabled")?.is_some())
    }

    /// Set the `value` of a text field.
    fn set_value(&self, node: NodeId, value: &str) -> Result<()>;

    /// Overwrite the rendered text of an element.
    fn set_text(&self, node: NodeId, text: &str) -> Result<()>;

    fn focus(&self, node: NodeId) -> Result<()>;

    /// Select the element's contents and replace them through the editing
    /// command the page's editor listens to. Returns false if the command was refused.
    fn replace_with_editing_command(&self, node: NodeId, text: &str) -> Result<bool>;

    fn click(&self, node: NodeId) -> Result<()>;

    /// Ask the element's form to submit through it. Returns false when the
    /// element has no form.
    fn request_submit(&self, node: NodeId) -> Result<bool>;

    fn dispatch(&self, node: NodeId, event: DomEvent<'_>) -> Result<DispatchOutcome>;

    /// Replace the file list of an upload input.
    fn assign_files(&self, node: NodeId, files: &[Attachment]) -> Result<()>;

    /// Make upload-input clicks record their target instead of opening the
    /// native picker. Used only through [`PickerInterception`].
    fn install_picker_intercept(&self) -> Result<()>;

    fn take_intercepted(&self) -> Result<Option<NodeId>>;

    fn uninstall_picker_intercept(&self) -> Result<()>;

    /// Subscribe to subtree, child-list and character-data mutations.
    fn mutations(&self) -> MutationSubscription;
}

/// Fan-out of "the document changed" notifications to live subscriptions.
#[derive(Debug, Clone, Default)]
pub struct MutationHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Debug, Default)]
struct HubInner {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<()>>,
}

impl MutationHub {
    pub fn subscribe(&self) -> MutationSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        MutationSubscription {
            id,
            hub: self.clone(),
            rx,
        }
    }

    pub fn notify(&self) {
        let inner = self.inner.lock();
        for tx in inner.subscribers.values() {
            let _ = tx.send(());
        }
    }

    /// Number of subscriptions still attached.
    pub fn active(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    fn remove(&self, id: u64) {
        self.inner.lock().subscribers.remove(&id);
    }
}

/// A live mutation subscription. Dropping it disconnects it.
#[derive(Debug)]
pub struct MutationSubscription {
    id: u64,
    hub: MutationHub,
    rx: mpsc::UnboundedReceiver<()>,
}

impl MutationSubscription {
    /// Wait for the next mutation batch. Coalesces anything already queued.
    /// Returns false once the document is gone.
    pub async fn changed(&mut self) -> bool {
        if self.rx.recv().await.is_none() {
            return false;
        }
        while self.rx.try_recv().is_ok() {}
        true
    }
}

impl Drop for MutationSubscription {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}

/// Scoped replacement of the upload-input click behaviour.
///
/// Installed on creation and restored on drop, so every exit path (including
/// `?` and panics) puts the page back the way it was. Keep the window to a
/// single synchronous click.
pub struct PickerInterception<'d> {
    doc: &'d dyn Document,
}

impl<'d> PickerInterception<'d> {
    pub fn install(doc: &'d dyn Document) -> Result<Self> {
        doc.install_picker_intercept()?;
        Ok(Self { doc })
    }

    /// Restore the original behaviour and hand back the captured input, if any.
    pub fn finish(self) -> Result<Option<NodeId>> {
        self.doc.take_intercepted()
    }
}

impl Drop for PickerInterception<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.doc.uninstall_picker_intercept() {
            tracing::warn!("failed to restore upload-input click: {e}");
        }
    }
}
