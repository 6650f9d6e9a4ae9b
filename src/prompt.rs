//! Typing a prompt into a site and sending it.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::adapters::SiteAdapter;
use crate::dom::{Document, DomEvent, NodeId};
use crate::error::Result;
use crate::query::{AWAIT_DEFAULT, await_element};

/// How an input surface takes text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditingModel {
    /// `<textarea>` or `<input>`: set `value`, then fire `input`.
    PlainValue,
    /// A `contenteditable` editor: replace through an editing command so the
    /// editor's own model stays in sync.
    StructuredEditable,
    /// Anything else: overwrite the rendered text.
    PlainText,
}

impl EditingModel {
    pub fn detect(doc: &dyn Document, node: NodeId) -> Result<Self> {
        let tag = doc.tag_name(node)?;
        if tag == "textarea" || tag == "input" {
            return Ok(Self::PlainValue);
        }
        if doc.attribute(node, "contenteditable")?.as_deref() == Some("true") {
            return Ok(Self::StructuredEditable);
        }
        Ok(Self::PlainText)
    }
}

#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub input_timeout: Duration,
    pub send_timeout: Duration,
    /// Pause between typing and looking at the send control, so the site's
    /// own state can enable it.
    pub settle: Duration,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            input_timeout: AWAIT_DEFAULT,
            send_timeout: AWAIT_DEFAULT,
            settle: Duration::from_millis(100),
        }
    }
}

/// Type `text` into the site's input surface and activate its send control.
///
/// Returns true once the text has been delivered, even if no usable send
/// control turned up ("typed but not sent"). Returns false without touching
/// the page when there is no adapter, and false if the input never appears.
pub async fn inject_prompt(
    doc: &dyn Document,
    adapter: Option<&SiteAdapter>,
    text: &str,
    config: &PromptConfig,
) -> bool {
    let Some(adapter) = adapter.filter(|a| a.is_participating()) else {
        debug!("no participating adapter, prompt ignored");
        return false;
    };

    let Some(input) =
        await_element(doc, adapter.queries.input_surface, config.input_timeout).await
    else {
        error!(site = adapter.id, "input element not found");
        return false;
    };

    if let Err(e) = type_into(doc, input, text) {
        error!(site = adapter.id, "failed to type prompt: {e}");
        return false;
    }

    tokio::time::sleep(config.settle).await;

    match await_element(doc, adapter.queries.send_control, config.send_timeout).await {
        Some(send) => {
            if let Err(e) = activate_send(doc, send) {
                warn!(site = adapter.id, "send control activation failed: {e}");
            }
        }
        None => warn!(site = adapter.id, "send control not found, prompt typed but not sent"),
    }
    true
}

fn type_into(doc: &dyn Document, input: NodeId, text: &str) -> Result<()> {
    let model = EditingModel::detect(doc, input)?;
    debug!(?model, "typing prompt");
    match model {
        EditingModel::PlainValue => {
            doc.set_value(input, text)?;
            doc.dispatch(input, DomEvent::Input)?;
        }
        EditingModel::StructuredEditable => {
            doc.focus(input)?;
            if !doc.replace_with_editing_command(input, text)? {
                // The editor refused the command; write the text and announce it.
                doc.set_text(input, text)?;
                doc.dispatch(input, DomEvent::Input)?;
            }
        }
        EditingModel::PlainText => {
            doc.set_text(input, text)?;
            doc.dispatch(input, DomEvent::Input)?;
        }
    }
    Ok(())
}

/// Submit buttons inside a form go through the form; everything else is clicked.
fn activate_send(doc: &dyn Document, send: NodeId) -> Result<()> {
    if doc.is_disabled(send)? {
        info!("send control is disabled, not sending");
        return Ok(());
    }
    let is_submit = doc.tag_name(send)? == "button"
        && doc.attribute(send, "type")?.as_deref() == Some("submit");
    if is_submit && doc.request_submit(send)? {
        return Ok(());
    }
    doc.click(send)
}
