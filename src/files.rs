//! Delivering attachments into a site's upload mechanism.
//!
//! [`inject_files`] is the page-world routine: it runs with the page's own
//! trust level (see [`crate::relay::Broker`]) and tries each strategy in turn
//! until one sticks. Every attempt is isolated: an error is logged and the
//! next strategy runs.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::{SiteAdapter, UploadStrategy};
use crate::attachment::{Attachment, AttachmentDescriptor, decode_all};
use crate::dom::{Document, DomEvent, NodeId, PickerInterception, Scope};
use crate::error::Result;
use crate::query::{best_upload_input, first_match};

pub const NOT_FOUND_ERROR: &str = "No file input or drop zone found";
pub const UNVERIFIED_ERROR: &str = "File upload could not be verified";

/// Buttons that usually open a site's upload control, in the order tried.
pub const ATTACH_BUTTON_SELECTORS: &[&str] = &[
    r#"button[aria-label*="upload" i]"#,
    r#"button[aria-label*="attach" i]"#,
    r#"button[aria-label*="file" i]"#,
    r#"button[aria-label*="image" i]"#,
    r#"button[data-tooltip*="upload" i]"#,
    r#"button[data-tooltip*="file" i]"#,
    r#"[data-testid="attachment-button"]"#,
];

/// Editable surfaces that may accept pasted files, in the order tried.
pub const PASTE_TARGET_SELECTORS: &[&str] = &[
    "rich-textarea",
    ".ql-editor",
    ".ProseMirror",
    "#prompt-textarea",
    r#"[contenteditable="true"]"#,
];

/// Surfaces that may accept dropped files, in the order tried.
pub const DROP_ZONE_SELECTORS: &[&str] = &[
    "rich-textarea",
    ".ql-editor",
    r#"div[contenteditable="true"][role="textbox"]"#,
    ".ProseMirror",
    "#prompt-textarea",
    r#"[contenteditable="true"]"#,
    "textarea",
];

/// The strategy that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InjectionMethod {
    FileInput,
    MenuDriven,
    MenuDrivenFallback,
    InterceptedFileInput,
    FileInputAfterClick,
    PasteEvent,
    DropEventUnverified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInjectionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<InjectionMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileInjectionOutcome {
    pub fn succeeded(method: InjectionMethod) -> Self {
        Self {
            success: true,
            method: Some(method),
            selector: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            method: None,
            selector: None,
            error: Some(error.into()),
        }
    }

    fn with_selector(mut self, selector: &str) -> Self {
        self.selector = Some(selector.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct FileInjectionConfig {
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub menu_poll_timeout: Duration,
    pub menu_open_delay: Duration,
    pub menu_dismiss_delay: Duration,
    /// Time the page gets to handle a paste before we look at `defaultPrevented`.
    pub paste_settle: Duration,
}

impl Default for FileInjectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            poll_timeout: Duration::from_millis(3000),
            menu_poll_timeout: Duration::from_millis(2000),
            menu_open_delay: Duration::from_millis(300),
            menu_dismiss_delay: Duration::from_millis(100),
            paste_settle: Duration::from_millis(500),
        }
    }
}

type Attempt = Result<Option<FileInjectionOutcome>>;

/// Run the strategies in order until one delivers the files.
pub async fn inject_files(
    doc: &dyn Document,
    adapter: Option<&SiteAdapter>,
    descriptors: &[AttachmentDescriptor],
    config: &FileInjectionConfig,
) -> FileInjectionOutcome {
    let files = match decode_all(descriptors) {
        Ok(files) => files,
        Err(e) => {
            warn!("attachment decode failed: {e}");
            return FileInjectionOutcome::failed(e.to_string());
        }
    };
    let site = adapter.map(|a| a.id).unwrap_or("unknown");
    info!(site, count = files.len(), "injecting files");

    if let Some(outcome) = settle("upload input", direct_input(doc, &files)) {
        return outcome;
    }

    if let Some(SiteAdapter {
        upload: UploadStrategy::MenuDriven { menu_button, menu_group },
        ..
    }) = adapter
    {
        match first_match(doc, menu_button) {
            Some(button) => {
                let attempt = upload_menu(doc, &files, button, menu_group, config).await;
                if let Some(outcome) = settle("upload menu", attempt) {
                    return outcome;
                }
                dismiss_menu(doc, config).await;
            }
            None => debug!(site, "no upload menu button"),
        }
    }

    let attempt = attach_button(doc, &files, config).await;
    if let Some(outcome) = settle("attach button", attempt) {
        return outcome;
    }

    let attempt = paste(doc, &files, config).await;
    if let Some(outcome) = settle("paste", attempt) {
        return outcome;
    }

    if let Some(outcome) = settle("drop", drop_files(doc, &files)) {
        return outcome;
    }

    warn!(site, "no upload mechanism found");
    FileInjectionOutcome::failed(NOT_FOUND_ERROR)
}

fn settle(strategy: &str, attempt: Attempt) -> Option<FileInjectionOutcome> {
    match attempt {
        Ok(Some(outcome)) => {
            info!(strategy, method = ?outcome.method, success = outcome.success, "file injection finished");
            Some(outcome)
        }
        Ok(None) => {
            debug!(strategy, "strategy did not apply");
            None
        }
        Err(e) => {
            warn!(strategy, "strategy failed: {e}");
            None
        }
    }
}

fn deliver(doc: &dyn Document, input: NodeId, files: &[Attachment], notify_input: bool) -> Result<()> {
    doc.assign_files(input, files)?;
    if notify_input {
        doc.dispatch(input, DomEvent::Input)?;
    }
    doc.dispatch(input, DomEvent::Change)?;
    Ok(())
}

fn direct_input(doc: &dyn Document, files: &[Attachment]) -> Attempt {
    let Some(input) = best_upload_input(doc, files) else {
        return Ok(None);
    };
    deliver(doc, input, files, true)?;
    Ok(Some(FileInjectionOutcome::succeeded(InjectionMethod::FileInput)))
}

async fn upload_menu(
    doc: &dyn Document,
    files: &[Attachment],
    button: NodeId,
    menu_group: &str,
    config: &FileInjectionConfig,
) -> Attempt {
    debug!("opening upload menu");
    doc.click(button)?;
    tokio::time::sleep(config.menu_open_delay).await;

    let Some(group) = first_match(doc, menu_group) else {
        return Ok(None);
    };
    let Some(entry) = doc.query_all(Scope::Subtree(group), "button")?.into_iter().next() else {
        return Ok(None);
    };

    let captured = click_intercepted(doc, entry)?;
    if let Some(input) = captured {
        deliver(doc, input, files, false)?;
        return Ok(Some(FileInjectionOutcome::succeeded(InjectionMethod::MenuDriven)));
    }

    if let Some(input) = poll_upload_input(doc, files, config.menu_poll_timeout, config).await {
        deliver(doc, input, files, false)?;
        return Ok(Some(FileInjectionOutcome::succeeded(InjectionMethod::MenuDrivenFallback)));
    }
    Ok(None)
}

async fn dismiss_menu(doc: &dyn Document, config: &FileInjectionConfig) {
    debug!("upload menu did not yield an input, dismissing it");
    match doc.body() {
        Ok(Some(body)) => {
            if let Err(e) = doc.click(body) {
                warn!("failed to dismiss upload menu: {e}");
            }
        }
        Ok(None) => {}
        Err(e) => warn!("failed to dismiss upload menu: {e}"),
    }
    tokio::time::sleep(config.menu_dismiss_delay).await;
}

async fn attach_button(doc: &dyn Document, files: &[Attachment], config: &FileInjectionConfig) -> Attempt {
    let button = ATTACH_BUTTON_SELECTORS
        .iter()
        .find_map(|selector| first_match(doc, selector).map(|node| (*selector, node)));

    let captured = match button {
        Some((selector, node)) => {
            debug!(selector, "clicking attach button");
            click_intercepted(doc, node)?
        }
        None => {
            debug!("no attach button found");
            None
        }
    };

    if let Some(input) = captured {
        deliver(doc, input, files, true)?;
        return Ok(Some(FileInjectionOutcome::succeeded(InjectionMethod::InterceptedFileInput)));
    }

    if let Some(input) = poll_upload_input(doc, files, config.poll_timeout, config).await {
        deliver(doc, input, files, true)?;
        return Ok(Some(FileInjectionOutcome::succeeded(InjectionMethod::FileInputAfterClick)));
    }
    Ok(None)
}

/// Click `node` with upload-input clicks captured instead of opening the
/// native picker. The capture is removed before this returns, on every path.
fn click_intercepted(doc: &dyn Document, node: NodeId) -> Result<Option<NodeId>> {
    let interception = PickerInterception::install(doc)?;
    doc.click(node)?;
    interception.finish()
}

async fn poll_upload_input(
    doc: &dyn Document,
    files: &[Attachment],
    timeout: Duration,
    config: &FileInjectionConfig,
) -> Option<NodeId> {
    let started = tokio::time::Instant::now();
    loop {
        if let Some(input) = best_upload_input(doc, files) {
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "upload input appeared");
            return Some(input);
        }
        if started.elapsed() >= timeout {
            debug!(timeout_ms = timeout.as_millis() as u64, "no upload input appeared");
            return None;
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}

async fn paste(doc: &dyn Document, files: &[Attachment], config: &FileInjectionConfig) -> Attempt {
    for selector in PASTE_TARGET_SELECTORS {
        let Some(target) = first_match(doc, selector) else {
            continue;
        };
        doc.focus(target)?;
        let outcome = doc.dispatch(target, DomEvent::Paste(files))?;
        debug!(selector, "paste dispatched");
        tokio::time::sleep(config.paste_settle).await;
        // An unhandled paste says nothing about whether the files landed.
        if outcome.default_prevented {
            return Ok(Some(
                FileInjectionOutcome::succeeded(InjectionMethod::PasteEvent).with_selector(selector),
            ));
        }
    }
    Ok(None)
}

fn drop_files(doc: &dyn Document, files: &[Attachment]) -> Attempt {
    let Some((selector, zone)) = DROP_ZONE_SELECTORS
        .iter()
        .find_map(|selector| first_match(doc, selector).map(|node| (*selector, node)))
    else {
        return Ok(None);
    };
    doc.dispatch(zone, DomEvent::DragEnter(files))?;
    doc.dispatch(zone, DomEvent::DragOver(files))?;
    doc.dispatch(zone, DomEvent::Drop(files))?;
    debug!(selector, "drop dispatched, acceptance cannot be observed");
    Ok(Some(FileInjectionOutcome {
        success: false,
        method: Some(InjectionMethod::DropEventUnverified),
        selector: Some(selector.to_string()),
        error: Some(UNVERIFIED_ERROR.to_string()),
    }))
}
