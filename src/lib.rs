//! Broadcast one prompt to several web chat assistants and collect their answers.
//!
//! Each assistant runs in its own browser tab. The pipeline drives those pages
//! through the [`dom::Document`] seam: prompts and attachments go in through the
//! injectors, streaming answers come back through the response observer, and the
//! relay carries commands and observations between the orchestrator and each tab.

pub mod adapters;
pub mod attachment;
pub mod conversation;
pub mod dom;
pub mod error;
pub mod files;
pub mod judge;
pub mod logging;
pub mod observer;
pub mod prompt;
pub mod query;
pub mod relay;
pub mod settings;

pub use adapters::{SiteAdapter, resolve_adapter};
pub use attachment::{Attachment, AttachmentDescriptor};
pub use error::{CasterError, Result};
pub use observer::ResponseObservation;
pub use relay::{Orchestrator, RelayMessage, RelayReply};
pub use settings::Settings;
