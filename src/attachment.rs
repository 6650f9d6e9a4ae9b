//! Attachments and their cross-context transport form.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CasterError, Result};

/// Transport form of an attachment. Field names match the wire shape
/// `{ name, type, size, data, lastModified }` with `data` in standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    pub data: String,
    pub last_modified: i64,
}

/// A decoded attachment, ready to be handed to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub last_modified: i64,
}

impl Attachment {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
        last_modified: i64,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
            last_modified,
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let last_modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let mime_type = guess_mime(&name).to_string();
        Ok(Self {
            name,
            mime_type,
            bytes,
            last_modified,
        })
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn encode(&self) -> AttachmentDescriptor {
        AttachmentDescriptor {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.bytes.len() as u64,
            data: STANDARD.encode(&self.bytes),
            last_modified: self.last_modified,
        }
    }
}

impl AttachmentDescriptor {
    pub fn decode(&self) -> Result<Attachment> {
        let bytes = STANDARD
            .decode(self.data.trim())
            .map_err(|e| CasterError::Decode {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        if bytes.len() as u64 != self.size {
            tracing::debug!(
                name = %self.name,
                declared = self.size,
                actual = bytes.len(),
                "attachment size differs from descriptor"
            );
        }
        Ok(Attachment {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            bytes,
            last_modified: self.last_modified,
        })
    }
}

pub fn encode_all(attachments: &[Attachment]) -> Vec<AttachmentDescriptor> {
    attachments.iter().map(Attachment::encode).collect()
}

pub fn decode_all(descriptors: &[AttachmentDescriptor]) -> Result<Vec<Attachment>> {
    descriptors.iter().map(AttachmentDescriptor::decode).collect()
}

fn guess_mime(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "rs" | "py" | "js" | "ts" | "toml" | "yaml" | "yml" => "text/plain",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
