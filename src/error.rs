use thiserror::Error;

pub type Result<T> = std::result::Result<T, CasterError>;

#[derive(Debug, Error)]
pub enum CasterError {
    /// Browser launch or CDP round-trip failed.
    #[error("Browser error: {0}")]
    Browser(#[from] anyhow::Error),

    /// A page-side script threw or returned something unexpected.
    #[error("Script error: {0}")]
    Script(String),

    /// The node handle no longer refers to a live element.
    #[error("Stale node: {0}")]
    StaleNode(u64),

    #[error("Attachment decode failed for {name}: {reason}")]
    Decode { name: String, reason: String },

    /// The other end of a relay channel is gone.
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Settings I/O: {0}")]
    Settings(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
