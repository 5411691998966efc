use crate::errors::Result;
use crate::types::HarnessConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[cfg(feature = "chrome")]
pub mod chrome;

/// Addresses one document within a page: the chain of frame indices leading
/// to it from the root. Empty for the root page itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DocumentId(pub Vec<usize>);

impl DocumentId {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "page")
        } else {
            let path = self
                .0
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(".");
            write!(f, "frame[{}]", path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub url: Option<String>,
    pub reachable: bool,
}

/// A re-addressable reference to a resolved node. Handles are cheap tokens,
/// not live engine objects; they stay valid only until the next navigation
/// and are re-resolved rather than cached across steps.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHandle {
    pub document: DocumentId,
    pub path: String,
    pub ordinal: usize,
}

/// The capability contract the harness consumes from a browser-automation
/// engine. Everything above this trait is engine-agnostic; adapters live
/// below it.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// All navigable documents: the root page first, then embedded documents
    /// in depth-first source order at the time of the call. Callers must
    /// re-query after a navigation instead of caching the enumeration.
    async fn documents(&self) -> Result<Vec<DocumentInfo>>;

    /// Wait until `document` reaches its load milestone. `Ok(false)` means
    /// the milestone was not reached within `timeout`.
    async fn await_ready(&self, document: &DocumentId, timeout: Duration) -> Result<bool>;

    /// Resolve a structural path within `document`. `Ok(None)` means zero
    /// matches; the ordinal selects the Nth match in document order.
    async fn resolve(
        &self,
        document: &DocumentId,
        path: &str,
        ordinal: usize,
    ) -> Result<Option<NodeHandle>>;

    async fn fill(&self, handle: &NodeHandle, text: &str) -> Result<()>;

    /// Click once the node is actionable, waiting at most `timeout`.
    async fn click(&self, handle: &NodeHandle, timeout: Duration) -> Result<()>;

    /// Single probe: is the first node whose text contains `text` visible?
    async fn text_visible(&self, document: &DocumentId, text: &str) -> Result<bool>;

    async fn node_visible(&self, handle: &NodeHandle) -> Result<bool>;

    /// PNG screenshot of the current page, for failure diagnostics.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn close(&self) -> Result<()>;
}

/// Owns process launch, separate from the per-session operations above.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    type Engine: Engine + 'static;

    async fn launch(&self, config: &HarnessConfig) -> Result<Self::Engine>;
}
