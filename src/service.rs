use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Attribute types the destination understands. Telemetry slots are all
/// doubles; the enum exists so a redeclaration with a different type can be
/// rejected instead of silently retyped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Double,
}

/// One attribute write inside an atomic edit unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrWrite {
    pub node_path: String,
    pub attr: String,
    pub value: f64,
}

impl AttrWrite {
    pub fn new(node_path: impl Into<String>, attr: impl Into<String>, value: f64) -> Self {
        AttrWrite {
            node_path: node_path.into(),
            attr: attr.into(),
            value,
        }
    }
}

/// Collision behavior when staging a document onto the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPolicy {
    Overwrite,
    ErrorIfExists,
}

/// Capability set consumed from the remote asset/document service.
///
/// Document addresses are paths relative to the service root (host plus
/// configured base path); node paths are slash-separated paths within a
/// document. The service owns all composition, transport, and collaboration
/// semantics; callers only see these operations.
///
/// Implementations: [`crate::memory::MemoryAssetService`] (in-process store,
/// default mode and test double) and [`crate::remote::HttpAssetService`].
#[async_trait]
pub trait AssetService: Send + Sync {
    /// Reachability probe against the service root.
    async fn check_connection(&self) -> Result<()>;

    /// Returns whether a document exists at `path`.
    async fn stat(&self, path: &str) -> Result<bool>;

    /// Stages a local file as the document at `dest`.
    async fn copy(&self, local: &Path, dest: &str, policy: CopyPolicy) -> Result<()>;

    /// Opens an existing document, failing if it is absent or unreadable.
    async fn open(&self, path: &str) -> Result<()>;

    /// Creates a new empty document, failing if one already exists.
    async fn create(&self, path: &str) -> Result<()>;

    /// Declares a node in `doc`, creating missing ancestors. Redeclaring an
    /// existing node is a no-op.
    async fn declare_node(&self, doc: &str, node_path: &str, display: &str) -> Result<()>;

    /// Declares a typed attribute on a node. Redeclaring with the same type
    /// is a no-op; a different type is an error.
    async fn declare_attribute(
        &self,
        doc: &str,
        node_path: &str,
        attr: &str,
        ty: ValueType,
    ) -> Result<()>;

    /// Names of the attributes currently declared on a node.
    async fn list_attributes(&self, doc: &str, node_path: &str) -> Result<Vec<String>>;

    async fn remove_attribute(&self, doc: &str, node_path: &str, attr: &str) -> Result<()>;

    /// Current value of an attribute, `None` if never written.
    async fn get_value(&self, doc: &str, node_path: &str, attr: &str) -> Result<Option<f64>>;

    async fn set_value(&self, doc: &str, node_path: &str, attr: &str, value: f64) -> Result<()>;

    /// Applies every write as one atomic unit: observers see the whole batch
    /// or none of it. Fails without applying anything if any target attribute
    /// is undeclared.
    async fn apply_edits(&self, doc: &str, edits: &[AttrWrite]) -> Result<()>;

    /// Appends `sublayer` to `doc`'s sub-document references and persists
    /// `doc`. Linking an already-referenced sublayer is a no-op.
    async fn link_sublayer(&self, doc: &str, sublayer: &str) -> Result<()>;

    /// Flushes pending live edits so other readers observe them.
    async fn propagate(&self) -> Result<()>;

    /// Best-effort teardown of the collaborator connection.
    async fn shutdown(&self) -> Result<()>;
}
