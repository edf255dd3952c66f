use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::diagnostics::{DiagnosticSink, Severity};
use crate::service::{AssetService, AttrWrite, CopyPolicy, ValueType};

/// In-process document store honoring the full [`AssetService`] contract.
///
/// This is the default mode and the test double: runs exercise the whole
/// initialize-then-replay path without a reachable asset server, the same way
/// the collaborator is stood in for elsewhere when the real peer is absent.
pub struct MemoryAssetService {
    sink: DiagnosticSink,
    store: Mutex<Store>,
}

#[derive(Default)]
struct Store {
    documents: BTreeMap<String, Document>,
    propagations: u64,
}

#[derive(Default)]
struct Document {
    content_digest: Option<String>,
    sublayers: Vec<String>,
    nodes: BTreeMap<String, Node>,
    // Applied atomic units, in order. Retained so tests can assert batch
    // boundaries, not just final values.
    batches: Vec<Vec<AttrWrite>>,
}

struct Node {
    #[allow(dead_code)]
    display: String,
    attrs: BTreeMap<String, Attribute>,
}

struct Attribute {
    ty: ValueType,
    value: Option<f64>,
}

impl MemoryAssetService {
    pub fn new(sink: DiagnosticSink) -> Self {
        MemoryAssetService {
            sink,
            store: Mutex::new(Store::default()),
        }
    }

    /// Atomic units applied to a document so far, oldest first.
    pub async fn applied_batches(&self, doc: &str) -> Vec<Vec<AttrWrite>> {
        let store = self.store.lock().await;
        store
            .documents
            .get(doc)
            .map(|d| d.batches.clone())
            .unwrap_or_default()
    }

    pub async fn propagation_count(&self) -> u64 {
        self.store.lock().await.propagations
    }

    pub async fn sublayers_of(&self, doc: &str) -> Vec<String> {
        let store = self.store.lock().await;
        store
            .documents
            .get(doc)
            .map(|d| d.sublayers.clone())
            .unwrap_or_default()
    }
}

impl Store {
    fn document(&self, path: &str) -> Result<&Document> {
        self.documents
            .get(path)
            .ok_or_else(|| anyhow!("no document at {path}"))
    }

    fn document_mut(&mut self, path: &str) -> Result<&mut Document> {
        self.documents
            .get_mut(path)
            .ok_or_else(|| anyhow!("no document at {path}"))
    }
}

impl Document {
    fn node(&self, node_path: &str) -> Result<&Node> {
        self.nodes
            .get(node_path)
            .ok_or_else(|| anyhow!("no node at {node_path}"))
    }

    fn node_mut(&mut self, node_path: &str) -> Result<&mut Node> {
        self.nodes
            .get_mut(node_path)
            .ok_or_else(|| anyhow!("no node at {node_path}"))
    }
}

#[async_trait]
impl AssetService for MemoryAssetService {
    async fn check_connection(&self) -> Result<()> {
        self.sink
            .record(Severity::Info, "memory", "in-process store is always reachable");
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<bool> {
        Ok(self.store.lock().await.documents.contains_key(path))
    }

    async fn copy(&self, local: &Path, dest: &str, policy: CopyPolicy) -> Result<()> {
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|e| anyhow!("unable to read {}: {e}", local.display()))?;
        let digest = format!("{:x}", Sha256::digest(&bytes));

        let mut store = self.store.lock().await;
        if policy == CopyPolicy::ErrorIfExists && store.documents.contains_key(dest) {
            self.sink
                .record(Severity::Error, "memory", format!("copy rejected, {dest} exists"));
            bail!("document already exists at {dest}");
        }
        let doc = store.documents.entry(dest.to_string()).or_default();
        doc.content_digest = Some(digest.clone());
        tracing::debug!("staged {} as {} (sha256 {})", local.display(), dest, digest);
        Ok(())
    }

    async fn open(&self, path: &str) -> Result<()> {
        let store = self.store.lock().await;
        store.document(path).map(|_| ())
    }

    async fn create(&self, path: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        if store.documents.contains_key(path) {
            bail!("document already exists at {path}");
        }
        store.documents.insert(path.to_string(), Document::default());
        Ok(())
    }

    async fn declare_node(&self, doc: &str, node_path: &str, display: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        let document = store.document_mut(doc)?;
        document
            .nodes
            .entry(node_path.to_string())
            .or_insert_with(|| Node {
                display: display.to_string(),
                attrs: BTreeMap::new(),
            });
        Ok(())
    }

    async fn declare_attribute(
        &self,
        doc: &str,
        node_path: &str,
        attr: &str,
        ty: ValueType,
    ) -> Result<()> {
        let mut store = self.store.lock().await;
        let node = store.document_mut(doc)?.node_mut(node_path)?;
        if let Some(existing) = node.attrs.get(attr) {
            if existing.ty != ty {
                bail!(
                    "attribute {node_path}.{attr} already declared with incompatible type {:?}",
                    existing.ty
                );
            }
            return Ok(());
        }
        node.attrs.insert(attr.to_string(), Attribute { ty, value: None });
        Ok(())
    }

    async fn list_attributes(&self, doc: &str, node_path: &str) -> Result<Vec<String>> {
        let store = self.store.lock().await;
        let node = store.document(doc)?.node(node_path)?;
        Ok(node.attrs.keys().cloned().collect())
    }

    async fn remove_attribute(&self, doc: &str, node_path: &str, attr: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        let node = store.document_mut(doc)?.node_mut(node_path)?;
        if node.attrs.remove(attr).is_none() {
            bail!("no attribute {node_path}.{attr} in {doc}");
        }
        Ok(())
    }

    async fn get_value(&self, doc: &str, node_path: &str, attr: &str) -> Result<Option<f64>> {
        let store = self.store.lock().await;
        let node = store.document(doc)?.node(node_path)?;
        let attribute = node
            .attrs
            .get(attr)
            .ok_or_else(|| anyhow!("no attribute {node_path}.{attr} in {doc}"))?;
        Ok(attribute.value)
    }

    async fn set_value(&self, doc: &str, node_path: &str, attr: &str, value: f64) -> Result<()> {
        let write = AttrWrite::new(node_path, attr, value);
        self.apply_edits(doc, std::slice::from_ref(&write)).await
    }

    async fn apply_edits(&self, doc: &str, edits: &[AttrWrite]) -> Result<()> {
        let mut store = self.store.lock().await;
        let document = store.document_mut(doc)?;

        // Validate the whole unit before touching anything; a failed batch
        // must leave no partial writes behind.
        for edit in edits {
            let node = document.node(&edit.node_path)?;
            if !node.attrs.contains_key(&edit.attr) {
                bail!("no attribute {}.{} in {doc}", edit.node_path, edit.attr);
            }
        }
        for edit in edits {
            let attribute = document
                .node_mut(&edit.node_path)?
                .attrs
                .get_mut(&edit.attr)
                .ok_or_else(|| anyhow!("no attribute {}.{} in {doc}", edit.node_path, edit.attr))?;
            attribute.value = Some(edit.value);
        }
        document.batches.push(edits.to_vec());
        Ok(())
    }

    async fn link_sublayer(&self, doc: &str, sublayer: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        let document = store.document_mut(doc)?;
        if !document.sublayers.iter().any(|s| s == sublayer) {
            document.sublayers.push(sublayer.to_string());
        }
        Ok(())
    }

    async fn propagate(&self) -> Result<()> {
        self.store.lock().await.propagations += 1;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::debug!("in-process store dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn service() -> MemoryAssetService {
        MemoryAssetService::new(DiagnosticSink::new())
    }

    #[tokio::test]
    async fn declare_set_and_get_round_trip() -> Result<()> {
        let svc = service();
        svc.create("t.live").await?;
        svc.declare_node("t.live", "/iot", "IoT Root").await?;
        svc.declare_attribute("t.live", "/iot", "speed", ValueType::Double)
            .await?;

        assert_eq!(svc.get_value("t.live", "/iot", "speed").await?, None);
        svc.set_value("t.live", "/iot", "speed", 0.84).await?;
        assert_eq!(svc.get_value("t.live", "/iot", "speed").await?, Some(0.84));
        Ok(())
    }

    #[tokio::test]
    async fn redeclaring_an_attribute_is_idempotent() -> Result<()> {
        let svc = service();
        svc.create("t.live").await?;
        svc.declare_node("t.live", "/iot", "IoT Root").await?;
        svc.declare_attribute("t.live", "/iot", "speed", ValueType::Double)
            .await?;
        svc.declare_attribute("t.live", "/iot", "speed", ValueType::Double)
            .await?;
        assert_eq!(svc.list_attributes("t.live", "/iot").await?, vec!["speed"]);
        Ok(())
    }

    #[tokio::test]
    async fn failed_batch_applies_nothing() -> Result<()> {
        let svc = service();
        svc.create("t.live").await?;
        svc.declare_node("t.live", "/iot", "IoT Root").await?;
        svc.declare_attribute("t.live", "/iot", "speed", ValueType::Double)
            .await?;

        let edits = vec![
            AttrWrite::new("/iot", "speed", 1.0),
            AttrWrite::new("/iot", "undeclared", 2.0),
        ];
        assert!(svc.apply_edits("t.live", &edits).await.is_err());

        assert_eq!(svc.get_value("t.live", "/iot", "speed").await?, None);
        assert!(svc.applied_batches("t.live").await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn copy_respects_collision_policy() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{{\"name\": \"scene\"}}")?;
        file.flush()?;

        let svc = service();
        svc.copy(file.path(), "base.scene", CopyPolicy::ErrorIfExists)
            .await?;
        assert!(svc
            .copy(file.path(), "base.scene", CopyPolicy::ErrorIfExists)
            .await
            .is_err());
        svc.copy(file.path(), "base.scene", CopyPolicy::Overwrite)
            .await?;
        assert!(svc.stat("base.scene").await?);
        Ok(())
    }

    #[tokio::test]
    async fn linking_a_sublayer_twice_keeps_one_reference() -> Result<()> {
        let svc = service();
        svc.create("base.scene").await?;
        svc.link_sublayer("base.scene", "t.live").await?;
        svc.link_sublayer("base.scene", "t.live").await?;
        assert_eq!(svc.sublayers_of("base.scene").await, vec!["t.live"]);
        Ok(())
    }

    #[tokio::test]
    async fn propagate_counts_flushes() -> Result<()> {
        let svc = service();
        svc.propagate().await?;
        svc.propagate().await?;
        assert_eq!(svc.propagation_count().await, 2);
        Ok(())
    }
}
