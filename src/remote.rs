use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::diagnostics::{DiagnosticSink, Severity};
use crate::service::{AssetService, AttrWrite, CopyPolicy, ValueType};

/// HTTP client for an asset server speaking plain JSON.
///
/// Mapping: HEAD probes a document, PUT stages raw content (with a SHA-256
/// digest header the server may verify), GET reads a document or an attribute
/// value, and POST carries commands (`create`, `declare-node`, edits, ...)
/// addressed to a document path. Everything past this mapping (composition,
/// persistence, fan-out to other readers) is the server's concern.
pub struct HttpAssetService {
    http: reqwest::Client,
    root: String,
    sink: DiagnosticSink,
}

#[derive(Debug, Deserialize)]
struct ValueResponse {
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AttributesResponse {
    attributes: Vec<String>,
}

impl HttpAssetService {
    pub fn new(host: &str, base_path: &str, sink: DiagnosticSink) -> Self {
        HttpAssetService {
            http: reqwest::Client::new(),
            root: service_root(host, base_path),
            sink,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.root, path.trim_start_matches('/'))
    }

    /// Sends a command to a document endpoint and maps non-2xx to an error,
    /// recording the server's answer in the diagnostic sink.
    async fn command(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let url = self.url(path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("command to {url} failed to send"))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            self.sink.record(
                Severity::Error,
                "http",
                format!("{url} answered {status}: {detail}"),
            );
            bail!("asset server rejected command to {url} ({status})");
        }
        Ok(())
    }
}

fn service_root(host: &str, base_path: &str) -> String {
    format!(
        "http://{}/{}",
        host.trim_end_matches('/'),
        base_path.trim_matches('/')
    )
}

#[async_trait]
impl AssetService for HttpAssetService {
    async fn check_connection(&self) -> Result<()> {
        let response = self
            .http
            .head(&self.root)
            .send()
            .await
            .with_context(|| format!("no route to asset server at {}", self.root))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            self.sink.record(
                Severity::Error,
                "http",
                format!("server reachable but {} not found", self.root),
            );
            bail!("asset server has no {} path", self.root);
        }
        if !status.is_success() {
            bail!("asset server at {} answered {status}", self.root);
        }
        tracing::info!("connected to asset server at {}", self.root);
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<bool> {
        let url = self.url(path);
        let response = self
            .http
            .head(&url)
            .send()
            .await
            .with_context(|| format!("stat of {url} failed to send"))?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => {
                self.sink
                    .record(Severity::Warning, "http", format!("stat {url} answered {s}"));
                bail!("stat of {url} answered {s}")
            }
        }
    }

    async fn copy(&self, local: &Path, dest: &str, policy: CopyPolicy) -> Result<()> {
        if policy == CopyPolicy::ErrorIfExists && self.stat(dest).await? {
            bail!("document already exists at {dest}");
        }
        let bytes = tokio::fs::read(local)
            .await
            .with_context(|| format!("unable to read {}", local.display()))?;
        let digest = format!("{:x}", Sha256::digest(&bytes));

        let url = self.url(dest);
        let response = self
            .http
            .put(&url)
            .header("x-content-sha256", &digest)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("upload to {url} failed to send"))?;
        if !response.status().is_success() {
            self.sink.record(
                Severity::Error,
                "http",
                format!("upload to {url} answered {}", response.status()),
            );
            bail!("upload to {url} answered {}", response.status());
        }
        tracing::debug!("staged {} as {} (sha256 {})", local.display(), dest, digest);
        Ok(())
    }

    async fn open(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("open of {url} failed to send"))?;
        if !response.status().is_success() {
            bail!("unable to open document at {url} ({})", response.status());
        }
        Ok(())
    }

    async fn create(&self, path: &str) -> Result<()> {
        self.command(path, json!({ "op": "create" })).await
    }

    async fn declare_node(&self, doc: &str, node_path: &str, display: &str) -> Result<()> {
        self.command(
            doc,
            json!({ "op": "declare-node", "node": node_path, "display": display }),
        )
        .await
    }

    async fn declare_attribute(
        &self,
        doc: &str,
        node_path: &str,
        attr: &str,
        ty: ValueType,
    ) -> Result<()> {
        self.command(
            doc,
            json!({ "op": "declare-attribute", "node": node_path, "attr": attr, "type": ty }),
        )
        .await
    }

    async fn list_attributes(&self, doc: &str, node_path: &str) -> Result<Vec<String>> {
        let url = self.url(doc);
        let response = self
            .http
            .get(&url)
            .query(&[("node", node_path)])
            .send()
            .await
            .with_context(|| format!("attribute listing from {url} failed to send"))?;
        if !response.status().is_success() {
            bail!("attribute listing from {url} answered {}", response.status());
        }
        let parsed: AttributesResponse = response
            .json()
            .await
            .with_context(|| format!("malformed attribute listing from {url}"))?;
        Ok(parsed.attributes)
    }

    async fn remove_attribute(&self, doc: &str, node_path: &str, attr: &str) -> Result<()> {
        self.command(
            doc,
            json!({ "op": "remove-attribute", "node": node_path, "attr": attr }),
        )
        .await
    }

    async fn get_value(&self, doc: &str, node_path: &str, attr: &str) -> Result<Option<f64>> {
        let url = self.url(doc);
        let response = self
            .http
            .get(&url)
            .query(&[("node", node_path), ("attr", attr)])
            .send()
            .await
            .with_context(|| format!("value read from {url} failed to send"))?;
        if !response.status().is_success() {
            bail!(
                "value read of {node_path}.{attr} from {url} answered {}",
                response.status()
            );
        }
        let parsed: ValueResponse = response
            .json()
            .await
            .with_context(|| format!("malformed value response from {url}"))?;
        Ok(parsed.value)
    }

    async fn set_value(&self, doc: &str, node_path: &str, attr: &str, value: f64) -> Result<()> {
        let write = AttrWrite::new(node_path, attr, value);
        self.apply_edits(doc, std::slice::from_ref(&write)).await
    }

    async fn apply_edits(&self, doc: &str, edits: &[AttrWrite]) -> Result<()> {
        self.command(doc, json!({ "op": "edits", "atomic": true, "edits": edits }))
            .await
    }

    async fn link_sublayer(&self, doc: &str, sublayer: &str) -> Result<()> {
        self.command(doc, json!({ "op": "link-sublayer", "path": sublayer }))
            .await
    }

    async fn propagate(&self) -> Result<()> {
        let url = format!("{}/live/process", self.root);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .with_context(|| format!("propagation request to {url} failed to send"))?;
        if !response.status().is_success() {
            bail!("propagation request answered {}", response.status());
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        // Stateless HTTP client; nothing to tear down beyond dropping it.
        tracing::debug!("asset server client closed");
        Ok(())
    }
}
