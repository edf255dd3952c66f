use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::ReplayConfig;
use crate::samples::{self, distinct_ids};
use crate::service::{AssetService, CopyPolicy, ValueType};

/// Reserved slot holding the playback clock in seconds.
pub const TIMESTAMP_SLOT: &str = "_ts";

const ROOT_NODE: &str = "/iot";

/// Write target prepared by [`initialize`]: the live overlay, the topic's
/// node within it, and the slot set. The slot set is fixed for the whole
/// playback run; a sample outside it is a schema mismatch, not a skip.
#[derive(Debug, Clone)]
pub struct Destination {
    pub overlay: String,
    pub node_path: String,
    pub slots: BTreeSet<String>,
}

pub fn base_scene_path(topic: &str) -> String {
    format!("{topic}.scene")
}

pub fn overlay_path(topic: &str) -> String {
    format!("{topic}.live")
}

/// Prepares the destination for a topic: stages the base scene document,
/// finds-or-creates the live overlay, links it into the base document, and
/// declares one double slot per distinct CSV identifier plus the timestamp
/// slot. Re-running starts clean: pre-existing declarations on the topic node
/// are removed before redeclaring. Every failure here is fatal; setup errors
/// are not treated as transient.
pub async fn initialize(service: &dyn AssetService, cfg: &ReplayConfig) -> Result<Destination> {
    let topic = &cfg.topic;
    let base = base_scene_path(topic);
    let overlay = overlay_path(topic);

    let local_scene = cfg.content_dir.join(&base);
    info!("staging {} as {}", local_scene.display(), base);
    service
        .copy(&local_scene, &base, CopyPolicy::Overwrite)
        .await
        .with_context(|| format!("unable to stage base scene for topic {topic}"))?;

    service
        .open(&base)
        .await
        .with_context(|| format!("unable to open base scene {base}"))?;

    if service.stat(&overlay).await? {
        service
            .open(&overlay)
            .await
            .with_context(|| format!("unable to open live overlay {overlay}"))?;
    } else {
        info!("creating live overlay {overlay}");
        service
            .create(&overlay)
            .await
            .with_context(|| format!("unable to create live overlay {overlay}"))?;
    }
    service.declare_node(&overlay, ROOT_NODE, "IoT Root").await?;

    service
        .link_sublayer(&base, &overlay)
        .await
        .with_context(|| format!("unable to link {overlay} into {base}"))?;

    let csv_path = samples::topic_data_path(&cfg.content_dir, topic);
    let samples = samples::load_samples(&csv_path)?;
    let ids = distinct_ids(&samples);
    info!("topic {topic}: {} distinct identifiers in {}", ids.len(), csv_path.display());

    let node_path = format!("{ROOT_NODE}/{topic}");
    service.declare_node(&overlay, &node_path, topic).await?;

    // Start clean on every run so stale declarations from an earlier CSV
    // cannot linger.
    for stale in service.list_attributes(&overlay, &node_path).await? {
        service.remove_attribute(&overlay, &node_path, &stale).await?;
    }

    service
        .declare_attribute(&overlay, &node_path, TIMESTAMP_SLOT, ValueType::Double)
        .await
        .with_context(|| format!("unable to declare the {TIMESTAMP_SLOT} slot"))?;
    for id in &ids {
        service
            .declare_attribute(&overlay, &node_path, id, ValueType::Double)
            .await
            .with_context(|| format!("unable to declare slot {id}"))?;
    }

    // Flush the declarations so readers see the prepared node before the
    // first batch arrives.
    service
        .propagate()
        .await
        .context("unable to flush initial declarations")?;

    let mut slots = ids;
    slots.insert(TIMESTAMP_SLOT.to_string());
    Ok(Destination {
        overlay,
        node_path,
        slots,
    })
}
