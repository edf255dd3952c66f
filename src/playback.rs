use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::sleep;
use tracing::info;

use crate::initializer::{Destination, TIMESTAMP_SLOT};
use crate::samples::{self, SampleBatch};
use crate::service::{AssetService, AttrWrite};

/// Replays a topic recording against the destination, one atomic batch per
/// distinct second, sleeping between batches to reproduce the recorded
/// spacing. Pacing is relative to the recording's own intervals, not to
/// wall-clock time of day. Runs to exhaustion; there is no resume.
pub async fn play(service: &dyn AssetService, dest: &Destination, csv_path: &Path) -> Result<()> {
    let samples = samples::load_samples(csv_path)?;
    if samples.is_empty() {
        info!("no samples in {}, nothing to replay", csv_path.display());
        return Ok(());
    }
    let batches = samples::group_into_batches(samples);
    info!("replaying {} batches onto {}", batches.len(), dest.node_path);

    let first = batches[0].timestamp;
    let mut previous = first;
    for batch in &batches {
        let wait = (batch.timestamp - previous).num_seconds();
        if wait > 0 {
            sleep(Duration::from_secs(wait as u64)).await;
        }
        let clock = (batch.timestamp - first).num_seconds() as f64;
        write_batch(service, dest, batch, clock).await?;
        previous = batch.timestamp;
    }
    info!("replay complete");
    Ok(())
}

/// Writes one batch as a single atomic edit unit and triggers propagation.
/// The timestamp slot carries the playback clock. Every sample must have a
/// declared slot; a missing slot aborts the run instead of dropping data.
async fn write_batch(
    service: &dyn AssetService,
    dest: &Destination,
    batch: &SampleBatch,
    clock: f64,
) -> Result<()> {
    let mut edits = Vec::with_capacity(batch.samples.len() + 1);
    edits.push(AttrWrite::new(&dest.node_path, TIMESTAMP_SLOT, clock));
    for sample in &batch.samples {
        if !dest.slots.contains(&sample.id) {
            bail!(
                "sample id {} has no declared slot on {}; re-run initialization against this recording",
                sample.id,
                dest.node_path
            );
        }
        edits.push(AttrWrite::new(&dest.node_path, &sample.id, sample.value));
    }

    info!(
        "batch {} ({} samples, clock {:.1}s)",
        batch.timestamp,
        batch.samples.len(),
        clock
    );
    service.apply_edits(&dest.overlay, &edits).await?;
    service.propagate().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticSink;
    use crate::initializer::{self, initialize};
    use crate::config::ReplayConfig;
    use crate::memory::MemoryAssetService;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::time::Instant;

    fn write_content(dir: &Path, topic: &str, csv_rows: &[&str]) -> PathBuf {
        fs::write(dir.join(format!("{topic}.scene")), "{\"name\": \"scene\"}").unwrap();
        let mut csv = String::from("Id,Value,TimeStamp\n");
        for row in csv_rows {
            csv.push_str(row);
            csv.push('\n');
        }
        let path = dir.join(format!("{topic}_iot_data.csv"));
        fs::write(&path, csv).unwrap();
        path
    }

    async fn prepared(
        dir: &Path,
        topic: &str,
    ) -> (MemoryAssetService, crate::initializer::Destination) {
        let svc = MemoryAssetService::new(DiagnosticSink::new());
        let cfg = ReplayConfig {
            topic: topic.to_string(),
            content_dir: dir.to_path_buf(),
        };
        let dest = initialize(&svc, &cfg).await.expect("initialization");
        (svc, dest)
    }

    #[tokio::test(start_paused = true)]
    async fn replays_batches_with_recorded_spacing_and_clock() -> Result<()> {
        let dir = TempDir::new()?;
        let csv = write_content(
            dir.path(),
            "belt",
            &[
                "A,1.0,2024-03-11 09:14:02.100",
                "B,2.0,2024-03-11 09:14:02.700",
                "A,1.5,2024-03-11 09:14:03.200",
                "B,2.5,2024-03-11 09:14:03.800",
                "A,2.0,2024-03-11 09:14:04.400",
                "B,3.0,2024-03-11 09:14:04.900",
            ],
        );
        let (svc, dest) = prepared(dir.path(), "belt").await;

        let started = Instant::now();
        play(&svc, &dest, &csv).await?;

        // Two one-second gaps between three batches.
        assert!(started.elapsed() >= Duration::from_secs(2));

        let batches = svc.applied_batches("belt.live").await;
        assert_eq!(batches.len(), 3);
        let clocks: Vec<f64> = batches
            .iter()
            .map(|b| {
                b.iter()
                    .find(|w| w.attr == initializer::TIMESTAMP_SLOT)
                    .expect("timestamp write")
                    .value
            })
            .collect();
        assert_eq!(clocks, vec![0.0, 1.0, 2.0]);

        // Whole batch lands as one unit: the last one carries _ts and both ids.
        assert_eq!(batches[2].len(), 3);
        assert_eq!(svc.get_value("belt.live", "/iot/belt", "A").await?, Some(2.0));
        assert_eq!(svc.get_value("belt.live", "/iot/belt", "B").await?, Some(3.0));
        // One flush from initialization, then one per batch.
        assert_eq!(svc.propagation_count().await, 4);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn gaps_in_the_recording_are_reproduced() -> Result<()> {
        let dir = TempDir::new()?;
        let csv = write_content(
            dir.path(),
            "belt",
            &[
                "A,1.0,2024-03-11 09:14:02",
                "A,2.0,2024-03-11 09:14:07",
            ],
        );
        let (svc, dest) = prepared(dir.path(), "belt").await;

        let started = Instant::now();
        play(&svc, &dest, &csv).await?;
        assert!(started.elapsed() >= Duration::from_secs(5));

        let batches = svc.applied_batches("belt.live").await;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].value, 5.0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn undeclared_id_stops_playback_before_its_batch() -> Result<()> {
        let dir = TempDir::new()?;
        let csv = write_content(
            dir.path(),
            "belt",
            &[
                "A,1.0,2024-03-11 09:14:02",
                "C,9.0,2024-03-11 09:14:03",
                "A,2.0,2024-03-11 09:14:04",
            ],
        );
        let (svc, _) = prepared(dir.path(), "belt").await;

        // Destination prepared against a recording that never contained C.
        let mut slots = BTreeSet::new();
        slots.insert("A".to_string());
        slots.insert(initializer::TIMESTAMP_SLOT.to_string());
        let dest = Destination {
            overlay: "belt.live".to_string(),
            node_path: "/iot/belt".to_string(),
            slots,
        };

        let err = play(&svc, &dest, &csv).await.expect_err("schema mismatch");
        assert!(err.to_string().contains("no declared slot"));

        // Only the first batch was written; the offending one and everything
        // after it never reached the destination.
        let batches = svc.applied_batches("belt.live").await;
        assert_eq!(batches.len(), 1);
        assert_eq!(svc.get_value("belt.live", "/iot/belt", "A").await?, Some(1.0));
        Ok(())
    }

    #[tokio::test]
    async fn empty_recording_is_a_clean_noop() -> Result<()> {
        let dir = TempDir::new()?;
        let csv = write_content(dir.path(), "belt", &[]);
        let (svc, dest) = prepared(dir.path(), "belt").await;

        play(&svc, &dest, &csv).await?;
        assert!(svc.applied_batches("belt.live").await.is_empty());
        // Only the initialization flush; no batch ever propagated.
        assert_eq!(svc.propagation_count().await, 1);
        Ok(())
    }
}
