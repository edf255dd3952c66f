use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use csv::ReaderBuilder;
use serde::Deserialize;

/// Raw row representation when deserializing the topic CSV.
#[derive(Debug, Deserialize)]
struct SampleRow {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Value")]
    value: f64,
    #[serde(rename = "TimeStamp")]
    timestamp: String,
}

/// One sensor reading, timestamp already truncated to whole seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// All samples sharing one truncated timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    pub timestamp: DateTime<Utc>,
    pub samples: Vec<Sample>,
}

/// Path of the CSV recording for a topic.
pub fn topic_data_path(content_dir: &Path, topic: &str) -> PathBuf {
    content_dir.join(format!("{topic}_iot_data.csv"))
}

/// Reads every sample from a topic CSV. Sub-second precision is dropped on
/// load; batching and pacing operate on whole seconds only.
pub fn load_samples(path: &Path) -> Result<Vec<Sample>> {
    let file = fs::File::open(path)
        .with_context(|| format!("unable to open topic csv {}", path.display()))?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    let mut samples = Vec::new();
    for row in reader.deserialize::<SampleRow>() {
        let raw = row.with_context(|| format!("invalid sample row in {}", path.display()))?;
        let timestamp = parse_timestamp(&raw.timestamp)?;
        samples.push(Sample {
            id: raw.id,
            timestamp: truncate_to_second(timestamp),
            value: raw.value,
        });
    }
    Ok(samples)
}

/// Distinct sample identifiers, order-independent.
pub fn distinct_ids(samples: &[Sample]) -> BTreeSet<String> {
    samples.iter().map(|s| s.id.clone()).collect()
}

/// Groups samples by truncated timestamp, ascending. Identifier order within
/// a batch carries no meaning; playback relies on the batch order.
pub fn group_into_batches(samples: Vec<Sample>) -> Vec<SampleBatch> {
    let mut grouped: BTreeMap<DateTime<Utc>, Vec<Sample>> = BTreeMap::new();
    for sample in samples {
        grouped.entry(sample.timestamp).or_default().push(sample);
    }
    grouped
        .into_iter()
        .map(|(timestamp, samples)| SampleBatch { timestamp, samples })
        .collect()
}

fn truncate_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Recordings commonly use a naive "YYYY-MM-DD HH:MM:SS.ffff" form.
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .with_context(|| format!("unrecognized timestamp: {raw}"))?;
    Ok(naive.and_utc())
}
