//! Latency samples, per-client aggregates and the results file.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `results-client-<label>-<clients>-messages-<messages>.json`
#[must_use]
pub fn results_file_name(label: &str, num_clients: usize, messages_per_client: usize) -> String {
    format!("results-client-{label}-{num_clients}-messages-{messages_per_client}.json")
}

/// One latency sample taken by a receiving client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub message_id: String,
    /// Milliseconds between the message's `iat` and its receipt.
    pub time: u64,
    /// Sender of the sampled message.
    pub client_id: String,
}

/// Samples of one simulated client with their summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMetrics {
    pub client_id: String,
    pub messages_timings: Vec<Timing>,
    pub avg: f64,
    pub min: u64,
    pub max: u64,
}

impl ClientMetrics {
    /// Compute `avg`, `min` and `max` once. With no samples all three are zero.
    #[must_use]
    pub fn from_timings(client_id: impl Into<String>, timings: Vec<Timing>) -> Self {
        let (avg, min, max) = if timings.is_empty() {
            (0.0, 0, 0)
        } else {
            let sum: u64 = timings.iter().map(|t| t.time).sum();
            let min = timings.iter().map(|t| t.time).min().unwrap_or(0);
            let max = timings.iter().map(|t| t.time).max().unwrap_or(0);
            (sum as f64 / timings.len() as f64, min, max)
        };
        Self {
            client_id: client_id.into(),
            messages_timings: timings,
            avg,
            min,
            max,
        }
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.messages_timings.len()
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// One-line overview across every client of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub clients: usize,
    pub samples: usize,
    pub avg: f64,
    pub min: u64,
    pub max: u64,
    pub p50: u64,
    pub p95: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "clients={} samples={} avg={:.2}ms min={}ms max={}ms p50={}ms p95={}ms",
            self.clients, self.samples, self.avg, self.min, self.max, self.p50, self.p95
        )
    }
}

/// Every client's metrics, keyed by client id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunReport {
    clients: BTreeMap<String, ClientMetrics>,
}

impl RunReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metrics: ClientMetrics) {
        self.clients.insert(metrics.client_id.clone(), metrics);
    }

    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<&ClientMetrics> {
        self.clients.get(client_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientMetrics> {
        self.clients.values()
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let mut times: Vec<u64> = self
            .iter()
            .flat_map(|m| m.messages_timings.iter().map(|t| t.time))
            .collect();
        if times.is_empty() {
            return RunSummary {
                clients: self.len(),
                ..RunSummary::default()
            };
        }
        times.sort_unstable();
        let sum: u64 = times.iter().sum();
        RunSummary {
            clients: self.len(),
            samples: times.len(),
            avg: sum as f64 / times.len() as f64,
            min: times[0],
            max: times[times.len() - 1],
            p50: percentile(&times, 0.50),
            p95: percentile(&times, 0.95),
        }
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// `Error::MalformedPayload` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as `dir/file_name`, creating `dir` if needed.
    ///
    /// The JSON goes to a temporary file in `dir` that is renamed into place,
    /// so an existing results file is never left truncated.
    ///
    /// # Errors
    ///
    /// `Error::ResultsWrite` naming the target path and the cause.
    pub fn write_to(&self, dir: &Path, file_name: &str) -> Result<PathBuf> {
        let path = dir.join(file_name);
        let fail = |reason: String| Error::ResultsWrite {
            path: path.clone(),
            reason,
        };

        let json = self.to_json().map_err(|e| fail(e.to_string()))?;
        std::fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| fail(e.to_string()))?;
        tmp.write_all(json.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| fail(e.to_string()))?;
        tmp.persist(&path).map_err(|e| fail(e.error.to_string()))?;

        Ok(path)
    }
}
