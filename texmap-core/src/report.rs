//! JSON run reports.
//!
//! Summarises a `prepare` run per texture set: which files went in, which
//! maps came out, and the decisions taken on the way.

use crate::config::WorkflowConfig;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of one texture set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetReport {
    pub base_name: String,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    /// Progress messages, in order
    pub messages: Vec<String>,
    /// Set-level failure, if processing was aborted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SetReport {
    pub fn new(base_name: impl Into<String>, inputs: Vec<PathBuf>) -> Self {
        Self {
            base_name: base_name.into(),
            inputs,
            ..Self::default()
        }
    }
}

/// Report for a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareReport {
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub config: WorkflowConfig,
    pub sets: Vec<SetReport>,
    pub output_count: usize,
}

impl PrepareReport {
    pub fn new(config: &WorkflowConfig, output_dir: Option<&Path>, sets: Vec<SetReport>) -> Self {
        let output_count = sets.iter().map(|s| s.outputs.len()).sum();
        Self {
            generated_at: Utc::now(),
            output_dir: output_dir.map(Path::to_path_buf),
            config: config.clone(),
            sets,
            output_count,
        }
    }

    /// Every output path, in set order.
    pub fn outputs(&self) -> Vec<PathBuf> {
        self.sets.iter().flat_map(|s| s.outputs.iter().cloned()).collect()
    }

    /// Sets that failed as a whole.
    pub fn failed_sets(&self) -> impl Iterator<Item = &SetReport> {
        self.sets.iter().filter(|s| s.error.is_some())
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PrepareReport {
        let mut set = SetReport::new("Wood", vec![PathBuf::from("Wood_Rough.png")]);
        set.outputs.push(PathBuf::from("out/Wood_Roughness.png"));
        set.messages.push("Saved Roughness".into());
        let mut failed = SetReport::new("Stone", vec![]);
        failed.error = Some("boom".into());
        PrepareReport::new(&WorkflowConfig::default(), Some(Path::new("out")), vec![set, failed])
    }

    #[test]
    fn report_serializes_to_json() {
        let report = sample();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"generated_at\""));
        assert!(json.contains("\"base_name\": \"Wood\""));
        assert!(json.contains("\"output_count\": 1"));
        assert_eq!(report.failed_sets().count(), 1);
    }

    #[test]
    fn report_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        let report = sample();
        report.write(&path).unwrap();

        let parsed: PrepareReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.sets, report.sets);
        assert_eq!(parsed.outputs(), vec![PathBuf::from("out/Wood_Roughness.png")]);
    }
}
