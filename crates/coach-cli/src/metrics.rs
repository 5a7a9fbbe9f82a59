//! Run metrics: one JSON line per workflow run, plus aggregate stats

use chrono::{DateTime, Utc};
use coach_workflow::FinalResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One recorded run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub context_type: String,
    /// Missing when the run failed before producing a result
    #[serde(default)]
    pub intent: Option<String>,
    pub model: String,
    pub provider: String,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub validation_issues: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(context_type: &str, model: &str, provider: &str, latency_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            context_type: context_type.to_string(),
            intent: None,
            model: model.to_string(),
            provider: provider.to_string(),
            latency_ms,
            success: false,
            retry_count: 0,
            validation_issues: Vec::new(),
            error: None,
        }
    }

    pub fn with_result(mut self, result: &FinalResult) -> Self {
        self.success = true;
        self.intent = Some(result.intent.to_string());
        self.retry_count = result.retry_count;
        self.validation_issues = result.issue_codes().into_iter().map(String::from).collect();
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self
    }
}

/// Append-only metrics file
pub struct MetricsLog {
    path: PathBuf,
}

impl MetricsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record
    pub fn append(&self, record: &RunRecord) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = File::options().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)
    }

    /// Read every parseable record; unreadable lines are skipped
    pub fn read_all(&self) -> std::io::Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(reader
            .lines()
            .map_while(Result::ok)
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect())
    }
}

/// Aggregates over a set of runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub total: usize,
    pub successes: usize,
    pub avg_latency_ms: f64,
    pub total_retries: u64,
    pub with_issues: usize,
    pub by_intent: BTreeMap<String, usize>,
}

impl Stats {
    pub fn from_records(records: &[RunRecord]) -> Self {
        let mut stats = Stats {
            total: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return stats;
        }

        let mut latency_sum = 0u64;
        for record in records {
            latency_sum += record.latency_ms;
            stats.total_retries += u64::from(record.retry_count);
            if record.success {
                stats.successes += 1;
            }
            if !record.validation_issues.is_empty() {
                stats.with_issues += 1;
            }
            if let Some(intent) = &record.intent {
                *stats.by_intent.entry(intent.clone()).or_insert(0) += 1;
            }
        }
        stats.avg_latency_ms = latency_sum as f64 / records.len() as f64;
        stats
    }

    /// Percentage of successful runs
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successes as f64 * 100.0 / self.total as f64
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runs:            {}", self.total)?;
        writeln!(f, "Success rate:    {:.1}%", self.success_rate())?;
        writeln!(f, "Avg latency:     {:.0} ms", self.avg_latency_ms)?;
        writeln!(f, "Total retries:   {}", self.total_retries)?;
        writeln!(f, "With warnings:   {}", self.with_issues)?;
        if !self.by_intent.is_empty() {
            writeln!(f, "By intent:")?;
            for (intent, count) in &self.by_intent {
                writeln!(f, "  {:<10} {}", intent, count)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(intent: Option<&str>, latency_ms: u64, success: bool, retries: u32) -> RunRecord {
        RunRecord {
            intent: intent.map(String::from),
            success,
            retry_count: retries,
            ..RunRecord::new("epic", "gpt-4o-mini", "openai", latency_ms)
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = MetricsLog::new(dir.path().join("sub").join("metrics.jsonl"));
        assert!(log.read_all().unwrap().is_empty());

        log.append(&record(Some("draft"), 1200, true, 1)).unwrap();
        log.append(&record(None, 300, false, 0).with_error("generate timed out after 90s"))
            .unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap()
            .write_all(b"not json\n")
            .unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].intent.as_deref(), Some("draft"));
        assert_eq!(records[1].error.as_deref(), Some("generate timed out after 90s"));
    }

    #[test]
    fn test_stats() {
        let mut flagged = record(Some("draft"), 3000, true, 2);
        flagged.validation_issues = vec!["missing_required_section".into()];
        let records = vec![
            record(Some("question"), 1000, true, 0),
            flagged,
            record(Some("question"), 2000, true, 0),
            record(None, 2000, false, 0),
        ];

        let stats = Stats::from_records(&records);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successes, 3);
        assert_eq!(stats.success_rate(), 75.0);
        assert_eq!(stats.avg_latency_ms, 2000.0);
        assert_eq!(stats.total_retries, 2);
        assert_eq!(stats.with_issues, 1);
        assert_eq!(stats.by_intent.get("question"), Some(&2));
        assert!(stats.to_string().contains("Success rate:    75.0%"));
    }

    #[test]
    fn test_empty_stats() {
        let stats = Stats::from_records(&[]);
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.total, 0);
    }
}
