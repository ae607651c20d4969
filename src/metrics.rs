// MOLT METRICS SAMPLER
// POINT-IN-TIME MEMORY SNAPSHOTS FROM /proc/<pid>/status, THE VERSIONED
// TIMING/MEMORY RECORD LOGS, AND THEIR ORDER-STATISTIC REDUCTION.
//
// TIMING LOGS ARE READ-REDUCE-TRUNCATE: EVERY PASS MUST START FROM AN
// EMPTY LOG OR LATER MEDIANS ARE COMPUTED OVER A MIXTURE OF VERSIONS.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Variant;
use crate::error::{BenchError, Result};
use crate::process::ProcessHandle;

// BUMP WHEN A RECORD SHAPE CHANGES. READERS REJECT ANYTHING ELSE.
pub const RECORD_SCHEMA: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub vm_size_kb: u64,
    pub vm_rss_kb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Serial,
    Concurrent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingRecord {
    pub schema: u32,
    pub version: usize,
    pub variant: Variant,
    pub secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub schema: u32,
    pub version: usize,
    pub variant: Variant,
    pub phase: Phase,
    pub vm_size_kb: u64,
    pub vm_rss_kb: u64,
}

// READ THE STATUS SNAPSHOT FOR A LIVE PID. THE PID CAN VANISH BETWEEN THE
// CALLER'S LAST CHECK AND THIS READ (NON-BLOCKING LAUNCH MODEL); THAT RACE
// SURFACES AS SampleUnavailable.
pub fn sample_memory(handle: &ProcessHandle) -> Result<MemorySample> {
    let raw = read_status(handle.pid)?;
    parse_status_snapshot(&raw)
}

pub fn read_status(pid: u32) -> Result<String> {
    fs::read_to_string(format!("/proc/{}/status", pid))
        .map_err(|_| BenchError::SampleUnavailable { pid })
}

fn status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(VmSize|VmRSS):\s+(\d+)\s+kB").unwrap()
    })
}

// LABEL-MATCH THE TWO FIELDS. EVERYTHING ELSE IN THE SNAPSHOT IS IGNORED.
pub fn parse_status_snapshot(raw: &str) -> Result<MemorySample> {
    let mut vm_size = None;
    let mut vm_rss = None;
    for cap in status_re().captures_iter(raw) {
        let field: &'static str = if &cap[1] == "VmSize" { "VmSize" } else { "VmRSS" };
        let value: u64 = cap[2]
            .parse()
            .map_err(|_| BenchError::MalformedSnapshot { field })?;
        match field {
            "VmSize" => vm_size = Some(value),
            _ => vm_rss = Some(value),
        }
    }
    let vm_size_kb = vm_size.ok_or(BenchError::MalformedSnapshot { field: "VmSize" })?;
    let vm_rss_kb = vm_rss.ok_or(BenchError::MalformedSnapshot { field: "VmRSS" })?;
    Ok(MemorySample {
        vm_size_kb,
        vm_rss_kb,
    })
}

// APPEND ONE TIMING RECORD. APPEND-ONLY WITHIN A PASS.
pub fn record_timing(path: &Path, version: usize, variant: Variant, secs: f64) -> Result<()> {
    let rec = TimingRecord {
        schema: RECORD_SCHEMA,
        version,
        variant,
        secs,
    };
    append_record(path, &serde_json::to_string(&rec)?)
}

pub fn record_memory(path: &Path, rec: &MemoryRecord) -> Result<()> {
    append_record(path, &serde_json::to_string(rec)?)
}

fn append_record(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{}", line)?;
    Ok(())
}

// RETURN THE FIRST n SAMPLES IN CALL ORDER, THEN TRUNCATE THE LOG.
// FEWER THAN n RECORDS MEANS A WORKLOAD RUN DID NOT COMPLETE AS EXPECTED.
pub fn reduce_timings(path: &Path, n: usize) -> Result<Vec<TimingRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(BenchError::Io(e)),
    };
    let mut records = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let rec: TimingRecord = serde_json::from_str(line)?;
        if rec.schema != RECORD_SCHEMA {
            return Err(BenchError::UnsupportedSchema { schema: rec.schema });
        }
        records.push(rec);
    }
    if records.len() < n {
        return Err(BenchError::InsufficientSamples {
            need: n,
            got: records.len(),
        });
    }
    records.truncate(n);
    fs::write(path, "")?;
    Ok(records)
}

// STANDARD ORDER-STATISTIC MEDIAN OVER THE FULL SAMPLE SET. NO OUTLIER
// REJECTION, NO WEIGHTING: THE COMPARISON OF INTEREST IS VARIANT VS
// VARIANT UNDER IDENTICAL SAMPLING.
pub fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = "Name:\tserver\nState:\tS (sleeping)\nVmPeak:\t  10000 kB\nVmSize:\t   5528 kB\nVmRSS:\t   1788 kB\nThreads:\t1\n";

    #[test]
    fn snapshot_extracts_both_fields() {
        let s = parse_status_snapshot(SNAPSHOT).unwrap();
        assert_eq!(s.vm_size_kb, 5528);
        assert_eq!(s.vm_rss_kb, 1788);
    }

    #[test]
    fn snapshot_missing_rss_is_malformed() {
        let raw = "Name:\tserver\nVmSize:\t   5528 kB\n";
        let err = parse_status_snapshot(raw).unwrap_err();
        assert!(matches!(
            err,
            BenchError::MalformedSnapshot { field: "VmRSS" }
        ));
    }

    #[test]
    fn snapshot_missing_size_is_malformed() {
        let raw = "Name:\tserver\nVmRSS:\t   1788 kB\n";
        let err = parse_status_snapshot(raw).unwrap_err();
        assert!(matches!(
            err,
            BenchError::MalformedSnapshot { field: "VmSize" }
        ));
    }

    #[test]
    fn reduce_returns_call_order_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("timing.log");
        for secs in [1.0, 2.0, 3.0] {
            record_timing(&log, 0, Variant::Live, secs).unwrap();
        }
        let reduced = reduce_timings(&log, 3).unwrap();
        let secs: Vec<f64> = reduced.iter().map(|r| r.secs).collect();
        assert_eq!(secs, vec![1.0, 2.0, 3.0]);
        assert_eq!(median(&secs), 2.0);
        // SINK IS EMPTY: AN IMMEDIATE SECOND REDUCTION MUST FAIL
        let err = reduce_timings(&log, 3).unwrap_err();
        assert!(matches!(
            err,
            BenchError::InsufficientSamples { need: 3, got: 0 }
        ));
    }

    #[test]
    fn reduce_insufficient_samples() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("timing.log");
        record_timing(&log, 0, Variant::Restart, 0.5).unwrap();
        let err = reduce_timings(&log, 2).unwrap_err();
        assert!(matches!(
            err,
            BenchError::InsufficientSamples { need: 2, got: 1 }
        ));
    }

    #[test]
    fn reduce_missing_file_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("never-written.log");
        let err = reduce_timings(&log, 1).unwrap_err();
        assert!(matches!(
            err,
            BenchError::InsufficientSamples { need: 1, got: 0 }
        ));
    }

    #[test]
    fn reduce_rejects_foreign_schema() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("timing.log");
        fs::write(
            &log,
            "{\"schema\":9,\"version\":0,\"variant\":\"live\",\"secs\":1.0}\n",
        )
        .unwrap();
        let err = reduce_timings(&log, 1).unwrap_err();
        assert!(matches!(err, BenchError::UnsupportedSchema { schema: 9 }));
    }

    #[test]
    fn reduce_keeps_only_first_n() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("timing.log");
        for secs in [4.0, 5.0, 6.0, 7.0] {
            record_timing(&log, 1, Variant::Live, secs).unwrap();
        }
        let reduced = reduce_timings(&log, 2).unwrap();
        assert_eq!(reduced.len(), 2);
        assert_eq!(reduced[0].secs, 4.0);
        assert_eq!(reduced[1].secs, 5.0);
    }

    #[test]
    fn median_even_count_averages_middle_pair() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn median_empty_is_zero() {
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn memory_record_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("memory.log");
        let rec = MemoryRecord {
            schema: RECORD_SCHEMA,
            version: 2,
            variant: Variant::Restart,
            phase: Phase::Concurrent,
            vm_size_kb: 5528,
            vm_rss_kb: 1788,
        };
        record_memory(&log, &rec).unwrap();
        let raw = fs::read_to_string(&log).unwrap();
        let back: MemoryRecord = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(back.vm_size_kb, 5528);
        assert!(matches!(back.phase, Phase::Concurrent));
        assert!(matches!(back.variant, Variant::Restart));
    }
}
