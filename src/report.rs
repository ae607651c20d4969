// MOLT REPORT
// FIXED-WIDTH OPERATOR TABLES PLUS THE JSON RESULTS ARTIFACT.
// DIFF CONVENTION: LIVE-UPDATE MINUS RESTART, NEGATIVE = LIVE-UPDATE IS
// CHEAPER.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::coordinator::BenchmarkResult;
use crate::error::Result;

pub fn render(result: &BenchmarkResult) -> String {
    let sep = "=".repeat(64);
    let mut out: Vec<String> = Vec::new();

    out.push(sep.clone());
    out.push("MOLT BENCHMARK REPORT (LIVE-UPDATE VS RESTART)".to_string());
    out.push(sep.clone());
    out.push(format!("VERSIONS:    {}", result.versions.join(", ")));
    out.push(format!(
        "SERIAL RUNS: {}   CONNECTIONS: {}",
        result.serial_runs, result.connections
    ));
    if !result.live.complete {
        out.push("LIVE-UPDATE PASS INCOMPLETE".to_string());
    }
    if !result.restart.complete {
        out.push("RESTART PASS INCOMPLETE".to_string());
    }
    if !result.concurrent.complete {
        out.push("CONCURRENT PHASE INCOMPLETE".to_string());
    }
    out.push(String::new());

    // SERIAL MEDIANS
    out.push("SERIAL MEDIANS (DIFF = LIVE - RESTART)".to_string());
    out.push(format!(
        "{:>10} {:>12} {:>12} {:>10} {:>9}",
        "VERSION", "LIVE (S)", "RESTART (S)", "DIFF (S)", "CHANGE"
    ));
    out.push(table_rule(&[10, 12, 12, 10, 9]));
    for (i, id) in result.versions.iter().enumerate() {
        let live = result.live.versions[i].as_ref().map(|o| o.median_secs);
        let restart = result.restart.versions[i].as_ref().map(|o| o.median_secs);
        out.push(format!(
            "{:>10} {:>12} {:>12} {:>10} {:>9}",
            id,
            fmt_secs(live),
            fmt_secs(restart),
            fmt_diff_f(live, restart),
            fmt_change(live, restart)
        ));
    }
    out.push(String::new());

    // MEMORY TABLES: SERIAL PHASE THEN CONCURRENT PHASE
    let serial_size: Vec<(Option<u64>, Option<u64>)> = (0..result.versions.len())
        .map(|i| {
            (
                result.live.versions[i].as_ref().map(|o| o.memory.vm_size_kb),
                result.restart.versions[i].as_ref().map(|o| o.memory.vm_size_kb),
            )
        })
        .collect();
    let serial_rss: Vec<(Option<u64>, Option<u64>)> = (0..result.versions.len())
        .map(|i| {
            (
                result.live.versions[i].as_ref().map(|o| o.memory.vm_rss_kb),
                result.restart.versions[i].as_ref().map(|o| o.memory.vm_rss_kb),
            )
        })
        .collect();
    memory_table(&mut out, "SERIAL VMSIZE (kB)", &result.versions, &serial_size);
    memory_table(&mut out, "SERIAL VMRSS (kB)", &result.versions, &serial_rss);

    let conc_size: Vec<(Option<u64>, Option<u64>)> = (0..result.versions.len())
        .map(|i| {
            (
                result.concurrent.live[i].map(|s| s.vm_size_kb),
                result.concurrent.restart[i].map(|s| s.vm_size_kb),
            )
        })
        .collect();
    let conc_rss: Vec<(Option<u64>, Option<u64>)> = (0..result.versions.len())
        .map(|i| {
            (
                result.concurrent.live[i].map(|s| s.vm_rss_kb),
                result.concurrent.restart[i].map(|s| s.vm_rss_kb),
            )
        })
        .collect();
    memory_table(&mut out, "CONCURRENT VMSIZE (kB)", &result.versions, &conc_size);
    memory_table(&mut out, "CONCURRENT VMRSS (kB)", &result.versions, &conc_rss);

    out.push(sep);
    out.join("\n") + "\n"
}

fn memory_table(
    out: &mut Vec<String>,
    title: &str,
    versions: &[String],
    rows: &[(Option<u64>, Option<u64>)],
) {
    out.push(format!("{} (DIFF = LIVE - RESTART)", title));
    out.push(format!(
        "{:>10} {:>12} {:>12} {:>10} {:>9}",
        "VERSION", "LIVE", "RESTART", "DIFF", "CHANGE"
    ));
    out.push(table_rule(&[10, 12, 12, 10, 9]));
    for (id, &(live, restart)) in versions.iter().zip(rows) {
        out.push(format!(
            "{:>10} {:>12} {:>12} {:>10} {:>9}",
            id,
            fmt_kb(live),
            fmt_kb(restart),
            fmt_diff_u(live, restart),
            fmt_change(live.map(|v| v as f64), restart.map(|v| v as f64))
        ));
    }
    out.push(String::new());
}

fn table_rule(widths: &[usize]) -> String {
    widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join(" ")
}

fn fmt_secs(v: Option<f64>) -> String {
    match v {
        Some(s) => format!("{:.3}", s),
        None => "-".to_string(),
    }
}

fn fmt_kb(v: Option<u64>) -> String {
    match v {
        Some(k) => k.to_string(),
        None => "-".to_string(),
    }
}

fn fmt_diff_f(live: Option<f64>, restart: Option<f64>) -> String {
    match (live, restart) {
        (Some(l), Some(r)) => format!("{:+.3}", l - r),
        _ => "-".to_string(),
    }
}

fn fmt_diff_u(live: Option<u64>, restart: Option<u64>) -> String {
    match (live, restart) {
        (Some(l), Some(r)) => format!("{:+}", l as i64 - r as i64),
        _ => "-".to_string(),
    }
}

fn fmt_change(live: Option<f64>, restart: Option<f64>) -> String {
    match (live, restart) {
        (Some(l), Some(r)) if r != 0.0 => format!("{:+.2}%", (l / r - 1.0) * 100.0),
        _ => "-".to_string(),
    }
}

fn stamp() -> String {
    Command::new("date")
        .arg("+%Y%m%d-%H%M%S")
        .output()
        .ok()
        .and_then(|o| {
            if o.status.success() {
                Some(String::from_utf8_lossy(&o.stdout).trim().to_string())
            } else {
                None
            }
        })
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn save_report(results_dir: &Path, content: &str) -> Result<PathBuf> {
    fs::create_dir_all(results_dir)?;
    let path = results_dir.join(format!("report-{}.log", stamp()));
    fs::write(&path, content)?;
    Ok(path)
}

pub fn save_results(results_dir: &Path, result: &BenchmarkResult) -> Result<PathBuf> {
    fs::create_dir_all(results_dir)?;
    let path = results_dir.join(format!("results-{}.json", stamp()));
    fs::write(&path, serde_json::to_string_pretty(result)?)?;
    Ok(path)
}
