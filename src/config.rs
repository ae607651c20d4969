// MOLT CONFIGURATION
// ONE IMMUTABLE OBJECT, CONSTRUCTED AT STARTUP AND PASSED BY REFERENCE.
// EVERY KEY IS REQUIRED: A SUBSTITUTED DEFAULT WOULD SILENTLY CHANGE WHAT
// IS BEING MEASURED.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

// THE TWO PROCESS BUILDS UNDER COMPARISON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Live,
    Restart,
}

impl Variant {
    pub fn label(self) -> &'static str {
        match self {
            Self::Live => "LIVE-UPDATE",
            Self::Restart => "RESTART",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    pub versions: Vec<String>,
    pub live: LiveVariant,
    pub restart: RestartVariant,
    // APPENDED TO BOTH SERVER INVOCATIONS (E.G. A SERVER CONFIG PATH)
    pub server_args: Vec<String>,
    pub workload: WorkloadConfig,
    pub concurrent: ConcurrentConfig,
    pub readiness: ReadinessPolicy,
    // DEADLINE FOR EVERY BLOCKING WAIT ON AN EXTERNAL PROCESS
    pub wait_timeout_secs: u64,
    pub logs: LogPaths,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiveVariant {
    // DRIVER BINARY THAT HOSTS THE UPDATABLE IMAGE
    pub launcher: PathBuf,
    pub root: PathBuf,
    // IMAGE AND TRIGGER FILENAMES UNDER root/<version>/
    pub image: String,
    pub update_script: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestartVariant {
    pub root: PathBuf,
    pub binary: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadConfig {
    pub script: PathBuf,
    pub serial_runs: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrentConfig {
    pub script: PathBuf,
    pub connections: usize,
    pub window_ms: u64,
}

// WHEN A FRESHLY LAUNCHED SERVER MAY RECEIVE WORK.
// settle-delay IS THE FIXED-SLEEP FALLBACK; poll-status WATCHES THE PID'S
// STATUS SNAPSHOT WITH A BOUNDED ATTEMPT COUNT.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum ReadinessPolicy {
    SettleDelay { settle_ms: u64 },
    PollStatus { interval_ms: u64, attempts: u32 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogPaths {
    // REDIRECTED CHILD STDOUT. APPEND-ONLY, NEVER PARSED BY THE ENGINE.
    pub output: PathBuf,
    pub timing_live: PathBuf,
    pub timing_restart: PathBuf,
    pub memory_live: PathBuf,
    pub memory_restart: PathBuf,
    pub results_dir: PathBuf,
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            BenchError::Configuration(format!("read {}: {}", path.display(), e))
        })?;
        let cfg: BenchConfig = serde_json::from_str(&raw).map_err(|e| {
            BenchError::Configuration(format!("parse {}: {}", path.display(), e))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.versions.is_empty() {
            return Err(BenchError::Configuration(
                "versions must be non-empty".to_string(),
            ));
        }
        for (i, v) in self.versions.iter().enumerate() {
            if self.versions[..i].contains(v) {
                return Err(BenchError::Configuration(format!(
                    "duplicate version identifier {:?}",
                    v
                )));
            }
        }
        if self.workload.serial_runs == 0 {
            return Err(BenchError::Configuration(
                "workload.serial_runs must be at least 1".to_string(),
            ));
        }
        if self.wait_timeout_secs == 0 {
            return Err(BenchError::Configuration(
                "wait_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    // PATH RESOLUTION. ONE PLACE, SHARED BY run AND check.

    pub fn live_version_dir(&self, version: &str) -> PathBuf {
        self.live.root.join(version)
    }

    pub fn live_image(&self, version: &str) -> PathBuf {
        self.live_version_dir(version).join(&self.live.image)
    }

    pub fn live_update_script(&self, version: &str) -> PathBuf {
        self.live_version_dir(version).join(&self.live.update_script)
    }

    pub fn restart_binary(&self, version: &str) -> PathBuf {
        self.restart.root.join(version).join(&self.restart.binary)
    }

    pub fn timing_log(&self, variant: Variant) -> &Path {
        match variant {
            Variant::Live => &self.logs.timing_live,
            Variant::Restart => &self.logs.timing_restart,
        }
    }

    pub fn memory_log(&self, variant: Variant) -> &Path {
        match variant {
            Variant::Live => &self.logs.memory_live,
            Variant::Restart => &self.logs.memory_restart,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_config() -> serde_json::Value {
        json!({
            "versions": ["v1", "v2"],
            "live": {
                "launcher": "/opt/driver",
                "root": "/opt/live",
                "image": "server.so",
                "update_script": "update.sh"
            },
            "restart": { "root": "/opt/plain", "binary": "server" },
            "server_args": ["server.conf"],
            "workload": { "script": "/opt/bench.sh", "serial_runs": 4 },
            "concurrent": { "script": "/opt/probe.sh", "connections": 8, "window_ms": 200 },
            "readiness": { "strategy": "settle-delay", "settle_ms": 100 },
            "wait_timeout_secs": 60,
            "logs": {
                "output": "/tmp/out.log",
                "timing_live": "/tmp/t_live.log",
                "timing_restart": "/tmp/t_restart.log",
                "memory_live": "/tmp/m_live.log",
                "memory_restart": "/tmp/m_restart.log",
                "results_dir": "/tmp/results"
            }
        })
    }

    #[test]
    fn full_config_parses() {
        let cfg: BenchConfig = serde_json::from_value(full_config()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.live_image("v1"), PathBuf::from("/opt/live/v1/server.so"));
        assert_eq!(
            cfg.live_update_script("v2"),
            PathBuf::from("/opt/live/v2/update.sh")
        );
        assert_eq!(cfg.restart_binary("v1"), PathBuf::from("/opt/plain/v1/server"));
    }

    #[test]
    fn missing_key_fails_fast() {
        // DROP A REQUIRED KEY: MUST FAIL, NOT DEFAULT
        let mut v = full_config();
        v.as_object_mut().unwrap().remove("concurrent");
        assert!(serde_json::from_value::<BenchConfig>(v).is_err());
    }

    #[test]
    fn unknown_key_rejected() {
        let mut v = full_config();
        v.as_object_mut()
            .unwrap()
            .insert("number_of_runs".to_string(), json!(3));
        assert!(serde_json::from_value::<BenchConfig>(v).is_err());
    }

    #[test]
    fn zero_serial_runs_rejected() {
        let mut v = full_config();
        v["workload"]["serial_runs"] = json!(0);
        let cfg: BenchConfig = serde_json::from_value(v).unwrap();
        assert!(matches!(cfg.validate(), Err(BenchError::Configuration(_))));
    }

    #[test]
    fn poll_status_readiness_parses() {
        let mut v = full_config();
        v["readiness"] = json!({ "strategy": "poll-status", "interval_ms": 25, "attempts": 40 });
        let cfg: BenchConfig = serde_json::from_value(v).unwrap();
        assert!(matches!(
            cfg.readiness,
            ReadinessPolicy::PollStatus { interval_ms: 25, attempts: 40 }
        ));
    }

    #[test]
    fn variant_labels() {
        assert_eq!(Variant::Live.label(), "LIVE-UPDATE");
        assert_eq!(Variant::Restart.label(), "RESTART");
    }
}
