//! Host status — relays of the daemon-written snapshots in /dev/shm and a
//! locally collected sysinfo snapshot for the dashboard cards.
//!
//! The /dev/shm files are owned by external daemons and re-read on every
//! request; this process never caches or rewrites them.

use serde::Serialize;
use serde_json::Value;
use sysinfo::{Networks, System};

/// Traffic/QoS snapshot written by the DarkFlows status daemon.
pub const STATUS_FILE: &str = "/dev/shm/status.json";
/// WAN reachability snapshot written by the ping monitor.
pub const PING_STATUS_FILE: &str = "/dev/shm/ping_status.json";

/// Read and parse an externally-written JSON snapshot.
pub fn read_snapshot(path: &str) -> Result<Value, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path, e))?;
    serde_json::from_str(&text).map_err(|e| format!("cannot parse {}: {}", path, e))
}

/// Locally collected host metrics for the system card.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub uptime_secs: u64,
    pub kernel: String,
    pub cpu_count: usize,
    pub cpu_usage_percent: f32,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub load_avg_one: f64,
    pub load_avg_five: f64,
    pub load_avg_fifteen: f64,
    pub interfaces: Vec<InterfaceCounters>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceCounters {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Collector kept in app state so CPU usage deltas have a baseline.
pub struct SystemMonitor {
    sys: System,
    networks: Networks,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();
        SystemMonitor {
            sys,
            networks: Networks::new_with_refreshed_list(),
        }
    }

    pub fn collect(&mut self) -> SystemInfo {
        self.sys.refresh_all();
        self.networks.refresh();

        let cpu_count = self.sys.cpus().len();
        let cpu_usage: f32 = self
            .sys
            .cpus()
            .iter()
            .map(|c| c.cpu_usage())
            .sum::<f32>()
            / cpu_count.max(1) as f32;

        let interfaces = self
            .networks
            .iter()
            .filter(|(name, _)| *name != "lo")
            .map(|(name, data)| InterfaceCounters {
                name: name.clone(),
                rx_bytes: data.total_received(),
                tx_bytes: data.total_transmitted(),
            })
            .collect();

        let load = System::load_average();

        SystemInfo {
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            uptime_secs: System::uptime(),
            kernel: System::kernel_version().unwrap_or_default(),
            cpu_count,
            cpu_usage_percent: cpu_usage,
            memory_total_bytes: self.sys.total_memory(),
            memory_used_bytes: self.sys.used_memory(),
            load_avg_one: load.one,
            load_avg_five: load.five,
            load_avg_fifteen: load.fifteen,
            interfaces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn snapshot_relay_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"wan":{{"latency_ms":12.5}}}}"#).unwrap();
        let value = read_snapshot(file.path().to_str().unwrap()).unwrap();
        assert_eq!(value.pointer("/wan/latency_ms"), Some(&serde_json::json!(12.5)));
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        assert!(read_snapshot("/nonexistent/status.json").is_err());
    }

    #[test]
    fn malformed_snapshot_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(read_snapshot(file.path().to_str().unwrap()).is_err());
    }
}
