//! Speed test bridges — spawn the measurement binaries and relay their
//! progress to the browser as Server-Sent Events.
//!
//! Two backends exist on DarkFlows hosts: the vendored `SpeedTest` binary
//! with line-oriented progress output, parsed incrementally here, and the
//! Ookla `speedtest` CLI which emits one JSON document. Both children are
//! killed when the SSE consumer goes away and both run under a hard
//! timeout — an orphaned measurement saturates the uplink for nothing.

use serde::Serialize;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::warn;

/// Vendored line-oriented speed test binary.
pub const VENDOR_BIN: &str = "/usr/local/bin/SpeedTest";
/// Ookla CLI.
pub const OOKLA_BIN: &str = "speedtest";

const TEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(180);
const EVENT_BUFFER: usize = 32;

/// One parsed progress event, serialized into an SSE `data:` frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpeedtestEvent {
    Location { ip: String, isp: String },
    Server { name: String },
    Ping { ms: f64 },
    Jitter { ms: f64 },
    DownloadProgress { mbps: f64 },
    Download { mbps: f64 },
    UploadProgress { mbps: f64 },
    Upload { mbps: f64 },
    /// Final document from the Ookla CLI, passed through as-is.
    Summary { result: serde_json::Value },
    Error { message: String },
    Done,
}

/// Render an event as an SSE frame.
pub fn sse_frame(event: &SpeedtestEvent) -> String {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("data: {}\n\n", payload)
}

fn parse_ms(rest: &str) -> Option<f64> {
    rest.trim().trim_end_matches("ms").trim().parse().ok()
}

fn parse_mbps(rest: &str) -> Option<f64> {
    rest.trim().trim_end_matches("Mbit/s").trim().parse().ok()
}

/// Map one stdout line of the vendor binary to an event. Unrecognized
/// lines (phase banners, blank lines) produce nothing.
pub fn parse_line(line: &str) -> Option<SpeedtestEvent> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("IP: ") {
        // IP: 203.0.113.9 ( ExampleNet )
        let (ip, isp) = match rest.split_once('(') {
            Some((ip, isp)) => (ip.trim(), isp.trim_end_matches(')').trim()),
            None => (rest.trim(), ""),
        };
        return Some(SpeedtestEvent::Location {
            ip: ip.to_string(),
            isp: isp.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("Hosted by ") {
        // Hosted by Example ISP (Springfield) [12.34 km]
        let name = rest.split(" [").next().unwrap_or(rest).trim();
        return Some(SpeedtestEvent::Server {
            name: name.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("Ping: ") {
        return parse_ms(rest).map(|ms| SpeedtestEvent::Ping { ms });
    }
    if let Some(rest) = line.strip_prefix("Jitter: ") {
        return parse_ms(rest).map(|ms| SpeedtestEvent::Jitter { ms });
    }
    if let Some(rest) = line.strip_prefix("Download progress: ") {
        return parse_mbps(rest).map(|mbps| SpeedtestEvent::DownloadProgress { mbps });
    }
    if let Some(rest) = line.strip_prefix("Upload progress: ") {
        return parse_mbps(rest).map(|mbps| SpeedtestEvent::UploadProgress { mbps });
    }
    if let Some(rest) = line.strip_prefix("Download: ") {
        return parse_mbps(rest).map(|mbps| SpeedtestEvent::Download { mbps });
    }
    if let Some(rest) = line.strip_prefix("Upload: ") {
        return parse_mbps(rest).map(|mbps| SpeedtestEvent::Upload { mbps });
    }
    None
}

/// Spawn the vendor binary and stream parsed events. Dropping the
/// receiver kills the child; so does the hard timeout.
pub fn spawn_vendor_events() -> mpsc::Receiver<SpeedtestEvent> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        let mut child = match Command::new(VENDOR_BIN)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(SpeedtestEvent::Error {
                        message: format!("cannot start {}: {}", VENDOR_BIN, e),
                    })
                    .await;
                return;
            }
        };
        let stdout = match child.stdout.take() {
            Some(s) => s,
            None => {
                let _ = child.kill().await;
                return;
            }
        };
        let mut lines = BufReader::new(stdout).lines();
        let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;

        loop {
            let line = tokio::select! {
                _ = tx.closed() => {
                    // browser went away — do not leave the test running
                    let _ = child.kill().await;
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("speed test timed out, killing {}", VENDOR_BIN);
                    let _ = child.kill().await;
                    let _ = tx
                        .send(SpeedtestEvent::Error { message: "speed test timed out".into() })
                        .await;
                    return;
                }
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if let Some(event) = parse_line(&line) {
                        if tx.send(event).await.is_err() {
                            let _ = child.kill().await;
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = child.kill().await;
                    let _ = tx
                        .send(SpeedtestEvent::Error {
                            message: format!("read error: {}", e),
                        })
                        .await;
                    return;
                }
            }
        }
        let _ = child.wait().await;
        let _ = tx.send(SpeedtestEvent::Done).await;
    });
    rx
}

/// Run the Ookla CLI and deliver its JSON document as a single event.
pub fn spawn_cli_result() -> mpsc::Receiver<SpeedtestEvent> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        let mut cmd = Command::new(OOKLA_BIN);
        cmd.args(["--accept-license", "--format=json"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let event = tokio::select! {
            // dropping the output future on disconnect kills the child
            _ = tx.closed() => return,
            result = tokio::time::timeout(TEST_TIMEOUT, cmd.output()) => match result {
                Err(_) => SpeedtestEvent::Error { message: "speed test timed out".into() },
                Ok(Err(e)) => SpeedtestEvent::Error {
                    message: format!("cannot start {}: {}", OOKLA_BIN, e),
                },
                Ok(Ok(out)) if !out.status.success() => SpeedtestEvent::Error {
                    message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
                },
                Ok(Ok(out)) => match serde_json::from_slice(&out.stdout) {
                    Ok(result) => SpeedtestEvent::Summary { result },
                    Err(e) => SpeedtestEvent::Error {
                        message: format!("unparsable speedtest output: {}", e),
                    },
                },
            },
        };
        let _ = tx.send(event).await;
        let _ = tx.send(SpeedtestEvent::Done).await;
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_location_line() {
        assert_eq!(
            parse_line("IP: 203.0.113.9 ( ExampleNet )"),
            Some(SpeedtestEvent::Location {
                ip: "203.0.113.9".into(),
                isp: "ExampleNet".into()
            })
        );
    }

    #[test]
    fn parses_server_line() {
        assert_eq!(
            parse_line("Hosted by Example ISP (Springfield) [12.34 km]"),
            Some(SpeedtestEvent::Server {
                name: "Example ISP (Springfield)".into()
            })
        );
    }

    #[test]
    fn parses_latency_lines() {
        assert_eq!(
            parse_line("Ping: 8.41 ms"),
            Some(SpeedtestEvent::Ping { ms: 8.41 })
        );
        assert_eq!(
            parse_line("Jitter: 1.2 ms"),
            Some(SpeedtestEvent::Jitter { ms: 1.2 })
        );
    }

    #[test]
    fn parses_throughput_lines() {
        assert_eq!(
            parse_line("Download progress: 45.10 Mbit/s"),
            Some(SpeedtestEvent::DownloadProgress { mbps: 45.10 })
        );
        assert_eq!(
            parse_line("Download: 94.21 Mbit/s"),
            Some(SpeedtestEvent::Download { mbps: 94.21 })
        );
        assert_eq!(
            parse_line("Upload: 10.33 Mbit/s"),
            Some(SpeedtestEvent::Upload { mbps: 10.33 })
        );
    }

    #[test]
    fn ignores_banner_lines() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("Determining line type..."), None);
        assert_eq!(parse_line("Testing download speed"), None);
    }

    #[test]
    fn sse_frame_shape() {
        let frame = sse_frame(&SpeedtestEvent::Ping { ms: 8.41 });
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains("\"type\":\"ping\""));
    }
}
