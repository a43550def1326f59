//! External process bridge — the fixed set of host programs this service
//! may invoke. Nothing outside this table is ever executed.
//!
//! Every invocation is bounded by an explicit timeout; a hung script must
//! not hang the request that triggered it. Non-zero exits carry stderr
//! back to the caller.

use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

const CHANGEBW: &str = "/usr/local/darkflows/bin/changebw.sh";
const UPDATE_SECONDARY_ROUTES: &str = "/usr/local/darkflows/bin/update_secondary_routes.sh";
const SYNC_ALL_SYSTEMS: &str = "/usr/local/darkflows/bin/sync_all_systems.sh";
const DNS_MANAGER: &str = "/usr/local/darkflows/bin/pihole-dns-manager.py";

const SCRIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured result of a finished host program.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

async fn run(program: &str, args: &[&str]) -> Result<ScriptOutput, String> {
    let started = std::time::Instant::now();
    let result = tokio::time::timeout(
        SCRIPT_TIMEOUT,
        Command::new(program).args(args).kill_on_drop(true).output(),
    )
    .await;

    let output = match result {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => return Err(format!("failed to run {}: {}", program, e)),
        Err(_) => {
            warn!("{} timed out after {:?}", program, SCRIPT_TIMEOUT);
            return Err(format!(
                "{} timed out after {} seconds",
                program,
                SCRIPT_TIMEOUT.as_secs()
            ));
        }
    };

    let out = ScriptOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    info!(
        "{} {:?} finished in {:?} (success: {})",
        program,
        args,
        started.elapsed(),
        out.success
    );
    Ok(out)
}

/// Run a program and fold a non-zero exit into the error, carrying stderr.
async fn run_checked(program: &str, args: &[&str]) -> Result<ScriptOutput, String> {
    let out = run(program, args).await?;
    if out.success {
        Ok(out)
    } else {
        Err(format!(
            "{} failed: {}",
            program,
            if out.stderr.trim().is_empty() {
                "(no stderr)"
            } else {
                out.stderr.trim()
            }
        ))
    }
}

/// Apply the bandwidth/CAKE settings from d_network.cfg to the qdiscs.
pub async fn apply_bandwidth() -> Result<ScriptOutput, String> {
    run_checked(CHANGEBW, &[]).await
}

/// Re-install the policy routes for the secondary WAN. The caller wants
/// stderr even on success — the script reports skipped routes there.
pub async fn apply_secondary_routes() -> Result<ScriptOutput, String> {
    run(UPDATE_SECONDARY_ROUTES, &[]).await
}

/// Push config changes out to the dependent subsystems (DHCP, DNS, QoS).
pub async fn sync_all_systems() -> Result<ScriptOutput, String> {
    run_checked(SYNC_ALL_SYSTEMS, &[]).await
}

/// Register a hostname↔IP mapping with the Pi-hole resolver.
pub async fn dns_add(hostname: &str, ip: &str) -> Result<ScriptOutput, String> {
    run_checked(DNS_MANAGER, &["add", hostname, ip]).await
}

/// Drop a hostname↔IP mapping from the Pi-hole resolver.
pub async fn dns_remove(hostname: &str, ip: &str) -> Result<ScriptOutput, String> {
    run_checked(DNS_MANAGER, &["remove", hostname, ip]).await
}
