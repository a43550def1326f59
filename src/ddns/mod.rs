//! Cloudflare dynamic DNS — keeps the WAN A record pointed at this
//! router. The zone/record/token keys live in d_network.cfg alongside the
//! rest of the WAN settings.

use serde_json::{json, Value};
use std::time::Duration;

use crate::config::NetworkConfig;

const PUBLIC_IP_URL: &str = "https://ifconfig.me/ip";
const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// The four keys required before any DDNS work happens.
#[derive(Debug, Clone, PartialEq)]
pub struct DdnsSettings {
    pub zone_id: String,
    pub record_id: String,
    pub api_token: String,
    pub record_name: String,
}

impl DdnsSettings {
    /// Extract the DDNS keys from the network config; `None` unless all
    /// four are present and non-empty.
    pub fn from_config(cfg: &NetworkConfig) -> Option<Self> {
        let take = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(DdnsSettings {
            zone_id: take(&cfg.zone_id)?,
            record_id: take(&cfg.record_id)?,
            api_token: take(&cfg.api_token)?,
            record_name: take(&cfg.record_name)?,
        })
    }
}

/// Detect this router's public IPv4 address (best effort, short timeout).
pub async fn public_ip(client: &reqwest::Client) -> Result<String, String> {
    let text = client
        .get(PUBLIC_IP_URL)
        .send()
        .await
        .map_err(|e| format!("public IP lookup failed: {}", e))?
        .text()
        .await
        .map_err(|e| format!("public IP lookup failed: {}", e))?;
    let ip = text.trim().to_string();
    crate::subnet::parse_ipv4(&ip)?;
    Ok(ip)
}

/// PUT the A record. Cloudflare reports failures inside a 200 body, so
/// the `success` flag is what counts.
pub async fn push_record(
    client: &reqwest::Client,
    settings: &DdnsSettings,
    ip: &str,
) -> Result<(), String> {
    let url = format!(
        "{}/zones/{}/dns_records/{}",
        CLOUDFLARE_API, settings.zone_id, settings.record_id
    );
    let body = json!({
        "type": "A",
        "name": settings.record_name,
        "content": ip,
        "ttl": 300,
        "proxied": false,
    });
    let resp: Value = client
        .put(&url)
        .bearer_auth(&settings.api_token)
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("Cloudflare request failed: {}", e))?
        .json()
        .await
        .map_err(|e| format!("Cloudflare response unparsable: {}", e))?;

    if resp["success"].as_bool() == Some(true) {
        Ok(())
    } else {
        Err(format!(
            "Cloudflare rejected the update: {}",
            resp["errors"].to_string()
        ))
    }
}

/// Load the DDNS settings from the network config file on disk.
pub fn load_settings() -> Result<Option<DdnsSettings>, String> {
    let text = std::fs::read_to_string(crate::config::NETWORK_CFG)
        .map_err(|e| format!("cannot read {}: {}", crate::config::NETWORK_CFG, e))?;
    Ok(DdnsSettings::from_config(&crate::config::parse(&text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_require_all_four_keys() {
        let mut cfg = NetworkConfig::default();
        assert!(DdnsSettings::from_config(&cfg).is_none());

        cfg.zone_id = Some("z1".into());
        cfg.record_id = Some("r1".into());
        cfg.api_token = Some("t1".into());
        assert!(DdnsSettings::from_config(&cfg).is_none());

        cfg.record_name = Some("router.example.com".into());
        let settings = DdnsSettings::from_config(&cfg).unwrap();
        assert_eq!(settings.record_name, "router.example.com");
    }

    #[test]
    fn blank_keys_do_not_count() {
        let mut cfg = NetworkConfig::default();
        cfg.zone_id = Some("z1".into());
        cfg.record_id = Some("r1".into());
        cfg.api_token = Some("  ".into());
        cfg.record_name = Some("router.example.com".into());
        assert!(DdnsSettings::from_config(&cfg).is_none());
    }
}
