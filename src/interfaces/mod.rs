//! Host network interfaces — live view via `ip -j addr show`, plus the
//! static address/netmask editor for /etc/network/interfaces.
//!
//! The live view feeds the dashboard's interface cards and the VLAN
//! conflict check. Virtual interfaces (bridges, container veths, overlay
//! tunnels) own address space that is not real LAN space, so they are
//! flagged here and exempted from conflict checks.

use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::warn;

use crate::subnet::Subnet;

/// Debian-style interfaces file with the LAN static stanza.
pub const INTERFACES_FILE: &str = "/etc/network/interfaces";

/// One host network interface as reported by iproute2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub mac: String,
    pub state: String, // up, down, unknown
    pub mtu: u32,
    pub addresses: Vec<InterfaceAddress>,
    pub vlan_id: Option<u32>,
    pub vlan_parent: Option<String>,
    /// Set for interfaces whose address space is not physical LAN space
    /// (bridge, docker, veth, tailscale, wireguard, loopback, tun).
    pub virtual_kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub address: String, // e.g. 192.168.1.10
    pub prefix: u32,     // e.g. 24
    pub family: String,  // inet or inet6
}

/// Classify an interface whose addresses must not take part in VLAN
/// conflict checks. Name prefixes cover hosts where iproute2 reports no
/// linkinfo kind.
fn classify_virtual(name: &str, info_kind: Option<&str>) -> Option<String> {
    match info_kind {
        Some("bridge") => return Some("bridge".to_string()),
        Some("veth") => return Some("veth".to_string()),
        Some("wireguard") => return Some("wireguard".to_string()),
        Some("tun") => return Some("tun".to_string()),
        _ => {}
    }
    let prefixes = [
        ("lo", "loopback"),
        ("br", "bridge"),
        ("docker", "docker"),
        ("veth", "veth"),
        ("tailscale", "tailscale"),
        ("wg", "wireguard"),
    ];
    for (prefix, kind) in prefixes {
        if name == prefix || name.starts_with(prefix) {
            return Some(kind.to_string());
        }
    }
    None
}

/// List host interfaces with their addresses via `ip -j addr show`.
pub fn list_interfaces() -> Vec<NetworkInterface> {
    let output = match Command::new("ip").args(["-j", "addr", "show"]).output() {
        Ok(out) if out.status.success() => out,
        _ => {
            warn!("failed to run `ip -j addr show`");
            return Vec::new();
        }
    };

    let entries: Vec<serde_json::Value> =
        match serde_json::from_slice(&output.stdout) {
            Ok(v) => v,
            Err(e) => {
                warn!("cannot parse `ip -j addr show` output: {}", e);
                return Vec::new();
            }
        };

    entries.iter().map(parse_ip_entry).collect()
}

fn parse_ip_entry(entry: &serde_json::Value) -> NetworkInterface {
    let name = entry["ifname"].as_str().unwrap_or("").to_string();
    let info_kind = entry
        .pointer("/linkinfo/info_kind")
        .and_then(serde_json::Value::as_str);

    // 802.1Q VLANs report their id and parent link in linkinfo; older
    // kernels only show the eth0.100 naming convention.
    let (vlan_id, vlan_parent) = if info_kind == Some("vlan") {
        (
            entry
                .pointer("/linkinfo/info_data/id")
                .and_then(serde_json::Value::as_u64)
                .map(|v| v as u32),
            entry["link"].as_str().map(|s| s.to_string()),
        )
    } else if let Some((parent, id)) = name.rsplit_once('.') {
        match id.parse::<u32>() {
            Ok(id) => (Some(id), Some(parent.to_string())),
            Err(_) => (None, None),
        }
    } else {
        (None, None)
    };

    let addresses = entry["addr_info"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|a| {
                    let local = a["local"].as_str()?;
                    Some(InterfaceAddress {
                        address: local.to_string(),
                        prefix: a["prefixlen"].as_u64().unwrap_or(0) as u32,
                        family: a["family"].as_str().unwrap_or("").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    NetworkInterface {
        virtual_kind: classify_virtual(&name, info_kind),
        mac: entry["address"].as_str().unwrap_or("").to_string(),
        state: entry["operstate"]
            .as_str()
            .unwrap_or("unknown")
            .to_lowercase(),
        mtu: entry["mtu"].as_u64().unwrap_or(1500) as u32,
        name,
        addresses,
        vlan_id,
        vlan_parent,
    }
}

/// Subnets owned by non-virtual interfaces, as `(interface name, subnet)`
/// pairs for the VLAN conflict check. VLAN sub-interfaces are skipped —
/// their ranges are tracked in the VLAN store and would otherwise make a
/// VLAN conflict with itself.
pub fn conflict_subnets(interfaces: &[NetworkInterface]) -> Vec<(String, Subnet)> {
    let mut out = Vec::new();
    for iface in interfaces {
        if iface.virtual_kind.is_some() || iface.vlan_id.is_some() {
            continue;
        }
        for addr in &iface.addresses {
            if addr.family != "inet" || addr.prefix >= 32 {
                continue;
            }
            match Subnet::parse_cidr(&format!("{}/{}", addr.address, addr.prefix)) {
                Ok(subnet) => out.push((iface.name.clone(), subnet)),
                Err(e) => warn!("skipping address on {}: {}", iface.name, e),
            }
        }
    }
    out
}

// ─── /etc/network/interfaces static stanza ───

/// The address/netmask pair of one `iface <name> inet static` stanza.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticStanza {
    pub address: String,
    pub netmask: String,
}

fn starts_new_stanza(trimmed: &str) -> bool {
    trimmed.starts_with("iface ")
        || trimmed.starts_with("auto ")
        || trimmed.starts_with("allow-")
        || trimmed.starts_with("mapping ")
        || trimmed.starts_with("source")
}

/// Line span `[start, end)` of the `iface <name> inet static` stanza.
fn stanza_bounds(lines: &[&str], iface: &str) -> Option<(usize, usize)> {
    let mut start = None;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if let Some(s) = start {
            if starts_new_stanza(trimmed) {
                return Some((s, i));
            }
        } else {
            let mut words = trimmed.split_whitespace();
            if words.next() == Some("iface")
                && words.next() == Some(iface)
                && words.next() == Some("inet")
                && words.next() == Some("static")
            {
                start = Some(i);
            }
        }
    }
    start.map(|s| (s, lines.len()))
}

fn stanza_field<'a>(lines: &[&'a str], bounds: (usize, usize), field: &str) -> Option<&'a str> {
    lines[bounds.0 + 1..bounds.1].iter().find_map(|line| {
        let mut words = line.trim().split_whitespace();
        if words.next() == Some(field) {
            words.next()
        } else {
            None
        }
    })
}

/// Read the static address/netmask of a stanza, `None` when the stanza or
/// either field is missing.
pub fn static_stanza(text: &str, iface: &str) -> Option<StaticStanza> {
    let lines: Vec<&str> = text.split('\n').collect();
    let bounds = stanza_bounds(&lines, iface)?;
    Some(StaticStanza {
        address: stanza_field(&lines, bounds, "address")?.to_string(),
        netmask: stanza_field(&lines, bounds, "netmask")?.to_string(),
    })
}

/// Rewrite the address/netmask pair inside one stanza, leaving every other
/// line byte-identical. A field the stanza does not carry yet is inserted
/// directly below the `iface` header.
pub fn set_static_stanza(
    text: &str,
    iface: &str,
    stanza: &StaticStanza,
) -> Result<String, String> {
    let lines: Vec<&str> = text.split('\n').collect();
    let (start, end) = stanza_bounds(&lines, iface)
        .ok_or_else(|| format!("no static stanza for interface {}", iface))?;

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    let mut missing: Vec<(&str, &str)> = Vec::new();

    for (field, value) in [
        ("address", stanza.address.as_str()),
        ("netmask", stanza.netmask.as_str()),
    ] {
        let found = lines[start + 1..end].iter().position(|line| {
            line.trim().split_whitespace().next() == Some(field)
        });
        match found {
            Some(offset) => {
                let i = start + 1 + offset;
                let indent: String = lines[i]
                    .chars()
                    .take_while(|c| c.is_whitespace())
                    .collect();
                out[i] = format!("{}{} {}", indent, field, value);
            }
            None => missing.push((field, value)),
        }
    }
    // insert in declared order so address precedes netmask
    for (field, value) in missing.into_iter().rev() {
        out.insert(start + 1, format!("    {} {}", field, value));
    }

    Ok(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# The loopback network interface
auto lo
iface lo inet loopback

auto eth2
iface eth2 inet static
    address 192.168.1.1
    netmask 255.255.255.0

auto eth0
iface eth0 inet dhcp
";

    #[test]
    fn reads_static_stanza() {
        let stanza = static_stanza(SAMPLE, "eth2").unwrap();
        assert_eq!(stanza.address, "192.168.1.1");
        assert_eq!(stanza.netmask, "255.255.255.0");
        assert!(static_stanza(SAMPLE, "eth0").is_none()); // dhcp, not static
        assert!(static_stanza(SAMPLE, "eth9").is_none());
    }

    #[test]
    fn rewrites_only_the_target_stanza() {
        let updated = set_static_stanza(
            SAMPLE,
            "eth2",
            &StaticStanza {
                address: "192.168.5.1".into(),
                netmask: "255.255.255.0".into(),
            },
        )
        .unwrap();
        assert!(updated.contains("    address 192.168.5.1"));
        // untouched lines stay byte-identical
        assert!(updated.contains("# The loopback network interface"));
        assert!(updated.contains("iface eth0 inet dhcp"));
        assert!(updated.contains("    netmask 255.255.255.0"));
        assert!(!updated.contains("192.168.1.1"));
    }

    #[test]
    fn inserts_missing_fields_below_header() {
        let text = "iface eth2 inet static\n    gateway 192.168.1.254\n";
        let updated = set_static_stanza(
            text,
            "eth2",
            &StaticStanza {
                address: "192.168.1.1".into(),
                netmask: "255.255.255.0".into(),
            },
        )
        .unwrap();
        let lines: Vec<&str> = updated.split('\n').collect();
        assert_eq!(lines[1], "    address 192.168.1.1");
        assert_eq!(lines[2], "    netmask 255.255.255.0");
        assert_eq!(lines[3], "    gateway 192.168.1.254");
    }

    #[test]
    fn missing_stanza_is_an_error() {
        let err = set_static_stanza(
            "auto lo\niface lo inet loopback\n",
            "eth2",
            &StaticStanza {
                address: "1.2.3.4".into(),
                netmask: "255.255.255.0".into(),
            },
        )
        .unwrap_err();
        assert!(err.contains("eth2"));
    }

    #[test]
    fn virtual_classification() {
        assert_eq!(classify_virtual("lo", None).as_deref(), Some("loopback"));
        assert_eq!(classify_virtual("br0", None).as_deref(), Some("bridge"));
        assert_eq!(classify_virtual("docker0", None).as_deref(), Some("docker"));
        assert_eq!(
            classify_virtual("tailscale0", None).as_deref(),
            Some("tailscale")
        );
        assert_eq!(classify_virtual("wg0", None).as_deref(), Some("wireguard"));
        assert_eq!(
            classify_virtual("eth0", Some("bridge")).as_deref(),
            Some("bridge")
        );
        assert!(classify_virtual("eth0", None).is_none());
        assert!(classify_virtual("enp3s0", Some("vlan")).is_none());
    }

    #[test]
    fn conflict_subnets_skip_virtual_and_v6() {
        let interfaces = vec![
            NetworkInterface {
                name: "eth2".into(),
                mac: String::new(),
                state: "up".into(),
                mtu: 1500,
                addresses: vec![
                    InterfaceAddress {
                        address: "192.168.1.1".into(),
                        prefix: 24,
                        family: "inet".into(),
                    },
                    InterfaceAddress {
                        address: "fe80::1".into(),
                        prefix: 64,
                        family: "inet6".into(),
                    },
                ],
                vlan_id: None,
                vlan_parent: None,
                virtual_kind: None,
            },
            NetworkInterface {
                name: "docker0".into(),
                mac: String::new(),
                state: "up".into(),
                mtu: 1500,
                addresses: vec![InterfaceAddress {
                    address: "172.17.0.1".into(),
                    prefix: 16,
                    family: "inet".into(),
                }],
                vlan_id: None,
                vlan_parent: None,
                virtual_kind: Some("docker".into()),
            },
            NetworkInterface {
                name: "eth2.10".into(),
                mac: String::new(),
                state: "up".into(),
                mtu: 1500,
                addresses: vec![InterfaceAddress {
                    address: "192.168.10.1".into(),
                    prefix: 24,
                    family: "inet".into(),
                }],
                vlan_id: Some(10),
                vlan_parent: Some("eth2".into()),
                virtual_kind: None,
            },
        ];
        let subnets = conflict_subnets(&interfaces);
        assert_eq!(subnets.len(), 1);
        assert_eq!(subnets[0].0, "eth2");
        assert_eq!(subnets[0].1.to_cidr(), "192.168.1.0/24");
    }
}
