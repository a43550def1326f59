//! VLAN definitions — persistence and conflict validation.
//!
//! A VLAN here is a named subnet + DHCP + bandwidth policy bound to a
//! physical interface, persisted as camelCase JSON for the dashboard in
//! /etc/darkflows/vlans.json. Validation runs on create/update, not on
//! load: an operator hand-editing the file is on their own.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dhcp::Reservation;
use crate::subnet::{self, IpRange, Subnet};

/// VLAN definition store.
pub const VLANS_FILE: &str = "/etc/darkflows/vlans.json";

fn default_lease_time() -> u32 {
    86400
}

/// Per-VLAN DHCP policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlanDhcp {
    pub enabled: bool,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default = "default_lease_time")]
    pub lease_time: u32,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

impl Default for VlanDhcp {
    fn default() -> Self {
        VlanDhcp {
            enabled: false,
            dns_servers: Vec::new(),
            lease_time: default_lease_time(),
            reservations: Vec::new(),
        }
    }
}

/// Allocatable address range of a VLAN, inclusive dotted-quad endpoints.
/// An empty range on create is filled in with the subnet's default pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlanRange {
    pub start: String,
    pub end: String,
}

/// One VLAN definition as stored on disk and exchanged with the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlanConfig {
    pub id: u16,
    pub name: String,
    /// Physical interface the 802.1Q tag rides on.
    pub network_card: String,
    /// CIDR, e.g. `192.168.5.0/24`.
    pub subnet: String,
    pub gateway: String,
    #[serde(default)]
    pub ip_range: VlanRange,
    #[serde(default)]
    pub dhcp: VlanDhcp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_bandwidth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_bandwidth: Option<String>,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub modified: String,
}

/// A field-attributed validation failure, so the UI can highlight the
/// offending input instead of showing one generic banner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a candidate VLAN against its siblings, the address space owned
/// by physical interfaces, and the system DHCP pools. A sibling with the
/// candidate's own id is skipped, so updates do not conflict with
/// themselves.
pub fn validate(
    candidate: &VlanConfig,
    siblings: &[VlanConfig],
    interface_subnets: &[(String, Subnet)],
    system_pools: &[(String, IpRange)],
) -> Result<(), ValidationError> {
    if candidate.id < 1 || candidate.id > 4094 {
        return Err(ValidationError::new(
            "id",
            "VLAN id must be between 1 and 4094",
        ));
    }
    if candidate.name.trim().is_empty() {
        return Err(ValidationError::new("name", "name is required"));
    }

    let net = Subnet::parse_cidr(&candidate.subnet)
        .map_err(|e| ValidationError::new("subnet", e))?;

    let gateway = subnet::parse_ipv4(&candidate.gateway)
        .map_err(|e| ValidationError::new("gateway", e))?;
    if !net.contains(gateway) {
        return Err(ValidationError::new(
            "gateway",
            format!(
                "gateway {} is outside subnet {}",
                candidate.gateway, candidate.subnet
            ),
        ));
    }

    let start = subnet::parse_ipv4(&candidate.ip_range.start)
        .map_err(|e| ValidationError::new("ipRange", e))?;
    let end = subnet::parse_ipv4(&candidate.ip_range.end)
        .map_err(|e| ValidationError::new("ipRange", e))?;
    if start >= end {
        return Err(ValidationError::new(
            "ipRange",
            "range start must be strictly below range end",
        ));
    }
    let range = IpRange::new(start, end).map_err(|e| ValidationError::new("ipRange", e))?;

    if !net.contains_range(&range) {
        return Err(ValidationError::new(
            "ipRange",
            format!(
                "range {}-{} is not inside subnet {}",
                candidate.ip_range.start, candidate.ip_range.end, candidate.subnet
            ),
        ));
    }
    if range.contains(gateway) {
        return Err(ValidationError::new(
            "ipRange",
            format!("range includes the gateway address {}", candidate.gateway),
        ));
    }

    for sibling in siblings {
        if sibling.id == candidate.id {
            continue;
        }
        let other = match IpRange::parse(&sibling.ip_range.start, &sibling.ip_range.end) {
            Ok(r) => r,
            Err(e) => {
                warn!("VLAN {} has an unparsable range: {}", sibling.id, e);
                continue;
            }
        };
        if range.overlaps(&other) {
            return Err(ValidationError::new(
                "ipRange",
                format!(
                    "range overlaps VLAN {} ({}) {}-{}",
                    sibling.id, sibling.name, sibling.ip_range.start, sibling.ip_range.end
                ),
            ));
        }
    }

    for (iface, iface_net) in interface_subnets {
        if range.overlaps(&iface_net.full_range()) {
            return Err(ValidationError::new(
                "ipRange",
                format!(
                    "range overlaps the {} network on interface {}",
                    iface_net.to_cidr(),
                    iface
                ),
            ));
        }
    }

    for (label, pool) in system_pools {
        if range.overlaps(pool) {
            return Err(ValidationError::new(
                "ipRange",
                format!("range overlaps the system DHCP pool {}", label),
            ));
        }
    }

    Ok(())
}

// ─── Persistence ───

/// Load the VLAN list. A missing file is an empty list; an unreadable or
/// unparsable one is an error — silently replacing it would drop VLANs.
pub fn load(path: &str) -> Result<Vec<VlanConfig>, String> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(format!("cannot read {}: {}", path, e)),
    };
    serde_json::from_str(&text).map_err(|e| format!("cannot parse {}: {}", path, e))
}

pub fn save(path: &str, vlans: &[VlanConfig]) -> Result<(), String> {
    let text = serde_json::to_string_pretty(vlans)
        .map_err(|e| format!("cannot serialize VLANs: {}", e))?;
    crate::fslock::write_atomic(path, &text)
}

/// Append a new VLAN; duplicate ids are rejected before validation cost.
pub fn insert(vlans: &mut Vec<VlanConfig>, vlan: VlanConfig) -> Result<(), ValidationError> {
    if vlans.iter().any(|v| v.id == vlan.id) {
        return Err(ValidationError::new(
            "id",
            format!("VLAN {} already exists", vlan.id),
        ));
    }
    vlans.push(vlan);
    Ok(())
}

/// Replace the VLAN with `id`, keeping its original `created` stamp.
/// Returns false when no such VLAN exists.
pub fn replace(vlans: &mut [VlanConfig], id: u16, mut vlan: VlanConfig) -> bool {
    match vlans.iter_mut().find(|v| v.id == id) {
        Some(existing) => {
            vlan.id = id;
            vlan.created = existing.created.clone();
            *existing = vlan;
            true
        }
        None => false,
    }
}

/// Remove the VLAN with `id`; returns false when absent.
pub fn remove(vlans: &mut Vec<VlanConfig>, id: u16) -> bool {
    let before = vlans.len();
    vlans.retain(|v| v.id != id);
    vlans.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlan(id: u16, start: &str, end: &str) -> VlanConfig {
        VlanConfig {
            id,
            name: format!("vlan{}", id),
            network_card: "eth2".into(),
            subnet: "192.168.5.0/24".into(),
            gateway: "192.168.5.1".into(),
            ip_range: VlanRange {
                start: start.into(),
                end: end.into(),
            },
            dhcp: VlanDhcp::default(),
            egress_bandwidth: None,
            ingress_bandwidth: None,
            created: String::new(),
            modified: String::new(),
        }
    }

    #[test]
    fn clean_vlan_validates() {
        let candidate = vlan(10, "192.168.5.10", "192.168.5.100");
        assert_eq!(validate(&candidate, &[], &[], &[]), Ok(()));
    }

    #[test]
    fn id_out_of_range_is_field_attributed() {
        let mut candidate = vlan(10, "192.168.5.10", "192.168.5.100");
        candidate.id = 4095;
        let err = validate(&candidate, &[], &[], &[]).unwrap_err();
        assert_eq!(err.field, "id");
    }

    #[test]
    fn gateway_outside_subnet_fails() {
        let mut candidate = vlan(10, "192.168.5.10", "192.168.5.100");
        candidate.gateway = "192.168.6.1".into();
        let err = validate(&candidate, &[], &[], &[]).unwrap_err();
        assert_eq!(err.field, "gateway");
    }

    #[test]
    fn range_including_gateway_fails() {
        let candidate = vlan(10, "192.168.5.1", "192.168.5.50");
        let err = validate(&candidate, &[], &[], &[]).unwrap_err();
        assert_eq!(err.field, "ipRange");
        assert!(err.message.contains("gateway"), "{}", err.message);
    }

    #[test]
    fn inverted_range_fails() {
        let candidate = vlan(10, "192.168.5.100", "192.168.5.10");
        let err = validate(&candidate, &[], &[], &[]).unwrap_err();
        assert_eq!(err.field, "ipRange");
        assert!(err.message.contains("strictly below"), "{}", err.message);
    }

    #[test]
    fn range_escaping_subnet_fails() {
        let mut candidate = vlan(10, "192.168.5.10", "192.168.6.100");
        candidate.ip_range.end = "192.168.6.100".into();
        let err = validate(&candidate, &[], &[], &[]).unwrap_err();
        assert_eq!(err.field, "ipRange");
        assert!(err.message.contains("not inside"), "{}", err.message);
    }

    #[test]
    fn sibling_overlap_names_the_sibling() {
        let candidate = vlan(10, "192.168.5.10", "192.168.5.100");
        let sibling = vlan(20, "192.168.5.50", "192.168.5.150");
        let err = validate(&candidate, &[sibling], &[], &[]).unwrap_err();
        assert_eq!(err.field, "ipRange");
        assert!(err.message.contains("VLAN 20"), "{}", err.message);
        assert!(err.message.contains("vlan20"), "{}", err.message);
    }

    #[test]
    fn own_id_is_skipped_on_update() {
        let candidate = vlan(10, "192.168.5.10", "192.168.5.100");
        let old_self = vlan(10, "192.168.5.10", "192.168.5.200");
        assert_eq!(validate(&candidate, &[old_self], &[], &[]), Ok(()));
    }

    #[test]
    fn interface_overlap_names_the_interface() {
        let mut candidate = vlan(10, "192.168.1.10", "192.168.1.100");
        candidate.subnet = "192.168.1.0/24".into();
        candidate.gateway = "192.168.1.1".into();
        let lan = ("eth2".to_string(), Subnet::parse_cidr("192.168.1.0/24").unwrap());
        let err = validate(&candidate, &[], &[lan], &[]).unwrap_err();
        assert_eq!(err.field, "ipRange");
        assert!(err.message.contains("eth2"), "{}", err.message);
    }

    #[test]
    fn pool_overlap_names_the_pool() {
        let candidate = vlan(10, "192.168.5.10", "192.168.5.100");
        let pool = (
            "192.168.5.50 - 192.168.5.60".to_string(),
            IpRange::parse("192.168.5.50", "192.168.5.60").unwrap(),
        );
        let err = validate(&candidate, &[], &[], &[pool]).unwrap_err();
        assert_eq!(err.field, "ipRange");
        assert!(err.message.contains("192.168.5.50 - 192.168.5.60"), "{}", err.message);
    }

    #[test]
    fn store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vlans.json");
        let path = path.to_str().unwrap();

        assert!(load(path).unwrap().is_empty());

        let mut vlans = Vec::new();
        insert(&mut vlans, vlan(10, "192.168.5.10", "192.168.5.100")).unwrap();
        assert!(insert(&mut vlans, vlan(10, "192.168.5.10", "192.168.5.100")).is_err());
        save(path, &vlans).unwrap();

        let mut loaded = load(path).unwrap();
        assert_eq!(loaded, vlans);

        assert!(replace(&mut loaded, 10, vlan(10, "192.168.5.20", "192.168.5.90")));
        assert!(!replace(&mut loaded, 99, vlan(99, "192.168.5.20", "192.168.5.90")));
        assert_eq!(loaded[0].ip_range.start, "192.168.5.20");

        assert!(remove(&mut loaded, 10));
        assert!(!remove(&mut loaded, 10));
    }
}
