//! Kea DHCP server config — static reservation CRUD, pool extraction, and
//! active-lease listing.
//!
//! /etc/kea/kea-dhcp4.conf is owned by Kea and carries far more than we
//! model, so all edits happen on the raw `serde_json::Value` tree: unknown
//! keys pass through a rewrite untouched. Reservations are unique by
//! `hw-address` within the subnet.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::subnet::IpRange;

/// Kea DHCPv4 server configuration file.
pub const KEA_CONF: &str = "/etc/kea/kea-dhcp4.conf";
/// Kea memfile lease database (append-only CSV).
pub const KEA_LEASES: &str = "/var/lib/kea/kea-leases4.csv";

/// A static IP↔MAC reservation. Extra fields Kea understands but we do
/// not (client classes, options) ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    #[serde(rename = "ip-address")]
    pub ip_address: String,
    #[serde(rename = "hw-address")]
    pub hw_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Fields a PUT may change. The reservation is matched by `hw-address`
/// alone — the IP is exactly what tends to be changing.
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationPatch {
    #[serde(rename = "ip-address")]
    pub ip_address: Option<String>,
    pub hostname: Option<String>,
}

/// What an update changed, for the DNS side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub old_ip: String,
    pub new_ip: String,
    pub hostname: Option<String>,
}

pub fn load(path: &str) -> Result<Value, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path, e))?;
    serde_json::from_str(&text).map_err(|e| format!("cannot parse {}: {}", path, e))
}

pub fn save(path: &str, conf: &Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(conf)
        .map_err(|e| format!("cannot serialize DHCP config: {}", e))?;
    crate::fslock::write_atomic(path, &text)
}

/// Reservations of the first subnet, empty when the structure is absent.
pub fn reservations(conf: &Value) -> Vec<Reservation> {
    conf.pointer("/Dhcp4/subnet4/0/reservations")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Mutable access to `Dhcp4.subnet4[0].reservations`, creating each level
/// of the nesting on first use.
fn reservations_mut(conf: &mut Value) -> Result<&mut Vec<Value>, String> {
    let root = conf
        .as_object_mut()
        .ok_or_else(|| "DHCP config root is not an object".to_string())?;
    let dhcp4 = root
        .entry("Dhcp4")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| "Dhcp4 is not an object".to_string())?;
    let subnets = dhcp4
        .entry("subnet4")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| "subnet4 is not an array".to_string())?;
    if subnets.is_empty() {
        subnets.push(json!({}));
    }
    let subnet = subnets
        .get_mut(0)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| "subnet4[0] is not an object".to_string())?;
    subnet
        .entry("reservations")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| "reservations is not an array".to_string())
}

/// Colon-separated MAC address check (six hex octets).
pub fn valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn entry_mac(entry: &Value) -> Option<&str> {
    entry.get("hw-address").and_then(Value::as_str)
}

fn entry_ip(entry: &Value) -> Option<&str> {
    entry.get("ip-address").and_then(Value::as_str)
}

/// Append a reservation. A duplicate `hw-address` is a validation error —
/// the list is keyed by MAC and a second entry would shadow the first.
pub fn add_reservation(conf: &mut Value, res: &Reservation) -> Result<(), String> {
    let list = reservations_mut(conf)?;
    if list
        .iter()
        .any(|e| entry_mac(e).is_some_and(|m| m.eq_ignore_ascii_case(&res.hw_address)))
    {
        return Err(format!(
            "a reservation for {} already exists",
            res.hw_address
        ));
    }
    let value =
        serde_json::to_value(res).map_err(|e| format!("cannot serialize reservation: {}", e))?;
    list.push(value);
    Ok(())
}

/// Shallow-merge `patch` into the reservation matching `mac`.
/// `Ok(None)` means no reservation with that MAC exists.
pub fn update_reservation(
    conf: &mut Value,
    mac: &str,
    patch: &ReservationPatch,
) -> Result<Option<UpdateOutcome>, String> {
    let list = reservations_mut(conf)?;
    let entry = match list
        .iter_mut()
        .find(|e| entry_mac(e).is_some_and(|m| m.eq_ignore_ascii_case(mac)))
    {
        Some(e) => e,
        None => return Ok(None),
    };
    let obj = entry
        .as_object_mut()
        .ok_or_else(|| "reservation entry is not an object".to_string())?;

    let old_ip = obj
        .get("ip-address")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if let Some(ip) = &patch.ip_address {
        obj.insert("ip-address".to_string(), json!(ip));
    }
    if let Some(hostname) = &patch.hostname {
        obj.insert("hostname".to_string(), json!(hostname));
    }
    let new_ip = obj
        .get("ip-address")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let hostname = obj
        .get("hostname")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    Ok(Some(UpdateOutcome {
        old_ip,
        new_ip,
        hostname,
    }))
}

/// Hostname of the reservation currently holding `ip`, for DNS cleanup.
pub fn hostname_for_ip(conf: &Value, ip: &str) -> Option<String> {
    conf.pointer("/Dhcp4/subnet4/0/reservations")
        .and_then(Value::as_array)?
        .iter()
        .find(|e| entry_ip(e) == Some(ip))?
        .get("hostname")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// Remove every reservation matching the target by IP or by MAC and
/// return the removed entries. An empty result means nothing matched.
///
/// The previous dashboard filtered with `ip != X && mac != Y`, which by
/// De Morgan removes on IP-or-MAC match but was never written down as
/// intended behavior; this is that semantics, made explicit.
pub fn remove_reservations(
    conf: &mut Value,
    ip: &str,
    mac: &str,
) -> Result<Vec<Reservation>, String> {
    let list = reservations_mut(conf)?;
    let mut removed = Vec::new();
    list.retain(|entry| {
        let hit = entry_ip(entry) == Some(ip)
            || entry_mac(entry).is_some_and(|m| m.eq_ignore_ascii_case(mac));
        if hit {
            if let Ok(res) = serde_json::from_value(entry.clone()) {
                removed.push(res);
            }
        }
        !hit
    });
    Ok(removed)
}

/// Dynamic pools of the first subnet as `(label, range)` pairs, for the
/// VLAN conflict check. Malformed pool strings are skipped with a log.
pub fn pools(conf: &Value) -> Vec<(String, IpRange)> {
    conf.pointer("/Dhcp4/subnet4/0/pools")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|p| p.get("pool").and_then(Value::as_str))
                .filter_map(|spec| match parse_pool(spec) {
                    Ok(range) => Some((spec.to_string(), range)),
                    Err(e) => {
                        tracing::warn!("skipping malformed DHCP pool '{}': {}", spec, e);
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse Kea's `"192.168.0.100 - 192.168.0.200"` pool notation.
pub fn parse_pool(spec: &str) -> Result<IpRange, String> {
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| format!("invalid pool spec: {}", spec))?;
    IpRange::parse(start.trim(), end.trim())
}

// ─── Leases ───

/// An active DHCP lease from the memfile CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lease {
    pub address: String,
    pub hw_address: String,
    pub hostname: Option<String>,
    pub expires_at: i64,
}

/// Parse the Kea memfile lease CSV. The file is an append-only log: the
/// last record per address is authoritative. Records that are expired at
/// `now`, released (lifetime 0), or not in the default state are dropped.
pub fn parse_leases(csv: &str, now: i64) -> Vec<Lease> {
    // columns: address,hwaddr,client_id,valid_lifetime,expire,subnet_id,
    //          fqdn_fwd,fqdn_rev,hostname,state,...
    let mut order: Vec<String> = Vec::new();
    let mut latest: std::collections::HashMap<String, (Lease, i64, u32)> =
        std::collections::HashMap::new();

    for line in csv.lines().skip(1) {
        let cols: Vec<&str> = line.split(',').collect();
        if cols.len() < 10 {
            continue;
        }
        let address = cols[0].to_string();
        if address.is_empty() {
            continue;
        }
        let lifetime: i64 = cols[3].parse().unwrap_or(0);
        let expire: i64 = cols[4].parse().unwrap_or(0);
        let state: u32 = cols[9].parse().unwrap_or(0);
        let hostname = if cols[8].is_empty() {
            None
        } else {
            Some(cols[8].to_string())
        };
        let lease = Lease {
            address: address.clone(),
            hw_address: cols[1].to_string(),
            hostname,
            expires_at: expire,
        };
        if !latest.contains_key(&address) {
            order.push(address.clone());
        }
        latest.insert(address, (lease, lifetime, state));
    }

    order
        .into_iter()
        .filter_map(|addr| latest.remove(&addr))
        .filter(|(lease, lifetime, state)| {
            *state == 0 && *lifetime > 0 && lease.expires_at > now
        })
        .map(|(lease, _, _)| lease)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_conf() -> Value {
        json!({
            "Dhcp4": {
                "interfaces-config": { "interfaces": ["eth2"] },
                "subnet4": [{
                    "subnet": "192.168.1.0/24",
                    "pools": [{ "pool": "192.168.1.100 - 192.168.1.200" }],
                    "reservations": [
                        { "ip-address": "192.168.1.50",
                          "hw-address": "AA:BB:CC:DD:EE:FF",
                          "hostname": "printer" }
                    ],
                    "option-data": [{ "name": "routers", "data": "192.168.1.1" }]
                }]
            }
        })
    }

    #[test]
    fn lists_reservations() {
        let conf = sample_conf();
        let list = reservations(&conf);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].ip_address, "192.168.1.50");
        assert_eq!(list[0].hw_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(list[0].hostname.as_deref(), Some("printer"));
    }

    #[test]
    fn empty_structure_lists_nothing() {
        assert!(reservations(&json!({})).is_empty());
        assert!(reservations(&json!({ "Dhcp4": {} })).is_empty());
    }

    #[test]
    fn create_auto_vivifies_nesting() {
        let mut conf = json!({});
        let res = Reservation {
            ip_address: "192.168.1.50".into(),
            hw_address: "AA:BB:CC:DD:EE:FF".into(),
            hostname: Some("printer".into()),
            extra: Default::default(),
        };
        add_reservation(&mut conf, &res).unwrap();
        let list = reservations(&conf);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0], res);
    }

    #[test]
    fn create_rejects_duplicate_mac() {
        let mut conf = sample_conf();
        let res = Reservation {
            ip_address: "192.168.1.60".into(),
            // same MAC, different case
            hw_address: "aa:bb:cc:dd:ee:ff".into(),
            hostname: None,
            extra: Default::default(),
        };
        assert!(add_reservation(&mut conf, &res).is_err());
        assert_eq!(reservations(&conf).len(), 1);
    }

    #[test]
    fn update_matches_by_mac_and_merges() {
        let mut conf = sample_conf();
        let patch = ReservationPatch {
            ip_address: Some("192.168.1.77".into()),
            hostname: None,
        };
        let outcome = update_reservation(&mut conf, "aa:bb:cc:dd:ee:ff", &patch)
            .unwrap()
            .unwrap();
        assert_eq!(outcome.old_ip, "192.168.1.50");
        assert_eq!(outcome.new_ip, "192.168.1.77");
        assert_eq!(outcome.hostname.as_deref(), Some("printer"));

        let list = reservations(&conf);
        assert_eq!(list.len(), 1, "update must not duplicate the record");
        assert_eq!(list[0].ip_address, "192.168.1.77");
        assert_eq!(list[0].hostname.as_deref(), Some("printer"));
    }

    #[test]
    fn update_unknown_mac_reports_not_found() {
        let mut conf = sample_conf();
        let patch = ReservationPatch {
            ip_address: None,
            hostname: Some("x".into()),
        };
        assert!(update_reservation(&mut conf, "00:00:00:00:00:01", &patch)
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_removes_matching_entry() {
        let mut conf = sample_conf();
        let removed =
            remove_reservations(&mut conf, "192.168.1.50", "AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(removed.len(), 1);
        assert!(reservations(&conf).is_empty());
    }

    #[test]
    fn delete_nothing_matching_is_empty() {
        let mut conf = sample_conf();
        let removed =
            remove_reservations(&mut conf, "10.0.0.1", "00:00:00:00:00:01").unwrap();
        assert!(removed.is_empty());
        assert_eq!(reservations(&conf).len(), 1);
    }

    #[test]
    fn rewrite_preserves_unknown_keys() {
        let mut conf = sample_conf();
        let res = Reservation {
            ip_address: "192.168.1.60".into(),
            hw_address: "11:22:33:44:55:66".into(),
            hostname: None,
            extra: Default::default(),
        };
        add_reservation(&mut conf, &res).unwrap();
        // untouched siblings of the reservations list survive the edit
        assert_eq!(
            conf.pointer("/Dhcp4/subnet4/0/option-data/0/data"),
            Some(&json!("192.168.1.1"))
        );
        assert_eq!(
            conf.pointer("/Dhcp4/interfaces-config/interfaces/0"),
            Some(&json!("eth2"))
        );
    }

    #[test]
    fn hostname_lookup_by_ip() {
        let conf = sample_conf();
        assert_eq!(
            hostname_for_ip(&conf, "192.168.1.50").as_deref(),
            Some("printer")
        );
        assert!(hostname_for_ip(&conf, "192.168.1.51").is_none());
    }

    #[test]
    fn pool_extraction() {
        let conf = sample_conf();
        let pools = pools(&conf);
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].0, "192.168.1.100 - 192.168.1.200");
        assert!(parse_pool("garbage").is_err());
    }

    #[test]
    fn mac_validation() {
        assert!(valid_mac("AA:BB:CC:DD:EE:FF"));
        assert!(valid_mac("aa:bb:cc:dd:ee:ff"));
        assert!(!valid_mac("AA:BB:CC:DD:EE"));
        assert!(!valid_mac("AA:BB:CC:DD:EE:GG"));
        assert!(!valid_mac("AABBCCDDEEFF"));
    }

    #[test]
    fn lease_parsing_last_record_wins() {
        let csv = "address,hwaddr,client_id,valid_lifetime,expire,subnet_id,fqdn_fwd,fqdn_rev,hostname,state\n\
            192.168.1.23,aa:bb:cc:00:11:22,01:aa,3600,2000,1,0,0,laptop,0\n\
            192.168.1.23,aa:bb:cc:00:11:22,01:aa,3600,9000,1,0,0,laptop,0\n\
            192.168.1.40,dd:ee:ff:00:11:22,01:dd,3600,500,1,0,0,old-box,0\n\
            192.168.1.41,11:22:33:44:55:66,01:11,0,9000,1,0,0,,0\n";
        let leases = parse_leases(csv, 1000);
        // .23 renewed (latest expire wins), .40 expired, .41 released
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].address, "192.168.1.23");
        assert_eq!(leases[0].expires_at, 9000);
        assert_eq!(leases[0].hostname.as_deref(), Some("laptop"));
    }
}
