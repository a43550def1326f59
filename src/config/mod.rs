//! Codec for /etc/darkflows/d_network.cfg — a shell-variable-style file of
//! `KEY="value"` lines consumed by the DarkFlows shell scripts.
//!
//! The file is the source of truth for WAN roles, shaped bandwidth, CAKE
//! parameters, and the Cloudflare DDNS keys. Rewrites must leave every
//! unrecognized line byte-identical: the same file carries script-local
//! variables this dashboard knows nothing about.

use serde::{Deserialize, Serialize};

/// On-disk location of the network config file.
pub const NETWORK_CFG: &str = "/etc/darkflows/d_network.cfg";

/// Bandwidth unit suffix. Anything that is not `gbit` reads as `mbit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthUnit {
    Mbit,
    Gbit,
}

impl BandwidthUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            BandwidthUnit::Mbit => "mbit",
            BandwidthUnit::Gbit => "gbit",
        }
    }

    fn from_suffix(suffix: &str) -> Self {
        if suffix.trim().eq_ignore_ascii_case("gbit") {
            BandwidthUnit::Gbit
        } else {
            BandwidthUnit::Mbit
        }
    }
}

/// A shaped-bandwidth value as stored in the config file, e.g. `100mbit`.
/// The numeric part stays a string: the scripts treat it opaquely and we
/// must not re-format `100.5` into something the shell side never wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bandwidth {
    pub value: String,
    pub unit: BandwidthUnit,
}

impl Bandwidth {
    /// Split `100mbit` into value and unit at the digit/letter boundary.
    /// A missing or unrecognized suffix defaults to mbit.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let boundary = raw
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(raw.len());
        let (value, suffix) = raw.split_at(boundary);
        Bandwidth {
            value: value.trim().to_string(),
            unit: BandwidthUnit::from_suffix(suffix),
        }
    }

    pub fn render(&self) -> String {
        format!("{}{}", self.value, self.unit.as_str())
    }
}

/// The semantic keys recognized in d_network.cfg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigKey {
    PrimaryInterface,
    SecondaryInterface,
    InternalInterface,
    PrimaryEgressBandwidth,
    PrimaryIngressBandwidth,
    SecondaryEgressBandwidth,
    SecondaryIngressBandwidth,
    PrimaryLabel,
    SecondaryLabel,
    CakeParams,
    CakeDefault,
    ZoneId,
    RecordId,
    ApiToken,
    RecordName,
}

/// Declarative key table, matched in order during the single parse pass.
const KEY_TABLE: &[(&str, ConfigKey)] = &[
    ("PRIMARY_INTERFACE", ConfigKey::PrimaryInterface),
    ("SECONDARY_INTERFACE", ConfigKey::SecondaryInterface),
    ("INTERNAL_INTERFACE", ConfigKey::InternalInterface),
    ("PRIMARY_EGRESS_BANDWIDTH", ConfigKey::PrimaryEgressBandwidth),
    ("PRIMARY_INGRESS_BANDWIDTH", ConfigKey::PrimaryIngressBandwidth),
    ("SECONDARY_EGRESS_BANDWIDTH", ConfigKey::SecondaryEgressBandwidth),
    ("SECONDARY_INGRESS_BANDWIDTH", ConfigKey::SecondaryIngressBandwidth),
    ("PRIMARY_LABEL", ConfigKey::PrimaryLabel),
    ("SECONDARY_LABEL", ConfigKey::SecondaryLabel),
    ("CAKE_PARAMS", ConfigKey::CakeParams),
    ("CAKE_DEFAULT", ConfigKey::CakeDefault),
    ("ZONE_ID", ConfigKey::ZoneId),
    ("RECORD_ID", ConfigKey::RecordId),
    ("API_TOKEN", ConfigKey::ApiToken),
    ("RECORD_NAME", ConfigKey::RecordName),
];

fn lookup_key(name: &str) -> Option<ConfigKey> {
    KEY_TABLE
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, k)| *k)
}

/// Typed view of the recognized assignments. `None` means the key was not
/// present in the file (or, on write, that the line should stay untouched).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    pub primary_interface: Option<String>,
    pub secondary_interface: Option<String>,
    pub internal_interface: Option<String>,
    pub primary_egress_bandwidth: Option<Bandwidth>,
    pub primary_ingress_bandwidth: Option<Bandwidth>,
    pub secondary_egress_bandwidth: Option<Bandwidth>,
    pub secondary_ingress_bandwidth: Option<Bandwidth>,
    pub primary_label: Option<String>,
    pub secondary_label: Option<String>,
    pub cake_params: Option<String>,
    pub cake_default: Option<String>,
    pub zone_id: Option<String>,
    pub record_id: Option<String>,
    pub api_token: Option<String>,
    pub record_name: Option<String>,
}

impl NetworkConfig {
    fn set(&mut self, key: ConfigKey, raw: &str) {
        match key {
            ConfigKey::PrimaryInterface => self.primary_interface = Some(raw.to_string()),
            ConfigKey::SecondaryInterface => self.secondary_interface = Some(raw.to_string()),
            ConfigKey::InternalInterface => self.internal_interface = Some(raw.to_string()),
            ConfigKey::PrimaryEgressBandwidth => {
                self.primary_egress_bandwidth = Some(Bandwidth::parse(raw))
            }
            ConfigKey::PrimaryIngressBandwidth => {
                self.primary_ingress_bandwidth = Some(Bandwidth::parse(raw))
            }
            ConfigKey::SecondaryEgressBandwidth => {
                self.secondary_egress_bandwidth = Some(Bandwidth::parse(raw))
            }
            ConfigKey::SecondaryIngressBandwidth => {
                self.secondary_ingress_bandwidth = Some(Bandwidth::parse(raw))
            }
            ConfigKey::PrimaryLabel => self.primary_label = Some(raw.to_string()),
            ConfigKey::SecondaryLabel => self.secondary_label = Some(raw.to_string()),
            ConfigKey::CakeParams => self.cake_params = Some(raw.to_string()),
            ConfigKey::CakeDefault => self.cake_default = Some(raw.to_string()),
            ConfigKey::ZoneId => self.zone_id = Some(raw.to_string()),
            ConfigKey::RecordId => self.record_id = Some(raw.to_string()),
            ConfigKey::ApiToken => self.api_token = Some(raw.to_string()),
            ConfigKey::RecordName => self.record_name = Some(raw.to_string()),
        }
    }

    /// Rendered file value for a key, if this config carries one.
    fn value_for(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::PrimaryInterface => self.primary_interface.clone(),
            ConfigKey::SecondaryInterface => self.secondary_interface.clone(),
            ConfigKey::InternalInterface => self.internal_interface.clone(),
            ConfigKey::PrimaryEgressBandwidth => {
                self.primary_egress_bandwidth.as_ref().map(Bandwidth::render)
            }
            ConfigKey::PrimaryIngressBandwidth => {
                self.primary_ingress_bandwidth.as_ref().map(Bandwidth::render)
            }
            ConfigKey::SecondaryEgressBandwidth => {
                self.secondary_egress_bandwidth.as_ref().map(Bandwidth::render)
            }
            ConfigKey::SecondaryIngressBandwidth => {
                self.secondary_ingress_bandwidth.as_ref().map(Bandwidth::render)
            }
            ConfigKey::PrimaryLabel => self.primary_label.clone(),
            ConfigKey::SecondaryLabel => self.secondary_label.clone(),
            ConfigKey::CakeParams => self.cake_params.clone(),
            ConfigKey::CakeDefault => self.cake_default.clone(),
            ConfigKey::ZoneId => self.zone_id.clone(),
            ConfigKey::RecordId => self.record_id.clone(),
            ConfigKey::ApiToken => self.api_token.clone(),
            ConfigKey::RecordName => self.record_name.clone(),
        }
    }

    /// Merge `other` over `self`: present fields replace, absent fields
    /// keep the current value. Used for partial PUT bodies.
    pub fn merge(&mut self, other: NetworkConfig) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(primary_interface);
        take!(secondary_interface);
        take!(internal_interface);
        take!(primary_egress_bandwidth);
        take!(primary_ingress_bandwidth);
        take!(secondary_egress_bandwidth);
        take!(secondary_ingress_bandwidth);
        take!(primary_label);
        take!(secondary_label);
        take!(cake_params);
        take!(cake_default);
        take!(zone_id);
        take!(record_id);
        take!(api_token);
        take!(record_name);
    }
}

/// Split a line into `(KEY, value)` when it has the `KEY="value"` shape.
/// Keys are upper-case shell identifiers; the surrounding quotes, when
/// balanced, are stripped from the value.
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim_end();
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return None;
    }
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((key, value))
}

/// Single pass over the file: recognized assignments populate the typed
/// config, everything else is skipped. A key appearing more than once —
/// the last occurrence wins.
pub fn parse(text: &str) -> NetworkConfig {
    let mut cfg = NetworkConfig::default();
    for line in text.split('\n') {
        if let Some((key, value)) = split_assignment(line) {
            if let Some(k) = lookup_key(key) {
                cfg.set(k, value);
            }
        }
    }
    cfg
}

/// Rewrite `original` with the values from `cfg`. Only lines whose key is
/// recognized and whose value actually changed are rebuilt; every other
/// line, and the overall line order, is preserved byte-for-byte. When a
/// key appears more than once, every occurrence is rewritten to the same
/// new value so the file cannot end up self-disagreeing.
pub fn render(original: &str, cfg: &NetworkConfig) -> String {
    let lines: Vec<String> = original
        .split('\n')
        .map(|line| {
            let rewritten = split_assignment(line).and_then(|(key, value)| {
                let k = lookup_key(key)?;
                let new = cfg.value_for(k)?;
                if new == value {
                    None
                } else {
                    Some(format!("{}=\"{}\"", key, new))
                }
            });
            rewritten.unwrap_or_else(|| line.to_string())
        })
        .collect();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# DarkFlows network configuration
PRIMARY_INTERFACE="eth0"
SECONDARY_INTERFACE="eth1"
INTERNAL_INTERFACE="eth2"
PRIMARY_EGRESS_BANDWIDTH="100mbit"
PRIMARY_INGRESS_BANDWIDTH="1gbit"
PRIMARY_LABEL="Fiber"
CAKE_PARAMS="diffserv4 nat"
LOCAL_SCRIPT_VAR="do-not-touch"
"#;

    #[test]
    fn parse_extracts_recognized_keys() {
        let cfg = parse(SAMPLE);
        assert_eq!(cfg.primary_interface.as_deref(), Some("eth0"));
        assert_eq!(cfg.internal_interface.as_deref(), Some("eth2"));
        assert_eq!(cfg.primary_label.as_deref(), Some("Fiber"));
        assert_eq!(cfg.cake_params.as_deref(), Some("diffserv4 nat"));
        assert!(cfg.secondary_label.is_none());
        assert!(cfg.zone_id.is_none());
    }

    #[test]
    fn bandwidth_unit_split() {
        let bw = Bandwidth::parse("100mbit");
        assert_eq!(bw.value, "100");
        assert_eq!(bw.unit, BandwidthUnit::Mbit);

        let bw = Bandwidth::parse("1gbit");
        assert_eq!(bw.value, "1");
        assert_eq!(bw.unit, BandwidthUnit::Gbit);

        // no suffix and unknown suffix both default to mbit
        let bw = Bandwidth::parse("50");
        assert_eq!(bw.value, "50");
        assert_eq!(bw.unit, BandwidthUnit::Mbit);
        let bw = Bandwidth::parse("50kbit");
        assert_eq!(bw.value, "50");
        assert_eq!(bw.unit, BandwidthUnit::Mbit);
    }

    #[test]
    fn round_trip_is_identity() {
        let cfg = parse(SAMPLE);
        assert_eq!(render(SAMPLE, &cfg), SAMPLE);
    }

    #[test]
    fn selective_rewrite_preserves_other_lines() {
        let original = "A_KEY=\"1\"\n# a comment\nB_KEY=\"2\"\nCAKE_PARAMS=\"old\"\n";
        let mut cfg = parse(original);
        cfg.cake_params = Some("new params".to_string());
        let out = render(original, &cfg);
        assert_eq!(
            out,
            "A_KEY=\"1\"\n# a comment\nB_KEY=\"2\"\nCAKE_PARAMS=\"new params\"\n"
        );
    }

    #[test]
    fn absent_fields_leave_lines_untouched() {
        let original = "PRIMARY_LABEL=\"Fiber\"\n";
        let mut cfg = NetworkConfig::default();
        cfg.secondary_label = Some("Cable".to_string());
        // SECONDARY_LABEL has no line to rewrite and PRIMARY_LABEL is None
        assert_eq!(render(original, &cfg), original);
    }

    #[test]
    fn duplicate_key_last_wins_and_rewrites_all() {
        let original = "CAKE_PARAMS=\"first\"\nCAKE_PARAMS=\"second\"\n";
        let cfg = parse(original);
        assert_eq!(cfg.cake_params.as_deref(), Some("second"));

        let mut updated = cfg;
        updated.cake_params = Some("third".to_string());
        let out = render(original, &updated);
        assert_eq!(out, "CAKE_PARAMS=\"third\"\nCAKE_PARAMS=\"third\"\n");
    }

    #[test]
    fn unquoted_values_are_parsed_and_not_churned() {
        let original = "PRIMARY_INTERFACE=eth0\n";
        let cfg = parse(original);
        assert_eq!(cfg.primary_interface.as_deref(), Some("eth0"));
        // value unchanged — the unquoted line must not be rewritten
        assert_eq!(render(original, &cfg), original);
    }

    #[test]
    fn merge_overlays_present_fields_only() {
        let mut base = parse(SAMPLE);
        let mut patch = NetworkConfig::default();
        patch.primary_label = Some("Backup".to_string());
        base.merge(patch);
        assert_eq!(base.primary_label.as_deref(), Some("Backup"));
        assert_eq!(base.primary_interface.as_deref(), Some("eth0"));
    }
}
