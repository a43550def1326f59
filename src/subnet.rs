//! IPv4 subnet arithmetic — dotted-quad conversion, network/broadcast
//! derivation, range containment and overlap tests.
//!
//! All math is done on 32-bit unsigned integers. These primitives back the
//! VLAN validator and the DHCP pool heuristics; keep them allocation-free.

use std::net::Ipv4Addr;

/// Parse a dotted-quad IPv4 address into its 32-bit integer form.
/// Each octet is validated against 0-255 (leading zeros rejected).
pub fn parse_ipv4(s: &str) -> Result<u32, String> {
    let addr: Ipv4Addr = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid IPv4 address: {}", s))?;
    Ok(u32::from(addr))
}

/// Format a 32-bit integer back to dotted-quad notation.
pub fn format_ipv4(addr: u32) -> String {
    Ipv4Addr::from(addr).to_string()
}

/// Netmask for a prefix length (0..=32).
pub fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        (!0u32) << (32 - prefix_len)
    }
}

/// Convert a dotted-quad netmask to a prefix length.
/// Non-contiguous masks (e.g. 255.0.255.0) are rejected.
pub fn mask_to_prefix(mask: &str) -> Result<u8, String> {
    let bits = parse_ipv4(mask)?;
    let prefix = bits.count_ones() as u8;
    if prefix_mask(prefix) != bits {
        return Err(format!("non-contiguous netmask: {}", mask));
    }
    Ok(prefix)
}

/// True when two addresses fall on the same network under the given mask.
pub fn same_network(a: &str, b: &str, mask: &str) -> Result<bool, String> {
    let a = parse_ipv4(a)?;
    let b = parse_ipv4(b)?;
    let m = parse_ipv4(mask)?;
    Ok((a & m) == (b & m))
}

/// An IPv4 subnet held as network base + prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: u32,
    prefix: u8,
}

impl Subnet {
    /// Parse CIDR notation (`192.168.5.0/24`). The address part is
    /// normalized to the network base, so `192.168.5.7/24` is accepted.
    pub fn parse_cidr(cidr: &str) -> Result<Self, String> {
        let (addr, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| format!("invalid CIDR: {}", cidr))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("invalid prefix length in {}", cidr))?;
        if prefix > 32 {
            return Err(format!("invalid prefix length /{}", prefix));
        }
        let addr = parse_ipv4(addr)?;
        Ok(Subnet {
            network: addr & prefix_mask(prefix),
            prefix,
        })
    }

    /// Build a subnet from a gateway address and dotted-quad mask.
    /// The network base is `gateway & mask`.
    pub fn from_gateway_mask(gateway: &str, mask: &str) -> Result<Self, String> {
        let gw = parse_ipv4(gateway)?;
        let prefix = mask_to_prefix(mask)?;
        Ok(Subnet {
            network: gw & prefix_mask(prefix),
            prefix,
        })
    }

    pub fn network_addr(&self) -> u32 {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix
    }

    pub fn broadcast_addr(&self) -> u32 {
        self.network | !prefix_mask(self.prefix)
    }

    pub fn contains(&self, addr: u32) -> bool {
        (addr & prefix_mask(self.prefix)) == self.network
    }

    pub fn contains_range(&self, range: &IpRange) -> bool {
        self.contains(range.start()) && self.contains(range.end())
    }

    /// Default DHCP pool for this subnet. First usable is network+2 —
    /// the network address and the conventional gateway at .1 are
    /// skipped — and last usable is broadcast-1. Existing DarkFlows
    /// configs assume exactly this offset; do not change it.
    pub fn default_pool(&self) -> Option<IpRange> {
        let first = self.network.checked_add(2)?;
        let last = self.broadcast_addr().checked_sub(1)?;
        IpRange::new(first, last).ok()
    }

    /// Entire address span of the subnet, network and broadcast included.
    /// Used for conflict checks against interface-owned space.
    pub fn full_range(&self) -> IpRange {
        IpRange {
            start: self.network,
            end: self.broadcast_addr(),
        }
    }

    pub fn to_cidr(&self) -> String {
        format!("{}/{}", format_ipv4(self.network), self.prefix)
    }
}

/// An inclusive IPv4 range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    start: u32,
    end: u32,
}

impl IpRange {
    pub fn new(start: u32, end: u32) -> Result<Self, String> {
        if start > end {
            return Err(format!(
                "range start {} is above end {}",
                format_ipv4(start),
                format_ipv4(end)
            ));
        }
        Ok(IpRange { start, end })
    }

    /// Parse a pair of dotted-quad endpoints.
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        IpRange::new(parse_ipv4(start)?, parse_ipv4(end)?)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.start <= addr && addr <= self.end
    }

    /// Two inclusive ranges overlap iff s1 <= e2 && s2 <= e1.
    pub fn overlaps(&self, other: &IpRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl std::fmt::Display for IpRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", format_ipv4(self.start), format_ipv4(self.end))
    }
}
