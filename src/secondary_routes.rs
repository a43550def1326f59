//! Policy-routing list for the secondary WAN — a newline-delimited file of
//! IPv4 addresses that update_secondary_routes.sh turns into ip rules.
//!
//! Comment and blank lines are operator-owned and preserved on rewrite.

use crate::subnet;

/// Hosts routed via the secondary WAN.
pub const ROUTES_FILE: &str = "/etc/darkflows/route_to_secondary.txt";

/// Addresses listed in the file, in order, comments skipped.
pub fn parse(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect()
}

/// Append an address, validated and deduplicated. Returns the new file
/// text, or an error when the address is malformed or already present.
pub fn add(text: &str, ip: &str) -> Result<String, String> {
    let ip = ip.trim();
    subnet::parse_ipv4(ip)?;
    if parse(text).iter().any(|existing| existing == ip) {
        return Err(format!("{} is already routed via the secondary WAN", ip));
    }
    let mut out = text.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(ip);
    out.push('\n');
    Ok(out)
}

/// Remove an address, preserving every other line. `Ok(None)` when the
/// address is not listed.
pub fn remove(text: &str, ip: &str) -> Option<String> {
    let ip = ip.trim();
    if !parse(text).iter().any(|existing| existing == ip) {
        return None;
    }
    let kept: Vec<&str> = text
        .split('\n')
        .filter(|line| line.trim() != ip)
        .collect();
    Some(kept.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# hosts pinned to the backup uplink\n192.168.1.50\n192.168.1.51\n";

    #[test]
    fn parse_skips_comments_and_blanks() {
        assert_eq!(parse(SAMPLE), vec!["192.168.1.50", "192.168.1.51"]);
        assert!(parse("\n\n# only comments\n").is_empty());
    }

    #[test]
    fn add_validates_and_deduplicates() {
        let out = add(SAMPLE, "192.168.1.52").unwrap();
        assert!(out.ends_with("192.168.1.52\n"));
        assert!(out.starts_with("# hosts pinned"));
        assert!(add(SAMPLE, "192.168.1.50").is_err());
        assert!(add(SAMPLE, "not-an-ip").is_err());
    }

    #[test]
    fn add_to_file_without_trailing_newline() {
        let out = add("192.168.1.50", "192.168.1.51").unwrap();
        assert_eq!(out, "192.168.1.50\n192.168.1.51\n");
    }

    #[test]
    fn remove_keeps_comments() {
        let out = remove(SAMPLE, "192.168.1.50").unwrap();
        assert_eq!(out, "# hosts pinned to the backup uplink\n192.168.1.51\n");
        assert!(remove(SAMPLE, "10.0.0.1").is_none());
    }
}
