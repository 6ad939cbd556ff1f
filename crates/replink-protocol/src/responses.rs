//! Reply decoding for the wifi diagnostic expressions.
//!
//! Replies arrive as the batch of lines gathered between a command send and
//! the next quiet gap on the link. Each decoder keys off an explicit marker
//! (the echoed expression, `connect:`, `ip:`, `PING `) rather than line
//! position, because a batch can carry prompt noise or leftover output from
//! an earlier command. Input that does not carry the expected marker
//! decodes to an explicit unparseable value — decoders never fail.

use crate::error::{ProtocolError, ProtocolResult};

/// Marker carried by the echoed scan expression.
const SCAN_MARKER: &str = "b.scan()";

/// Marker emitted by the device once association completes.
pub const CONNECT_MARKER: &str = "connect:";

/// Marker carried by the status line holding the IP configuration block.
pub const IP_MARKER: &str = "ip:";

/// One network found by a wifi scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    /// Network SSID.
    pub ssid: String,
    /// Access point hardware address, as the device printed it.
    pub bssid: String,
    /// Radio channel.
    pub channel: i32,
    /// Signal strength in dBm.
    pub rssi: i32,
    /// Authentication mode.
    pub authmode: i32,
    /// Whether the SSID is hidden.
    pub hidden: bool,
}

/// IP configuration reported once the device has associated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConfig {
    /// The device's own address.
    pub own_ip: String,
    /// Subnet mask.
    pub subnet_mask: String,
    /// DHCP server address.
    pub dhcp_server: String,
    /// DNS server address.
    pub dns_server: String,
}

/// Result of a remote ping run.
#[derive(Debug, Clone, PartialEq)]
pub enum PingOutcome {
    /// The ping ran and produced statistics.
    Report(PingReport),
    /// The device reported the host as unreachable.
    HostUnreachable,
    /// Name resolution failed on the device.
    DnsFailure,
    /// The reply did not look like ping output at all.
    Unparseable,
}

/// Parsed ping statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct PingReport {
    /// The target as given to the ping command.
    pub target: String,
    /// The address the target resolved to.
    pub ip: String,
    /// Percentage of echo requests answered.
    pub success_pct: f64,
    /// Round-trip time of each reply, in milliseconds.
    pub times_ms: Vec<f64>,
}

// ============================================================================
// Scan decoding
// ============================================================================

/// Decode a scan reply batch into network entries.
///
/// The batch must contain the echoed scan expression; the line after it
/// carries the tuple-per-network payload. Returns `None` when the marker is
/// absent, and silently skips payload entries that do not decode to exactly
/// six fields.
pub fn decode_scan(lines: &[String]) -> Option<Vec<ScanEntry>> {
    let marker_idx = lines.iter().position(|l| l.contains(SCAN_MARKER))?;
    let payload = lines.get(marker_idx + 1)?;

    let mut entries = Vec::new();
    // Payload shape: [(f1, .., f6), (f1, .., f6), ...]
    let inner = payload
        .trim()
        .trim_start_matches("[(")
        .trim_end_matches(")]");
    for network in inner.split("), (") {
        match parse_scan_entry(network) {
            Ok(entry) => entries.push(entry),
            Err(e) => log::debug!("skipping scan entry {:?}: {}", network, e),
        }
    }
    Some(entries)
}

/// Parse one six-field network tuple.
fn parse_scan_entry(text: &str) -> ProtocolResult<ScanEntry> {
    let fields: Vec<&str> = text.split(", ").map(str::trim).collect();
    if fields.len() != 6 {
        return Err(ProtocolError::ParseError(format!(
            "expected 6 fields, got {}",
            fields.len()
        )));
    }

    Ok(ScanEntry {
        ssid: strip_bytes_repr(fields[0]),
        bssid: strip_bytes_repr(fields[1]),
        channel: parse_int(fields[2])?,
        rssi: parse_int(fields[3])?,
        authmode: parse_int(fields[4])?,
        hidden: parse_bool(fields[5])?,
    })
}

/// Drop the `b'...'` wrapper the interpreter puts around byte strings.
fn strip_bytes_repr(field: &str) -> String {
    field
        .trim()
        .trim_start_matches("b'")
        .trim_end_matches('\'')
        .to_string()
}

fn parse_int(field: &str) -> ProtocolResult<i32> {
    field
        .parse()
        .map_err(|_| ProtocolError::ParseError(format!("invalid integer: {}", field)))
}

fn parse_bool(field: &str) -> ProtocolResult<bool> {
    match field {
        "True" | "1" => Ok(true),
        "False" | "0" => Ok(false),
        other => Err(ProtocolError::ParseError(format!("invalid bool: {}", other))),
    }
}

// ============================================================================
// Connect / status decoding
// ============================================================================

/// Check whether a reply batch carries the association-complete marker.
pub fn contains_connect_marker(lines: &[String]) -> bool {
    lines.iter().any(|l| l.contains(CONNECT_MARKER))
}

/// Extract the association duration from a reply batch.
///
/// The device reports `connect:<seconds>` once association completes.
pub fn extract_connect_seconds(lines: &[String]) -> Option<u32> {
    let line = lines.iter().rev().find(|l| l.contains(CONNECT_MARKER))?;
    let value = line.split(CONNECT_MARKER).nth(1)?;
    value.trim().parse().ok()
}

impl IpConfig {
    /// Parse the IP configuration block out of a status line.
    ///
    /// The device prints the block with each address single-quoted; the
    /// four addresses sit at fixed quote-split offsets 1/3/5/7.
    pub fn parse(line: &str) -> ProtocolResult<IpConfig> {
        let parts: Vec<&str> = line.split('\'').collect();
        if parts.len() < 8 {
            return Err(ProtocolError::ParseError(format!(
                "expected 4 quoted addresses, got {} quote segments",
                parts.len()
            )));
        }
        Ok(IpConfig {
            own_ip: parts[1].to_string(),
            subnet_mask: parts[3].to_string(),
            dhcp_server: parts[5].to_string(),
            dns_server: parts[7].to_string(),
        })
    }
}

/// Find and parse the IP configuration in a reply batch.
///
/// Looks for the `ip:` marker anywhere in the batch; returns `None` when it
/// is absent or its line does not parse.
pub fn decode_ip_config(lines: &[String]) -> Option<IpConfig> {
    let line = lines.iter().rev().find(|l| l.contains(IP_MARKER))?;
    IpConfig::parse(line).ok()
}

// ============================================================================
// Ping decoding
// ============================================================================

/// Decode a ping reply batch.
///
/// Known remote failure substrings take priority over everything else in
/// the batch, so a noisy reply still yields the right tagged error.
pub fn decode_ping(lines: &[String]) -> PingOutcome {
    if lines.iter().any(|l| l.contains("EHOSTUNREACH")) {
        return PingOutcome::HostUnreachable;
    }
    if lines.iter().any(|l| l.contains("OSError: -202")) {
        return PingOutcome::DnsFailure;
    }
    if !lines.iter().any(|l| l.contains("uping")) {
        return PingOutcome::Unparseable;
    }

    let Some((target, ip)) = parse_ping_header(lines) else {
        return PingOutcome::Unparseable;
    };

    let mut times_ms = Vec::new();
    for line in lines {
        let tokens: Vec<&str> = line.split(' ').collect();
        if tokens.len() > 6 {
            if let Some(value) = tokens[6].strip_prefix("time=") {
                if let Ok(ms) = value.trim_end_matches("ms").parse() {
                    times_ms.push(ms);
                }
            }
        }
    }

    PingOutcome::Report(PingReport {
        target,
        ip,
        success_pct: parse_ping_summary(lines).unwrap_or(0.0),
        times_ms,
    })
}

/// Parse the `PING <target> (<ip>):` header line.
fn parse_ping_header(lines: &[String]) -> Option<(String, String)> {
    let line = lines.iter().find(|l| l.contains("PING "))?;
    let rest = line.split("PING ").nth(1)?;
    let mut tokens = rest.split(' ');
    let target = tokens.next()?.to_string();
    let ip = tokens.next()?.replace([':', '(', ')'], "");
    Some((target, ip))
}

/// Parse the trailing `(sent, received)` summary into a success percentage.
fn parse_ping_summary(lines: &[String]) -> Option<f64> {
    let line = lines
        .iter()
        .rev()
        .find(|l| l.trim().starts_with('(') && l.trim().ends_with(')'))?;
    let inner = line.trim().trim_start_matches('(').trim_end_matches(')');
    let factors: Vec<&str> = inner.split(", ").collect();
    if factors.len() != 2 {
        return None;
    }
    let sent: f64 = factors[0].trim().parse().ok()?;
    let received: f64 = factors[1].trim().parse().ok()?;
    if sent == 0.0 {
        return None;
    }
    Some(received / sent * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(input: &[&str]) -> Vec<String> {
        input.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_decode_scan() {
        let reply = lines(&[
            ">>> b.scan()",
            "[(b'bench-net', b'\\xc4\\x93\\x00\\x11\\x22\\x33', 6, -61, 3, False), \
             (b'guest', 11, -80, True)]",
            ">>> ",
        ]);
        let entries = decode_scan(&reply).expect("marker present");
        // The second entry is missing fields and is skipped.
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ssid, "bench-net");
        assert_eq!(entries[0].channel, 6);
        assert_eq!(entries[0].rssi, -61);
        assert_eq!(entries[0].authmode, 3);
        assert!(!entries[0].hidden);
    }

    #[test]
    fn test_decode_scan_missing_marker() {
        let reply = lines(&["Traceback (most recent call last):", ">>> "]);
        assert!(decode_scan(&reply).is_none());
    }

    #[test]
    fn test_decode_scan_skips_short_entries() {
        let reply = lines(&["b.scan()", "[(b'only', b'\\x01', 1), (b'x', b'\\x02', 3, -70, 0, False)]"]);
        let entries = decode_scan(&reply).expect("marker present");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ssid, "x");
    }

    #[test]
    fn test_extract_connect_seconds() {
        let reply = lines(&["b.connect()", "...", "connect: 7"]);
        assert!(contains_connect_marker(&reply));
        assert_eq!(extract_connect_seconds(&reply), Some(7));
    }

    #[test]
    fn test_connect_marker_absent() {
        let reply = lines(&["b.connect()", "still trying"]);
        assert!(!contains_connect_marker(&reply));
        assert_eq!(extract_connect_seconds(&reply), None);
    }

    #[test]
    fn test_parse_ip_config() {
        let line = "ip: ('192.168.4.17', '255.255.255.0', '192.168.4.1', '8.8.8.8')";
        let config = IpConfig::parse(line).unwrap();
        assert_eq!(config.own_ip, "192.168.4.17");
        assert_eq!(config.subnet_mask, "255.255.255.0");
        assert_eq!(config.dhcp_server, "192.168.4.1");
        assert_eq!(config.dns_server, "8.8.8.8");
    }

    #[test]
    fn test_decode_ip_config_from_batch() {
        let reply = lines(&[
            "b.status()",
            "status: connected",
            "ip: ('10.0.0.9', '255.0.0.0', '10.0.0.1', '10.0.0.1')",
        ]);
        let config = decode_ip_config(&reply).expect("ip marker present");
        assert_eq!(config.own_ip, "10.0.0.9");
    }

    #[test]
    fn test_decode_ping_report() {
        let reply = lines(&[
            "uping.ping('example.org', count=4, timeout=5000, interval=10, quiet=False, size=64)",
            "PING example.org (93.184.216.34): 64 data bytes",
            "84 bytes from 93.184.216.34: icmp_seq=1, ttl=54, time=23.18 ms",
            "84 bytes from 93.184.216.34: icmp_seq=2, ttl=54, time=19.02 ms",
            "(4, 2)",
            ">>> ",
        ]);
        match decode_ping(&reply) {
            PingOutcome::Report(report) => {
                assert_eq!(report.target, "example.org");
                assert_eq!(report.ip, "93.184.216.34");
                assert_eq!(report.times_ms, vec![23.18, 19.02]);
                assert_eq!(report.success_pct, 50.0);
            }
            other => panic!("expected report, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_ping_dns_failure() {
        // The tagged error wins regardless of other content in the batch.
        let reply = lines(&[
            "uping.ping('no-such-host', count=4, timeout=5000, interval=10, quiet=False, size=64)",
            "Traceback (most recent call last):",
            "OSError: -202",
        ]);
        assert_eq!(decode_ping(&reply), PingOutcome::DnsFailure);
    }

    #[test]
    fn test_decode_ping_host_unreachable() {
        let reply = lines(&["uping...", "OSError: [Errno 113] EHOSTUNREACH"]);
        assert_eq!(decode_ping(&reply), PingOutcome::HostUnreachable);
    }

    #[test]
    fn test_decode_ping_unparseable() {
        let reply = lines(&["something else entirely"]);
        assert_eq!(decode_ping(&reply), PingOutcome::Unparseable);
    }
}
