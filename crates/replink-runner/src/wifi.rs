//! Wifi diagnostics driven over the command channel.
//!
//! The device firmware exposes a station interface as `b` and a soft-AP
//! interface as `bap`; both are plain objects in the remote interpreter,
//! so every operation here is an expression exchange followed by a typed
//! decode. All decoding is marker-keyed (see `replink_protocol`), which
//! keeps leftover lines from an earlier command from being mistaken for
//! the reply to the current one.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use replink_channel::{Channel, ChannelResult};
use replink_protocol::{
    contains_connect_marker, decode_ip_config, decode_ping, decode_scan,
    extract_connect_seconds, Command, IpConfig, PingOutcome, ScanEntry,
};

/// Ping request count per run.
const PING_COUNT: u32 = 4;
/// Per-request ping timeout in milliseconds.
const PING_TIMEOUT_MS: u32 = 5_000;
/// Inter-request ping interval in milliseconds.
const PING_INTERVAL_MS: u32 = 10;

/// Settle delays for the wifi expressions.
///
/// These are how long the device is given to produce output before the
/// reply is drained; the defaults are tuned for real hardware and shrunk
/// in tests.
#[derive(Debug, Clone)]
pub struct WifiTiming {
    /// After `set_ssid` / `set_password` / `disconnect`.
    pub set_settle: Duration,
    /// After `scan` (a full scan takes several seconds).
    pub scan_settle: Duration,
    /// After the initial `connect`.
    pub connect_settle: Duration,
    /// After a `status` query.
    pub status_settle: Duration,
    /// Between status re-queries while waiting for association.
    pub poll_interval: Duration,
    /// After `machine.reset()`, before the device is usable again.
    pub reboot_wait: Duration,
}

impl Default for WifiTiming {
    fn default() -> Self {
        WifiTiming {
            set_settle: Duration::from_secs(2),
            scan_settle: Duration::from_secs(8),
            connect_settle: Duration::from_secs(5),
            status_settle: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
            reboot_wait: Duration::from_secs(2),
        }
    }
}

/// Result of one association attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// The device associated within the timeout.
    Connected {
        /// Association duration the device reported, when present.
        duration_secs: Option<u32>,
        /// IP configuration from the follow-up status query.
        ip: Option<IpConfig>,
    },
    /// The device did not acknowledge the SSID or password parameter.
    Rejected,
    /// No completion marker appeared within the caller's timeout.
    TimedOut,
}

/// Result of the scan-then-connect composite.
#[derive(Debug, Clone, PartialEq)]
pub enum TestConnectOutcome {
    /// The scan reply did not decode.
    ScanFailed,
    /// The requested SSID was not in the scan results.
    NetworkNotFound,
    /// The network was found and a connect was attempted.
    Attempted {
        /// The scan entry that matched the requested SSID.
        network: ScanEntry,
        /// What the connect attempt produced.
        outcome: ConnectOutcome,
    },
}

/// Station-mode diagnostics client.
pub struct WifiClient<'a> {
    channel: &'a mut Channel,
    timing: WifiTiming,
}

impl<'a> WifiClient<'a> {
    /// Create a client with hardware-tuned settle delays.
    pub fn new(channel: &'a mut Channel) -> Self {
        Self::with_timing(channel, WifiTiming::default())
    }

    /// Create a client with explicit settle delays.
    pub fn with_timing(channel: &'a mut Channel, timing: WifiTiming) -> Self {
        WifiClient { channel, timing }
    }

    /// Hard-reset the device and wait out the reboot.
    pub fn reset_device(&mut self) -> ChannelResult<()> {
        info!("resetting device");
        self.channel
            .exchange(&Command::MachineReset, self.timing.connect_settle)?;
        std::thread::sleep(self.timing.reboot_wait);
        Ok(())
    }

    /// Run a wifi scan and decode the result.
    ///
    /// `None` means the reply did not carry the scan marker.
    pub fn scan(&mut self) -> ChannelResult<Option<Vec<ScanEntry>>> {
        let reply = self
            .channel
            .exchange(&Command::WifiScan, self.timing.scan_settle)?;
        Ok(decode_scan(&reply))
    }

    /// Associate with a network, waiting up to `timeout` for completion.
    ///
    /// Sets the SSID and password (each must be echoed back by the
    /// device), starts the association, then re-queries status on a fixed
    /// interval until the completion marker appears in the accumulated
    /// output or the timeout elapses.
    pub fn connect(
        &mut self,
        ssid: &str,
        password: &str,
        timeout: Duration,
    ) -> ChannelResult<ConnectOutcome> {
        debug!("setting ssid {:?}", ssid);
        let reply = self.channel.exchange(
            &Command::SetSsid { ssid: ssid.to_string() },
            self.timing.set_settle,
        )?;
        if !device_acked(&reply, ssid) {
            return Ok(ConnectOutcome::Rejected);
        }

        debug!("setting password");
        let reply = self.channel.exchange(
            &Command::SetPassword { password: password.to_string() },
            self.timing.set_settle,
        )?;
        if !device_acked(&reply, password) {
            return Ok(ConnectOutcome::Rejected);
        }

        info!("connecting to {:?}", ssid);
        let mut accumulated = self
            .channel
            .exchange(&Command::WifiConnect, self.timing.connect_settle)?;
        let start = Instant::now();

        while !contains_connect_marker(&accumulated) {
            if start.elapsed() >= timeout {
                return Ok(ConnectOutcome::TimedOut);
            }
            let batch = self
                .channel
                .exchange(&Command::WifiStatus, self.timing.poll_interval)?;
            accumulated.extend(batch);
        }

        let duration_secs = extract_connect_seconds(&accumulated);
        let status = self
            .channel
            .exchange(&Command::WifiStatus, self.timing.status_settle)?;
        Ok(ConnectOutcome::Connected {
            duration_secs,
            ip: decode_ip_config(&status),
        })
    }

    /// Drop the current association.
    pub fn disconnect(&mut self) -> ChannelResult<()> {
        self.channel
            .exchange(&Command::WifiDisconnect, self.timing.set_settle)?;
        Ok(())
    }

    /// Query association status and decode the IP block, if present.
    pub fn status(&mut self) -> ChannelResult<Option<IpConfig>> {
        let reply = self
            .channel
            .exchange(&Command::WifiStatus, self.timing.status_settle)?;
        Ok(decode_ip_config(&reply))
    }

    /// Ping a host from the device.
    pub fn ping(&mut self, target: &str) -> ChannelResult<PingOutcome> {
        let settle = Duration::from_millis(u64::from(PING_TIMEOUT_MS)) + Duration::from_secs(1);
        let reply = self.channel.exchange(
            &Command::Ping {
                target: target.to_string(),
                count: PING_COUNT,
                timeout_ms: PING_TIMEOUT_MS,
                interval_ms: PING_INTERVAL_MS,
            },
            settle,
        )?;
        Ok(decode_ping(&reply))
    }

    /// Scan for a network, connect to it if present, then disconnect.
    pub fn test_connect(
        &mut self,
        ssid: &str,
        password: &str,
        timeout: Duration,
    ) -> ChannelResult<TestConnectOutcome> {
        info!("scanning for network {:?}", ssid);
        let Some(entries) = self.scan()? else {
            return Ok(TestConnectOutcome::ScanFailed);
        };
        let Some(network) = entries.into_iter().find(|e| e.ssid.contains(ssid)) else {
            return Ok(TestConnectOutcome::NetworkNotFound);
        };
        info!(
            "found {:?}: channel {}, authmode {}, hidden {}",
            network.ssid, network.channel, network.authmode, network.hidden
        );

        let outcome = self.connect(ssid, password, timeout)?;
        if matches!(outcome, ConnectOutcome::Connected { .. }) {
            self.disconnect()?;
        }
        Ok(TestConnectOutcome::Attempted { network, outcome })
    }
}

/// Whether any reply line echoes the value after a colon, which is how the
/// firmware acknowledges a parameter set.
fn device_acked(lines: &[String], value: &str) -> bool {
    lines
        .iter()
        .any(|l| l.split(':').nth(1).map(str::trim) == Some(value))
}

/// Soft-AP control client.
pub struct AccessPoint<'a> {
    channel: &'a mut Channel,
    timing: WifiTiming,
}

impl<'a> AccessPoint<'a> {
    /// Create a client with hardware-tuned settle delays.
    pub fn new(channel: &'a mut Channel) -> Self {
        Self::with_timing(channel, WifiTiming::default())
    }

    /// Create a client with explicit settle delays.
    pub fn with_timing(channel: &'a mut Channel, timing: WifiTiming) -> Self {
        AccessPoint { channel, timing }
    }

    /// Configure and start the soft AP.
    pub fn start(
        &mut self,
        ssid: &str,
        password: &str,
        ap_channel: u8,
        authmode: u8,
        hidden: bool,
    ) -> ChannelResult<()> {
        info!("starting access point {:?}", ssid);
        self.channel.exchange(
            &Command::ApSetParameters {
                ssid: ssid.to_string(),
                password: password.to_string(),
                channel: ap_channel,
                authmode,
                hidden,
            },
            self.timing.set_settle,
        )?;
        self.channel
            .exchange(&Command::ApStart, self.timing.set_settle)?;
        Ok(())
    }

    /// Stop the soft AP.
    pub fn stop(&mut self) -> ChannelResult<()> {
        self.channel
            .exchange(&Command::ApStop, self.timing.set_settle)?;
        Ok(())
    }

    /// Query connected stations; returns the raw reply lines.
    pub fn connected_stations(&mut self) -> ChannelResult<Vec<String>> {
        self.channel
            .exchange(&Command::ApConnected, self.timing.set_settle)
    }

    /// Reset the AP's connection timer.
    pub fn time_reset(&mut self) -> ChannelResult<()> {
        self.channel
            .exchange(&Command::ApTimeReset, self.timing.set_settle)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use replink_channel::{ChannelConfig, ReceiveMode, Transport, TransportError};

    /// Transport double that answers each expression from a script.
    ///
    /// Each entry maps an expression prefix to a queue of replies; every
    /// write matching the prefix queues the next reply for reading.
    struct ReplDouble {
        script: Vec<(String, VecDeque<Vec<u8>>)>,
        to_read: VecDeque<Vec<u8>>,
        writes: Arc<Mutex<Vec<String>>>,
    }

    impl ReplDouble {
        fn new(script: Vec<(&str, Vec<&str>)>) -> Self {
            ReplDouble {
                script: script
                    .into_iter()
                    .map(|(expr, replies)| {
                        (
                            expr.to_string(),
                            replies.into_iter().map(|r| r.as_bytes().to_vec()).collect(),
                        )
                    })
                    .collect(),
                to_read: VecDeque::new(),
                writes: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Transport for ReplDouble {
        fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            match self.to_read.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.to_read.push_front(chunk[n..].to_vec());
                    }
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
            let expr = String::from_utf8_lossy(data).trim_end().to_string();
            self.writes.lock().unwrap().push(expr.clone());
            for (prefix, replies) in &mut self.script {
                if expr.starts_with(prefix.as_str()) {
                    if let Some(reply) = replies.pop_front() {
                        self.to_read.push_back(reply);
                    }
                    break;
                }
            }
            Ok(())
        }
    }

    fn connected_channel(double: ReplDouble) -> Channel {
        let config = ChannelConfig {
            command_wait: Duration::from_millis(0),
            receive_deadline: Duration::from_millis(20),
            ..ChannelConfig::default()
        };
        let mut channel = Channel::new(config);
        channel
            .connect_with(Box::new(double), ReceiveMode::Polling)
            .unwrap();
        channel
    }

    fn fast_timing() -> WifiTiming {
        WifiTiming {
            set_settle: Duration::from_millis(0),
            scan_settle: Duration::from_millis(0),
            connect_settle: Duration::from_millis(0),
            status_settle: Duration::from_millis(0),
            poll_interval: Duration::from_millis(1),
            reboot_wait: Duration::from_millis(0),
        }
    }

    #[test]
    fn test_scan_decodes_networks() {
        let double = ReplDouble::new(vec![(
            "b.scan()",
            vec!["b.scan()\r\n[(b'net1', b'\\x01\\x02', 6, -60, 3, False)]\r\n>>> \r\n"],
        )]);
        let mut channel = connected_channel(double);
        let mut wifi = WifiClient::with_timing(&mut channel, fast_timing());

        let entries = wifi.scan().unwrap().expect("scan reply carries marker");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ssid, "net1");
    }

    #[test]
    fn test_connect_rejected_when_ssid_not_acked() {
        let double = ReplDouble::new(vec![("b.set_ssid", vec!["ssid:something-else\r\n"])]);
        let mut channel = connected_channel(double);
        let mut wifi = WifiClient::with_timing(&mut channel, fast_timing());

        let outcome = wifi
            .connect("net1", "pw", Duration::from_millis(50))
            .unwrap();
        assert_eq!(outcome, ConnectOutcome::Rejected);
    }

    #[test]
    fn test_connect_polls_until_marker() {
        let double = ReplDouble::new(vec![
            ("b.set_ssid", vec!["ssid:net1\r\n"]),
            ("b.set_password", vec!["password:pw\r\n"]),
            ("b.connect()", vec!["connecting...\r\n"]),
            (
                "b.status()",
                vec![
                    "still waiting\r\n",
                    "connect: 4\r\n",
                    "ip: ('10.0.0.2', '255.255.255.0', '10.0.0.1', '10.0.0.1')\r\n",
                ],
            ),
        ]);
        let mut channel = connected_channel(double);
        let mut wifi = WifiClient::with_timing(&mut channel, fast_timing());

        let outcome = wifi.connect("net1", "pw", Duration::from_secs(5)).unwrap();
        match outcome {
            ConnectOutcome::Connected { duration_secs, ip } => {
                assert_eq!(duration_secs, Some(4));
                let ip = ip.expect("status reply carries ip block");
                assert_eq!(ip.own_ip, "10.0.0.2");
            }
            other => panic!("expected Connected, got {:?}", other),
        }
    }

    #[test]
    fn test_connect_times_out_without_marker() {
        let double = ReplDouble::new(vec![
            ("b.set_ssid", vec!["ssid:net1\r\n"]),
            ("b.set_password", vec!["password:pw\r\n"]),
            ("b.connect()", vec!["connecting...\r\n"]),
        ]);
        let mut channel = connected_channel(double);
        let mut wifi = WifiClient::with_timing(&mut channel, fast_timing());

        let outcome = wifi
            .connect("net1", "pw", Duration::from_millis(30))
            .unwrap();
        assert_eq!(outcome, ConnectOutcome::TimedOut);
    }

    #[test]
    fn test_ping_reports_dns_failure() {
        let double = ReplDouble::new(vec![(
            "uping.ping",
            vec!["uping.ping('nowhere', ...)\r\nOSError: -202\r\n"],
        )]);
        let mut channel = connected_channel(double);
        let mut wifi = WifiClient::with_timing(&mut channel, fast_timing());

        assert_eq!(wifi.ping("nowhere").unwrap(), PingOutcome::DnsFailure);
    }
}
