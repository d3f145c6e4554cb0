//! Per-port counters and where they come from.
//!
//! The core never runs a control utility itself. A [`CounterSource`] hands over
//! per-port readings for one switch at a time; [`OfctlCounterSource`] adapts any
//! closure producing `ovs-ofctl dump-ports` text into one.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::PortNo;
use crate::Timestamp;

/// A switch port, the unit every link statistic is keyed by. Displayed as
/// `switch:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortKey {
    pub switch: String,
    pub port: PortNo,
}

impl PortKey {
    #[inline]
    pub fn new(switch: &str, port: PortNo) -> Self {
        PortKey {
            switch: switch.to_owned(),
            port,
        }
    }
}

impl std::fmt::Display for PortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.switch, self.port)
    }
}

/// Cumulative counters of one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCounters {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_drops: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_drops: u64,
}

impl PortCounters {
    #[inline]
    pub fn total_drops(&self) -> u64 {
        self.rx_drops + self.tx_drops
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleParseError {
    #[error("No statistics information presented in the record: {0}")]
    NoStats(String),
    #[error("Unrecognized port identifier: {0}")]
    PortId(String),
    #[error("Parse field {0} error: {1}")]
    ParseField(String, String),
    #[error("Missing field {0}")]
    MissingField(&'static str),
    #[error("Port {0} has no tx line")]
    MissingTx(PortNo),
    #[error("Cannot read counters of {0}: {1}")]
    Source(String, String),
}

pub type PortReading = std::result::Result<(PortNo, PortCounters), SampleParseError>;

/// Anything able to produce the current counters of a switch.
///
/// One malformed port must not hide the others, hence one result per port.
pub trait CounterSource: Send {
    /// Switch names, in a stable order.
    fn switches(&self) -> Vec<String>;
    fn read_ports(&mut self, switch: &str) -> std::result::Result<Vec<PortReading>, SampleParseError>;
}

/// Counters of every switch port taken at one sampling tick. Immutable once it
/// reaches a sample log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// nanoseconds since the Unix epoch
    pub timestamp: Timestamp,
    pub ports: IndexMap<PortKey, PortCounters>,
}

impl Snapshot {
    pub fn new(timestamp: Timestamp) -> Self {
        Snapshot {
            timestamp,
            ports: IndexMap::new(),
        }
    }

    #[inline]
    pub fn insert(&mut self, key: PortKey, counters: PortCounters) {
        self.ports.insert(key, counters);
    }

    #[inline]
    pub fn get(&self, key: &PortKey) -> Option<&PortCounters> {
        self.ports.get(key)
    }
}

/// Read every switch of `source` once. Unreadable switches and malformed port
/// entries are logged and skipped.
pub fn take_snapshot(source: &mut dyn CounterSource, timestamp: Timestamp) -> Snapshot {
    let mut snapshot = Snapshot::new(timestamp);
    for switch in source.switches() {
        let readings = match source.read_ports(&switch) {
            Ok(readings) => readings,
            Err(e) => {
                log::warn!("skipping {} in this sampling cycle: {}", switch, e);
                continue;
            }
        };
        for reading in readings {
            match reading {
                Ok((port, counters)) => snapshot.insert(PortKey::new(&switch, port), counters),
                Err(e) => log::warn!("skipping a port entry of {}: {}", switch, e),
            }
        }
    }
    log::trace!("snapshot at {}: {} ports", timestamp, snapshot.ports.len());
    snapshot
}

/// A [`CounterSource`] over `ovs-ofctl dump-ports` text. `dump` is expected to
/// return the command output for the given switch.
pub struct OfctlCounterSource<F> {
    switches: Vec<String>,
    dump: F,
}

impl<F> OfctlCounterSource<F>
where
    F: FnMut(&str) -> std::io::Result<String> + Send,
{
    pub fn new(switches: Vec<String>, dump: F) -> Self {
        OfctlCounterSource { switches, dump }
    }
}

impl<F> CounterSource for OfctlCounterSource<F>
where
    F: FnMut(&str) -> std::io::Result<String> + Send,
{
    fn switches(&self) -> Vec<String> {
        self.switches.clone()
    }

    fn read_ports(&mut self, switch: &str) -> std::result::Result<Vec<PortReading>, SampleParseError> {
        let output = (self.dump)(switch)
            .map_err(|e| SampleParseError::Source(switch.to_owned(), e.to_string()))?;
        Ok(parse_dump_ports(&output))
    }
}

/// pkts, bytes and drops of one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DirectionCounters {
    packets: u64,
    bytes: u64,
    drops: u64,
}

// rx pkts=8, bytes=648, drop=0, errs=0, frame=0, over=0, crc=0
// tx pkts=24, bytes=2016, drop=?, errs=0, coll=0
impl std::str::FromStr for DirectionCounters {
    type Err = SampleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut packets = None;
        let mut bytes = None;
        let mut drops = None;

        let body = s
            .trim()
            .strip_prefix("rx")
            .or_else(|| s.trim().strip_prefix("tx"))
            .ok_or_else(|| SampleParseError::NoStats(s.to_owned()))?;

        for tok in body.split(',') {
            let tok = tok.trim();
            if tok.is_empty() {
                continue;
            }
            let (key, value) = tok
                .split_once('=')
                .ok_or_else(|| SampleParseError::ParseField(tok.to_owned(), "no '='".to_owned()))?;
            // counters a datapath does not support are printed as '?'
            let parse = |v: &str| -> Result<u64, SampleParseError> {
                if v == "?" {
                    return Ok(0);
                }
                v.parse()
                    .map_err(|e: std::num::ParseIntError| SampleParseError::ParseField(key.to_owned(), e.to_string()))
            };
            match key {
                "pkts" => packets = Some(parse(value)?),
                "bytes" => bytes = Some(parse(value)?),
                "drop" => drops = Some(parse(value)?),
                _ => {
                    log::trace!("parse port stats, ignoring {} {}", key, value);
                }
            }
        }

        Ok(DirectionCounters {
            packets: packets.ok_or(SampleParseError::MissingField("pkts"))?,
            bytes: bytes.ok_or(SampleParseError::MissingField("bytes"))?,
            drops: drops.ok_or(SampleParseError::MissingField("drop"))?,
        })
    }
}

/// `Ok(None)` for the LOCAL port, which is not a fabric link.
fn parse_port_id(s: &str) -> Result<Option<PortNo>, SampleParseError> {
    let s = s.trim().trim_matches('"');
    if s == "LOCAL" {
        return Ok(None);
    }
    if let Ok(port) = s.parse() {
        return Ok(Some(port));
    }
    // newer ovs-ofctl prints interface names, e.g. "leaf1-eth3"
    s.rsplit_once("-eth")
        .and_then(|(_, n)| n.parse().ok())
        .map(Some)
        .ok_or_else(|| SampleParseError::PortId(s.to_owned()))
}

enum Pending {
    None,
    Skip,
    Rx(PortNo, DirectionCounters),
}

/// Parse the output of `ovs-ofctl dump-ports <switch>`:
///
/// ```text
/// OFPST_PORT reply (xid=0x2): 2 ports
///   port LOCAL: rx pkts=0, bytes=0, drop=0, errs=0, frame=0, over=0, crc=0
///            tx pkts=0, bytes=0, drop=0, errs=0, coll=0
///   port  1: rx pkts=8, bytes=648, drop=0, errs=0, frame=0, over=0, crc=0
///            tx pkts=24, bytes=2016, drop=0, errs=0, coll=0
/// ```
///
/// Every port yields one entry; a malformed port yields an error entry and
/// parsing carries on with the next one.
pub fn parse_dump_ports(output: &str) -> Vec<PortReading> {
    let mut readings = Vec::new();
    let mut pending = Pending::None;

    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("port") {
            if let Pending::Rx(port, _) = pending {
                readings.push(Err(SampleParseError::MissingTx(port)));
            }
            pending = match rest.split_once(':') {
                None => {
                    readings.push(Err(SampleParseError::NoStats(line.to_owned())));
                    Pending::Skip
                }
                Some((id, rx)) => match parse_port_id(id) {
                    Ok(None) => Pending::Skip,
                    Ok(Some(port)) => match rx.parse::<DirectionCounters>() {
                        Ok(rx) => Pending::Rx(port, rx),
                        Err(e) => {
                            readings.push(Err(e));
                            Pending::Skip
                        }
                    },
                    Err(e) => {
                        readings.push(Err(e));
                        Pending::Skip
                    }
                },
            };
        } else if line.starts_with("tx") {
            match std::mem::replace(&mut pending, Pending::None) {
                Pending::Rx(port, rx) => match line.parse::<DirectionCounters>() {
                    Ok(tx) => readings.push(Ok((
                        port,
                        PortCounters {
                            rx_packets: rx.packets,
                            rx_bytes: rx.bytes,
                            rx_drops: rx.drops,
                            tx_packets: tx.packets,
                            tx_bytes: tx.bytes,
                            tx_drops: tx.drops,
                        },
                    ))),
                    Err(e) => readings.push(Err(e)),
                },
                Pending::Skip | Pending::None => {}
            }
        } else {
            log::trace!("parse port stats, ignoring line: {}", line);
        }
    }

    if let Pending::Rx(port, _) = pending {
        readings.push(Err(SampleParseError::MissingTx(port)));
    }

    readings
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"
OFPST_PORT reply (xid=0x2): 3 ports
  port LOCAL: rx pkts=0, bytes=0, drop=0, errs=0, frame=0, over=0, crc=0
           tx pkts=0, bytes=0, drop=0, errs=0, coll=0
  port  1: rx pkts=8, bytes=648, drop=1, errs=0, frame=0, over=0, crc=0
           tx pkts=24, bytes=2016, drop=2, errs=0, coll=0
  port  "leaf1-eth5": rx pkts=3, bytes=300, drop=?, errs=0, frame=0, over=0, crc=0
           tx pkts=4, bytes=400, drop=0, errs=0, coll=0
           duration=12.5s
"#;

    #[test]
    fn parse_ofctl_dump_ports() {
        let readings = parse_dump_ports(DUMP);
        assert_eq!(readings.len(), 2);
        assert_eq!(
            readings[0],
            Ok((
                1,
                PortCounters {
                    rx_packets: 8,
                    rx_bytes: 648,
                    rx_drops: 1,
                    tx_packets: 24,
                    tx_bytes: 2016,
                    tx_drops: 2,
                }
            ))
        );
        let (port, counters) = readings[1].clone().unwrap();
        assert_eq!(port, 5);
        assert_eq!(counters.rx_drops, 0);
        assert_eq!(counters.tx_bytes, 400);
        assert_eq!(counters.total_drops(), 0);
    }

    #[test]
    fn malformed_entry_does_not_hide_the_rest() {
        let input = r#"
  port  1: rx pkts=x, bytes=648, drop=0
           tx pkts=24, bytes=2016, drop=0
  port  2: rx pkts=1, bytes=100, drop=0
  port  3: rx pkts=1, bytes=100, drop=0
           tx pkts=2, bytes=200, drop=0
  port  4: rx pkts=1, drop=0
           tx pkts=2, bytes=200, drop=0
"#;
        let readings = parse_dump_ports(input);
        assert_eq!(readings.len(), 4);
        assert!(matches!(readings[0], Err(SampleParseError::ParseField(ref k, _)) if k == "pkts"));
        assert_eq!(readings[1], Err(SampleParseError::MissingTx(2)));
        assert_eq!(readings[2].as_ref().unwrap().0, 3);
        assert_eq!(readings[3], Err(SampleParseError::MissingField("bytes")));
    }

    #[test]
    fn take_snapshot_skips_failures() {
        let mut source = OfctlCounterSource::new(
            vec!["leaf1".to_owned(), "spine1".to_owned()],
            |switch: &str| {
                if switch == "spine1" {
                    Err(std::io::Error::new(std::io::ErrorKind::Other, "unreachable"))
                } else {
                    Ok(DUMP.to_owned())
                }
            },
        );
        let snapshot = take_snapshot(&mut source, 42);
        assert_eq!(snapshot.timestamp, 42);
        assert_eq!(snapshot.ports.len(), 2);
        assert!(snapshot.get(&PortKey::new("leaf1", 1)).is_some());
        assert!(snapshot.get(&PortKey::new("leaf1", 5)).is_some());
        assert_eq!(PortKey::new("leaf1", 5).to_string(), "leaf1:5");
    }
}
