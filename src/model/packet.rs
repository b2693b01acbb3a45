/// A captured honeypot observation.
use std::collections::HashMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{AssembleError, AssembleResult};
use crate::model::protocols::{IcmpPayload, Protocol, TcpPayload, UdpPayload};

/// Key used to bucket packets in the phase matcher: (saddr, daddr, dport).
pub type EventKey = (Ipv4Addr, Ipv4Addr, u16);

/// Signature used to detect retransmits: (saddr, daddr, sport, dport, seq).
pub type RetransmitSignature = (Ipv4Addr, Ipv4Addr, u16, u16, u32);

#[derive(Debug, Clone)]
pub struct Packet {
    pub observed: DateTime<Utc>,
    pub saddr: Ipv4Addr,
    pub daddr: Ipv4Addr,
    pub ipid: u16,
    pub ttl: u8,
    pub protocol: Protocol,
    pub batch_id: Option<u64>,
}

impl Packet {
    pub fn set_batch_id(&mut self, batch_id: u64) {
        self.batch_id = Some(batch_id);
    }

    /// `(saddr, daddr, dport)` — only meaningful for TCP/UDP packets.
    pub fn key(&self) -> Option<EventKey> {
        self.protocol
            .dport()
            .map(|dport| (self.saddr, self.daddr, dport))
    }

    pub fn retransmit_signature(&self) -> Option<RetransmitSignature> {
        let tcp = self.protocol.as_tcp()?;
        Some((self.saddr, self.daddr, tcp.sport, tcp.dport, tcp.snum))
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.observed.timestamp()
    }

    pub fn from_json(v: &serde_json::Value) -> AssembleResult<Self> {
        let obj = v
            .as_object()
            .ok_or_else(|| AssembleError::schema_mismatch("packet", "not a JSON object"))?;
        let saddr = field_ip(obj, "saddr")?;
        let daddr = field_ip(obj, "daddr")?;
        let ttl = obj
            .get("ttl")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| AssembleError::schema_mismatch("packet", "missing ttl"))? as u8;
        let ipid = obj
            .get("ipid")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| AssembleError::schema_mismatch("packet", "missing ipid"))? as u16;
        let observed_ms = obj
            .get("observed")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| AssembleError::schema_mismatch("packet", "missing observed"))?;
        let observed = millis_to_datetime(observed_ms as i64);

        let protocol = if let Some(serde_json::Value::Object(tcp)) = obj.get("tcp") {
            Protocol::Tcp(TcpPayload::from_json(tcp)?)
        } else if let Some(serde_json::Value::Object(udp)) = obj.get("udp") {
            Protocol::Udp(UdpPayload::from_json(udp)?)
        } else if let Some(serde_json::Value::Object(icmp)) = obj.get("icmp") {
            Protocol::Icmp(IcmpPayload::from_json(icmp)?)
        } else {
            return Err(AssembleError::schema_mismatch(
                "packet",
                "none of tcp/udp/icmp present",
            ));
        };

        Ok(Packet {
            observed,
            saddr,
            daddr,
            ipid,
            ttl,
            protocol,
            batch_id: None,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "observed".into(),
            (self.observed.timestamp_millis()).into(),
        );
        obj.insert("saddr".into(), self.saddr.to_string().into());
        obj.insert("daddr".into(), self.daddr.to_string().into());
        obj.insert("ttl".into(), self.ttl.into());
        obj.insert("ipid".into(), self.ipid.into());
        match &self.protocol {
            Protocol::Tcp(p) => {
                obj.insert("tcp".into(), p.to_json());
            }
            Protocol::Udp(p) => {
                obj.insert("udp".into(), p.to_json());
            }
            Protocol::Icmp(p) => {
                obj.insert("icmp".into(), p.to_json());
            }
        }
        serde_json::Value::Object(obj)
    }

    pub fn from_csv_row(row: &HashMap<String, String>) -> AssembleResult<Self> {
        let saddr = row_ip(row, "saddr")?;
        let daddr = row_ip(row, "daddr")?;
        let ttl: u8 = row_parse(row, "ttl")?;
        let ipid: u16 = row_parse(row, "ipid")?;
        let ts_ms: i64 = row_parse(row, "ts")?;
        let observed = millis_to_datetime(ts_ms);
        let proto = row
            .get("proto")
            .ok_or_else(|| AssembleError::schema_mismatch("packet", "missing proto"))?
            .as_str();

        let protocol = match proto {
            "tcp" => Protocol::Tcp(TcpPayload::from_csv_row(row)?),
            "udp" => Protocol::Udp(UdpPayload::from_csv_row(row)?),
            "icmp" => Protocol::Icmp(IcmpPayload::from_csv_row(row)?),
            other => {
                return Err(AssembleError::schema_mismatch(
                    "packet",
                    format!("unknown proto '{other}'"),
                ))
            }
        };

        Ok(Packet {
            observed,
            saddr,
            daddr,
            ipid,
            ttl,
            protocol,
            batch_id: None,
        })
    }
}

pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

fn field_ip(obj: &serde_json::Map<String, serde_json::Value>, name: &str) -> AssembleResult<Ipv4Addr> {
    obj.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AssembleError::schema_mismatch("packet", format!("missing field '{name}'")))?
        .parse()
        .map_err(|_| AssembleError::schema_mismatch("packet", format!("bad address in '{name}'")))
}

fn row_ip(row: &HashMap<String, String>, name: &str) -> AssembleResult<Ipv4Addr> {
    row.get(name)
        .ok_or_else(|| AssembleError::schema_mismatch("packet", format!("missing column '{name}'")))?
        .parse()
        .map_err(|_| AssembleError::schema_mismatch("packet", format!("bad address in '{name}'")))
}

fn row_parse<T: std::str::FromStr>(row: &HashMap<String, String>, name: &str) -> AssembleResult<T> {
    row.get(name)
        .ok_or_else(|| AssembleError::schema_mismatch("packet", format!("missing column '{name}'")))?
        .parse()
        .map_err(|_| AssembleError::schema_mismatch("packet", format!("bad value for '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "observed": 1_599_487_200_000i64,
            "saddr": "192.0.2.1",
            "daddr": "192.0.2.2",
            "ttl": 231,
            "ipid": 61602,
            "tcp": {
                "sport": 22734,
                "dport": 42,
                "snum": 1298127,
                "anum": 0,
                "window_size": 65535,
                "syn": true,
                "options": {},
                "payload": "",
            }
        })
    }

    #[test]
    fn parses_tcp_json_packet() {
        let pkt = Packet::from_json(&sample_json()).unwrap();
        assert_eq!(pkt.saddr, "192.0.2.1".parse::<Ipv4Addr>().unwrap());
        let tcp = pkt.protocol.as_tcp().unwrap();
        assert_eq!(tcp.sport, 22734);
        assert!(tcp.flags.syn);
        assert!(!tcp.flags.ack);
    }

    #[test]
    fn round_trips_matching_fields_through_json() {
        let pkt = Packet::from_json(&sample_json()).unwrap();
        let again = Packet::from_json(&pkt.to_json()).unwrap();
        assert_eq!(pkt.saddr, again.saddr);
        assert_eq!(pkt.daddr, again.daddr);
        assert_eq!(pkt.ipid, again.ipid);
        assert_eq!(pkt.ttl, again.ttl);
        assert_eq!(pkt.observed.timestamp_millis(), again.observed.timestamp_millis());
        let (a, b) = (pkt.protocol.as_tcp().unwrap(), again.protocol.as_tcp().unwrap());
        assert_eq!(a.sport, b.sport);
        assert_eq!(a.dport, b.dport);
        assert_eq!(a.snum, b.snum);
        assert_eq!(a.anum, b.anum);
        assert_eq!(a.flags, b.flags);
    }

    #[test]
    fn key_uses_dport_for_tcp() {
        let pkt = Packet::from_json(&sample_json()).unwrap();
        assert_eq!(pkt.key(), Some((pkt.saddr, pkt.daddr, 42)));
    }

    #[test]
    fn from_csv_row_parses_flags_and_proto() {
        let mut row = HashMap::new();
        for (k, v) in [
            ("ts", "1599487200000"),
            ("saddr", "192.0.2.1"),
            ("daddr", "192.0.2.2"),
            ("ipid", "61602"),
            ("ttl", "231"),
            ("proto", "tcp"),
            ("sport", "22734"),
            ("dport", "42"),
            ("anum", "0"),
            ("snum", "1298127"),
            ("options", ""),
            ("payload", ""),
            ("syn", "1"),
            ("ack", "0"),
            ("rst", "0"),
            ("fin", "0"),
            ("window size", "65535"),
        ] {
            row.insert(k.to_string(), v.to_string());
        }
        let pkt = Packet::from_csv_row(&row).unwrap();
        let tcp = pkt.protocol.as_tcp().unwrap();
        assert!(tcp.flags.syn);
        assert_eq!(tcp.snum, 1298127);
    }
}
