/// Protocol-specific packet payloads.
///
/// A packet's `proto` tag selects exactly one of these; modeled as a closed
/// enum rather than a trait object since the wire format only ever carries
/// `tcp`, `udp`, or `icmp` (spec design note: dynamic-typed record dispatch).
use std::collections::HashMap;

use crate::error::{AssembleError, AssembleResult};

/// TCP flag bits present on a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
    pub ns: bool,
}

/// All flag names in wire order, used by both the JSON and CSV codecs.
pub const ALL_TCP_FLAGS: [&str; 9] = [
    "fin", "syn", "rst", "psh", "ack", "urg", "ece", "cwr", "ns",
];

impl TcpFlags {
    pub fn is_empty(&self) -> bool {
        !(self.fin
            || self.syn
            || self.rst
            || self.psh
            || self.ack
            || self.urg
            || self.ece
            || self.cwr
            || self.ns)
    }

    fn set(&mut self, name: &str, value: bool) {
        match name {
            "fin" => self.fin = value,
            "syn" => self.syn = value,
            "rst" => self.rst = value,
            "psh" => self.psh = value,
            "ack" => self.ack = value,
            "urg" => self.urg = value,
            "ece" => self.ece = value,
            "cwr" => self.cwr = value,
            "ns" => self.ns = value,
            _ => {}
        }
    }

    fn get(&self, name: &str) -> bool {
        match name {
            "fin" => self.fin,
            "syn" => self.syn,
            "rst" => self.rst,
            "psh" => self.psh,
            "ack" => self.ack,
            "urg" => self.urg,
            "ece" => self.ece,
            "cwr" => self.cwr,
            "ns" => self.ns,
            _ => false,
        }
    }

    /// Parse from explicit JSON boolean keys sitting alongside the other TCP
    /// fields (e.g. `{"syn": true, "ack": false, ...}`).
    pub fn from_json_obj(obj: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut flags = TcpFlags::default();
        for name in ALL_TCP_FLAGS {
            if let Some(v) = obj.get(name) {
                if v.as_bool().unwrap_or(false) {
                    flags.set(name, true);
                }
            }
        }
        flags
    }

    pub fn to_json_fields(&self, obj: &mut serde_json::Map<String, serde_json::Value>) {
        for name in ALL_TCP_FLAGS {
            obj.insert(name.to_string(), serde_json::Value::Bool(self.get(name)));
        }
    }

    /// Parse from a CSV row where each flag has its own `"0"`/`"1"` column.
    pub fn from_csv_row(row: &HashMap<String, String>) -> Self {
        let mut flags = TcpFlags::default();
        for name in ALL_TCP_FLAGS {
            if row.get(name).map(|v| v.as_str()) == Some("1") {
                flags.set(name, true);
            }
        }
        flags
    }
}

#[derive(Debug, Clone)]
pub struct TcpPayload {
    pub sport: u16,
    pub dport: u16,
    pub snum: u32,
    pub anum: u32,
    pub window_size: u16,
    pub flags: TcpFlags,
    /// Option names only — values are not used by matching (§8 round-trip
    /// only promises fields matching depends on).
    pub options: Vec<String>,
    pub payload: String,
}

impl TcpPayload {
    pub fn from_json(obj: &serde_json::Map<String, serde_json::Value>) -> AssembleResult<Self> {
        let sport = field_u16(obj, "sport")?;
        let dport = field_u16(obj, "dport")?;
        let snum = field_u32(obj, "snum")?;
        let anum = field_u32(obj, "anum")?;
        let window_size = field_u16(obj, "window_size")?;
        let flags = TcpFlags::from_json_obj(obj);
        let options = match obj.get("options") {
            Some(serde_json::Value::Object(m)) => m.keys().cloned().collect(),
            _ => Vec::new(),
        };
        let payload = obj
            .get("payload")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(TcpPayload {
            sport,
            dport,
            snum,
            anum,
            window_size,
            flags,
            options,
            payload,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("sport".into(), self.sport.into());
        obj.insert("dport".into(), self.dport.into());
        obj.insert("snum".into(), self.snum.into());
        obj.insert("anum".into(), self.anum.into());
        obj.insert("window_size".into(), self.window_size.into());
        self.flags.to_json_fields(&mut obj);
        let options: serde_json::Map<String, serde_json::Value> = self
            .options
            .iter()
            .map(|name| (name.clone(), serde_json::Value::Null))
            .collect();
        obj.insert("options".into(), serde_json::Value::Object(options));
        obj.insert("payload".into(), self.payload.clone().into());
        serde_json::Value::Object(obj)
    }

    pub fn from_csv_row(row: &HashMap<String, String>) -> AssembleResult<Self> {
        let sport = row_u16(row, "sport")?;
        let dport = row_u16(row, "dport")?;
        let snum = row_u32(row, "snum")?;
        let anum = row_u32(row, "anum")?;
        let window_size = row_u16(row, "window size")?;
        let flags = TcpFlags::from_csv_row(row);
        let options = match row.get("options") {
            Some(s) if !s.is_empty() => s.split(':').map(|s| s.to_string()).collect(),
            _ => Vec::new(),
        };
        let payload = row.get("payload").cloned().unwrap_or_default();
        Ok(TcpPayload {
            sport,
            dport,
            snum,
            anum,
            window_size,
            flags,
            options,
            payload,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UdpPayload {
    pub sport: u16,
    pub dport: u16,
    pub payload: String,
}

impl UdpPayload {
    pub fn from_json(obj: &serde_json::Map<String, serde_json::Value>) -> AssembleResult<Self> {
        Ok(UdpPayload {
            sport: field_u16(obj, "sport")?,
            dport: field_u16(obj, "dport")?,
            payload: obj
                .get("payload")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "sport": self.sport,
            "dport": self.dport,
            "payload": self.payload,
        })
    }

    pub fn from_csv_row(row: &HashMap<String, String>) -> AssembleResult<Self> {
        Ok(UdpPayload {
            sport: row_u16(row, "sport")?,
            dport: row_u16(row, "dport")?,
            payload: row.get("payload").cloned().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct IcmpPayload {
    pub method: String,
    pub payload: String,
}

impl IcmpPayload {
    pub fn from_json(obj: &serde_json::Map<String, serde_json::Value>) -> AssembleResult<Self> {
        let method = obj
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AssembleError::schema_mismatch("packet", "missing icmp.type"))?
            .to_string();
        let payload = obj
            .get("unreachable")
            .and_then(|v| v.as_str())
            .unwrap_or("empty")
            .to_string();
        Ok(IcmpPayload { method, payload })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.method,
            "unreachable": if self.payload == "empty" { None } else { Some(self.payload.clone()) },
        })
    }

    pub fn from_csv_row(row: &HashMap<String, String>) -> AssembleResult<Self> {
        Ok(IcmpPayload {
            method: row.get("options").cloned().unwrap_or_default(),
            payload: String::new(),
        })
    }
}

/// A packet's protocol-specific payload.
#[derive(Debug, Clone)]
pub enum Protocol {
    Tcp(TcpPayload),
    Udp(UdpPayload),
    Icmp(IcmpPayload),
}

impl Protocol {
    pub fn tag(&self) -> &'static str {
        match self {
            Protocol::Tcp(_) => "tcp",
            Protocol::Udp(_) => "udp",
            Protocol::Icmp(_) => "icmp",
        }
    }

    pub fn as_tcp(&self) -> Option<&TcpPayload> {
        match self {
            Protocol::Tcp(p) => Some(p),
            _ => None,
        }
    }

    pub fn dport(&self) -> Option<u16> {
        match self {
            Protocol::Tcp(p) => Some(p.dport),
            Protocol::Udp(p) => Some(p.dport),
            Protocol::Icmp(_) => None,
        }
    }

    pub fn sport(&self) -> Option<u16> {
        match self {
            Protocol::Tcp(p) => Some(p.sport),
            Protocol::Udp(p) => Some(p.sport),
            Protocol::Icmp(_) => None,
        }
    }
}

fn field_u16(obj: &serde_json::Map<String, serde_json::Value>, name: &str) -> AssembleResult<u16> {
    obj.get(name)
        .and_then(|v| v.as_u64())
        .map(|v| v as u16)
        .ok_or_else(|| AssembleError::schema_mismatch("packet", format!("missing field '{name}'")))
}

fn field_u32(obj: &serde_json::Map<String, serde_json::Value>, name: &str) -> AssembleResult<u32> {
    obj.get(name)
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .ok_or_else(|| AssembleError::schema_mismatch("packet", format!("missing field '{name}'")))
}

fn row_u16(row: &HashMap<String, String>, name: &str) -> AssembleResult<u16> {
    row.get(name)
        .ok_or_else(|| AssembleError::schema_mismatch("packet", format!("missing column '{name}'")))?
        .parse()
        .map_err(|_| AssembleError::schema_mismatch("packet", format!("bad value for '{name}'")))
}

fn row_u32(row: &HashMap<String, String>, name: &str) -> AssembleResult<u32> {
    row.get(name)
        .ok_or_else(|| AssembleError::schema_mismatch("packet", format!("missing column '{name}'")))?
        .parse()
        .map_err(|_| AssembleError::schema_mismatch("packet", format!("bad value for '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_empty_when_unset() {
        assert!(TcpFlags::default().is_empty());
    }

    #[test]
    fn flags_from_csv_row() {
        let mut row = HashMap::new();
        row.insert("syn".to_string(), "1".to_string());
        row.insert("ack".to_string(), "0".to_string());
        let flags = TcpFlags::from_csv_row(&row);
        assert!(flags.syn);
        assert!(!flags.ack);
        assert!(!flags.is_empty());
    }

    #[test]
    fn tcp_payload_json_round_trips_matching_fields() {
        let mut obj = serde_json::Map::new();
        obj.insert("sport".into(), 41725.into());
        obj.insert("dport".into(), 42.into());
        obj.insert("snum".into(), 1298130u64.into());
        obj.insert("anum".into(), 0u64.into());
        obj.insert("window_size".into(), 65535u64.into());
        obj.insert("syn".into(), true.into());
        let parsed = TcpPayload::from_json(&obj).unwrap();
        assert_eq!(parsed.sport, 41725);
        assert!(parsed.flags.syn);
        assert!(parsed.options.is_empty());
    }
}
