/// Probe requests (honeypot → prober) and probe confirmations (prober →
/// honeypot), and the key they are matched on.
use std::collections::HashMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{AssembleError, AssembleResult};
use crate::model::packet::millis_to_datetime;

/// (saddr, daddr, sport, dport, method, userid) — the prober's perspective.
pub type ProbeKey = (Ipv4Addr, Ipv4Addr, u16, u16, String, u32);

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub saddr: Ipv4Addr,
    pub daddr: Ipv4Addr,
    pub sport: u16,
    pub dport: u16,
    pub anum: u32,
    pub snum: u32,
    pub userid: u32,
    pub method: String,
    pub num_probes: u32,
    pub payload: String,
    pub batch_id: Option<u64>,
}

impl ProbeRequest {
    pub fn set_batch_id(&mut self, batch_id: u64) {
        self.batch_id = Some(batch_id);
    }

    pub fn key(&self) -> ProbeKey {
        (
            self.saddr,
            self.daddr,
            self.sport,
            self.dport,
            self.method.clone(),
            self.userid,
        )
    }

    pub fn from_json(v: &serde_json::Value) -> AssembleResult<Self> {
        let obj = v
            .as_object()
            .ok_or_else(|| AssembleError::schema_mismatch("probe_request", "not an object"))?;
        Ok(ProbeRequest {
            saddr: field_ip(obj, "saddr")?,
            daddr: field_ip(obj, "daddr")?,
            sport: field_u16(obj, "sport")?,
            dport: field_u16(obj, "dport")?,
            anum: field_u32(obj, "anum")?,
            snum: field_u32(obj, "snum")?,
            userid: field_u32(obj, "userid")?,
            method: field_str(obj, "method")?,
            num_probes: field_u32(obj, "num_probes")?,
            payload: obj
                .get("payload")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            batch_id: None,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "saddr": self.saddr.to_string(),
            "daddr": self.daddr.to_string(),
            "sport": self.sport,
            "dport": self.dport,
            "anum": self.anum,
            "snum": self.snum,
            "userid": self.userid,
            "method": self.method,
            "num_probes": self.num_probes,
            "payload": self.payload,
        })
    }

    /// Built from the same CSV row as the triggering packet: source and
    /// destination (and ports) are swapped, because the row describes what
    /// the *prober* will send, not what the honeypot received.
    pub fn from_csv_row(row: &HashMap<String, String>) -> AssembleResult<Self> {
        let triggered_saddr = row_ip(row, "saddr")?;
        let triggered_daddr = row_ip(row, "daddr")?;
        let triggered_sport: u16 = row_parse(row, "sport")?;
        let triggered_dport: u16 = row_parse(row, "dport")?;
        Ok(ProbeRequest {
            saddr: triggered_daddr,
            daddr: triggered_saddr,
            sport: triggered_dport,
            dport: triggered_sport,
            anum: row_parse(row, "probe anum")?,
            snum: row_parse(row, "probe snum")?,
            userid: row_parse(row, "userid")?,
            method: row
                .get("method")
                .ok_or_else(|| AssembleError::schema_mismatch("probe_request", "missing method"))?
                .clone(),
            num_probes: row_parse(row, "num probes")?,
            payload: String::new(),
            batch_id: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfirmation {
    pub sport: u16,
    pub dport: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub userid: u32,
    pub method: String,
    pub payload: String,
    pub ping_sent: u32,
    pub probe_size: u32,
    pub timestamp: DateTime<Utc>,
    pub ttl: u8,
    pub version: String,
    pub batch_id: Option<u64>,
}

impl ProbeConfirmation {
    pub fn set_batch_id(&mut self, batch_id: u64) {
        self.batch_id = Some(batch_id);
    }

    /// (src, dst, sport, dport, method, userid) — matched against
    /// `ProbeRequest::key()` by strict equality.
    pub fn key(&self) -> ProbeKey {
        (
            self.src,
            self.dst,
            self.sport,
            self.dport,
            self.method.clone(),
            self.userid,
        )
    }

    pub fn from_json(v: &serde_json::Value) -> AssembleResult<Self> {
        let obj = v.as_object().ok_or_else(|| {
            AssembleError::schema_mismatch("probe_confirmation", "not an object")
        })?;
        let timestamp = if let Some(serde_json::Value::Object(start)) = obj.get("start") {
            let sec = start
                .get("sec")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| AssembleError::schema_mismatch("probe_confirmation", "missing start.sec"))?;
            let usec = start.get("usec").and_then(|v| v.as_i64()).unwrap_or(0);
            Utc.timestamp_opt(sec, (usec * 1000) as u32)
                .single()
                .ok_or_else(|| AssembleError::schema_mismatch("probe_confirmation", "bad start time"))?
        } else if let Some(ts) = obj.get("timestamp").and_then(|v| v.as_i64()) {
            Utc.timestamp_opt(ts, 0)
                .single()
                .ok_or_else(|| AssembleError::schema_mismatch("probe_confirmation", "bad timestamp"))?
        } else {
            return Err(AssembleError::schema_mismatch(
                "probe_confirmation",
                "missing start/timestamp",
            ));
        };

        Ok(ProbeConfirmation {
            sport: field_u16(obj, "sport")?,
            dport: field_u16(obj, "dport")?,
            src: field_ip(obj, "src")?,
            dst: field_ip(obj, "dst")?,
            userid: field_u32(obj, "userid")?,
            method: field_str(obj, "method")?,
            payload: obj
                .get("payload")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            ping_sent: field_u32(obj, "ping_sent")?,
            probe_size: field_u32(obj, "probe_size")?,
            timestamp,
            ttl: obj.get("ttl").and_then(|v| v.as_u64()).unwrap_or(0) as u8,
            version: obj
                .get("version")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            batch_id: None,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "sport": self.sport,
            "dport": self.dport,
            "src": self.src.to_string(),
            "dst": self.dst.to_string(),
            "userid": self.userid,
            "method": self.method,
            "payload": self.payload,
            "ping_sent": self.ping_sent,
            "probe_size": self.probe_size,
            "timestamp": self.timestamp.timestamp_millis(),
            "ttl": self.ttl,
            "version": self.version,
        })
    }

    pub fn from_csv_row(row: &HashMap<String, String>) -> AssembleResult<Self> {
        let timestamp = if row.contains_key("start sec") && row.contains_key("start usec") {
            let sec: i64 = row_parse(row, "start sec")?;
            let usec: i64 = row_parse(row, "start usec")?;
            millis_to_datetime(sec * 1000 + usec / 1000)
        } else {
            let ts: i64 = row_parse(row, "timestamp")?;
            millis_to_datetime(ts * 1000)
        };
        Ok(ProbeConfirmation {
            sport: row_parse(row, "sport")?,
            dport: row_parse(row, "dport")?,
            src: row_ip(row, "saddr")?,
            dst: row_ip(row, "daddr")?,
            userid: row_parse(row, "userid")?,
            method: row
                .get("method")
                .ok_or_else(|| AssembleError::schema_mismatch("probe_confirmation", "missing method"))?
                .clone(),
            payload: String::new(),
            ping_sent: row_parse(row, "num probes")?,
            probe_size: 0,
            timestamp,
            ttl: 0,
            version: String::new(),
            batch_id: None,
        })
    }
}

fn field_str(obj: &serde_json::Map<String, serde_json::Value>, name: &str) -> AssembleResult<String> {
    obj.get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| AssembleError::schema_mismatch("probe", format!("missing field '{name}'")))
}

fn field_u16(obj: &serde_json::Map<String, serde_json::Value>, name: &str) -> AssembleResult<u16> {
    obj.get(name)
        .and_then(|v| v.as_u64())
        .map(|v| v as u16)
        .ok_or_else(|| AssembleError::schema_mismatch("probe", format!("missing field '{name}'")))
}

fn field_u32(obj: &serde_json::Map<String, serde_json::Value>, name: &str) -> AssembleResult<u32> {
    obj.get(name)
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .ok_or_else(|| AssembleError::schema_mismatch("probe", format!("missing field '{name}'")))
}

fn field_ip(obj: &serde_json::Map<String, serde_json::Value>, name: &str) -> AssembleResult<Ipv4Addr> {
    obj.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AssembleError::schema_mismatch("probe", format!("missing field '{name}'")))?
        .parse()
        .map_err(|_| AssembleError::schema_mismatch("probe", format!("bad address in '{name}'")))
}

fn row_ip(row: &HashMap<String, String>, name: &str) -> AssembleResult<Ipv4Addr> {
    row.get(name)
        .ok_or_else(|| AssembleError::schema_mismatch("probe", format!("missing column '{name}'")))?
        .parse()
        .map_err(|_| AssembleError::schema_mismatch("probe", format!("bad address in '{name}'")))
}

fn row_parse<T: std::str::FromStr>(row: &HashMap<String, String>, name: &str) -> AssembleResult<T> {
    row.get(name)
        .ok_or_else(|| AssembleError::schema_mismatch("probe", format!("missing column '{name}'")))?
        .parse()
        .map_err(|_| AssembleError::schema_mismatch("probe", format!("bad value for '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_and_confirmation_key_match_when_equal() {
        let req = ProbeRequest {
            saddr: "192.0.2.1".parse().unwrap(),
            daddr: "192.0.2.2".parse().unwrap(),
            sport: 42,
            dport: 22734,
            anum: 0,
            snum: 0,
            userid: 7,
            method: "tcp-synack".to_string(),
            num_probes: 1,
            payload: String::new(),
            batch_id: None,
        };
        let con = ProbeConfirmation {
            sport: 42,
            dport: 22734,
            src: "192.0.2.1".parse().unwrap(),
            dst: "192.0.2.2".parse().unwrap(),
            userid: 7,
            method: "tcp-synack".to_string(),
            payload: String::new(),
            ping_sent: 1,
            probe_size: 0,
            timestamp: Utc::now(),
            ttl: 64,
            version: String::new(),
            batch_id: None,
        };
        assert_eq!(req.key(), con.key());
    }

    #[test]
    fn csv_request_swaps_perspective() {
        let mut row = HashMap::new();
        for (k, v) in [
            ("saddr", "192.0.2.1"),
            ("daddr", "192.0.2.2"),
            ("sport", "22734"),
            ("dport", "42"),
            ("probe anum", "0"),
            ("probe snum", "1298130"),
            ("userid", "7"),
            ("method", "tcp-synack"),
            ("num probes", "1"),
        ] {
            row.insert(k.to_string(), v.to_string());
        }
        let req = ProbeRequest::from_csv_row(&row).unwrap();
        assert_eq!(req.saddr, "192.0.2.2".parse::<Ipv4Addr>().unwrap());
        assert_eq!(req.daddr, "192.0.2.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(req.sport, 42);
        assert_eq!(req.dport, 22734);
    }
}
