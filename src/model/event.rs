/// A triggering packet bound to the probe request it spawned and the
/// confirmation the prober eventually reported back, if any.
use std::collections::HashMap;

use crate::error::{AssembleError, AssembleResult};
use crate::model::packet::Packet;
use crate::model::probe::{ProbeConfirmation, ProbeRequest};

#[derive(Debug, Clone)]
pub struct Event {
    pub packet: Packet,
    pub probe_request: Option<ProbeRequest>,
    pub probe_confirmation: Option<ProbeConfirmation>,
    pub batch_id: Option<u64>,
}

impl Event {
    pub fn new(packet: Packet) -> Self {
        Event {
            packet,
            probe_request: None,
            probe_confirmation: None,
            batch_id: None,
        }
    }

    pub fn key(&self) -> Option<crate::model::packet::EventKey> {
        self.packet.key()
    }

    pub fn set_batch_id(&mut self, batch_id: u64) {
        self.batch_id = Some(batch_id);
        self.packet.set_batch_id(batch_id);
        if let Some(req) = self.probe_request.as_mut() {
            req.set_batch_id(batch_id);
        }
        if let Some(con) = self.probe_confirmation.as_mut() {
            con.set_batch_id(batch_id);
        }
    }

    pub fn bind_request(&mut self, request: ProbeRequest) {
        self.probe_request = Some(request);
    }

    pub fn bind_confirmation(&mut self, confirmation: ProbeConfirmation) {
        self.probe_confirmation = Some(confirmation);
    }

    pub fn is_acked(&self) -> bool {
        self.probe_confirmation.is_some()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("trigger".into(), self.packet.to_json());
        obj.insert(
            "reaction".into(),
            self.probe_request
                .as_ref()
                .map(|req| req.to_json())
                .unwrap_or(serde_json::Value::Null),
        );
        if let Some(con) = &self.probe_confirmation {
            obj.insert("probe_confirmation".into(), con.to_json());
        }
        serde_json::Value::Object(obj)
    }

    /// Reads an hourly event log entry: a triggering packet plus, if the
    /// honeypot reacted, the probe request it sent out.
    pub fn from_json(v: &serde_json::Value) -> AssembleResult<Self> {
        let obj = v
            .as_object()
            .ok_or_else(|| AssembleError::schema_mismatch("event", "not an object"))?;
        let trigger = obj
            .get("trigger")
            .ok_or_else(|| AssembleError::schema_mismatch("event", "missing trigger"))?;
        let packet = Packet::from_json(trigger)?;
        let probe_request = match obj.get("reaction") {
            Some(serde_json::Value::Null) | None => None,
            Some(v) => Some(ProbeRequest::from_json(v)?),
        };
        Ok(Event {
            packet,
            probe_request,
            probe_confirmation: None,
            batch_id: None,
        })
    }

    /// CSV rows carry trigger and reaction fields flattened into one row,
    /// gated by a `probed` column.
    pub fn from_csv_row(row: &HashMap<String, String>) -> AssembleResult<Self> {
        let packet = Packet::from_csv_row(row)?;
        let probed = row.get("probed").map(|s| s.as_str()) == Some("true");
        let probe_request = if probed {
            Some(ProbeRequest::from_csv_row(row)?)
        } else {
            None
        };
        Ok(Event {
            packet,
            probe_request,
            probe_confirmation: None,
            batch_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::protocols::{Protocol, TcpPayload, TcpFlags};
    use chrono::Utc;
    use std::net::Ipv4Addr;

    fn sample_packet() -> Packet {
        Packet {
            observed: Utc::now(),
            saddr: "192.0.2.1".parse::<Ipv4Addr>().unwrap(),
            daddr: "192.0.2.2".parse::<Ipv4Addr>().unwrap(),
            ipid: 1,
            ttl: 64,
            protocol: Protocol::Tcp(TcpPayload {
                sport: 1234,
                dport: 42,
                snum: 0,
                anum: 0,
                window_size: 65535,
                flags: TcpFlags { syn: true, ..Default::default() },
                options: Vec::new(),
                payload: String::new(),
            }),
            batch_id: None,
        }
    }

    #[test]
    fn set_batch_id_cascades_to_children() {
        let mut event = Event::new(sample_packet());
        event.bind_request(ProbeRequest {
            saddr: "192.0.2.2".parse().unwrap(),
            daddr: "192.0.2.1".parse().unwrap(),
            sport: 42,
            dport: 1234,
            anum: 0,
            snum: 0,
            userid: 1,
            method: "tcp-synack".into(),
            num_probes: 1,
            payload: String::new(),
            batch_id: None,
        });
        event.set_batch_id(7);
        assert_eq!(event.batch_id, Some(7));
        assert_eq!(event.packet.batch_id, Some(7));
        assert_eq!(event.probe_request.unwrap().batch_id, Some(7));
    }

    #[test]
    fn is_acked_requires_confirmation() {
        let event = Event::new(sample_packet());
        assert!(!event.is_acked());
    }
}
