/// Matches probe confirmations (prober → honeypot) to the events whose
/// probe request triggered them.
///
/// Grounded on `ConfirmationMatcher` in the original confirmation matcher:
/// confirmations are cached by userid, events stay cached until a matching
/// confirmation shows up or their batch is evicted, and batches are dropped
/// once three distinct batch ids have been observed.
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::io::LiveReader;
use crate::model::{Event, ProbeConfirmation, ProbeKey};

pub struct ConfirmationMatcher {
    confirmation_reader: LiveReader<ProbeConfirmation>,
    event_reader: LiveReader<Event>,

    ccache: HashMap<u32, Vec<ProbeConfirmation>>,
    ccount: usize,
    ecache: Vec<Event>,

    last_confirmation_ts: Option<DateTime<Utc>>,
    last_event_ts: Option<DateTime<Utc>>,

    probe_timeout: Duration,

    batch_id_order: Vec<u64>,
    observed_batch_ids: std::collections::HashSet<u64>,
}

impl ConfirmationMatcher {
    pub fn new(
        confirmation_reader: LiveReader<ProbeConfirmation>,
        event_reader: LiveReader<Event>,
        probe_timeout: Duration,
    ) -> Self {
        let first_batch_id = confirmation_reader.upcoming_batch_id();
        let previous = first_batch_id.saturating_sub(1);
        let batch_id_order = vec![previous, first_batch_id];
        let observed_batch_ids = batch_id_order.iter().copied().collect();

        ConfirmationMatcher {
            confirmation_reader,
            event_reader,
            ccache: HashMap::new(),
            ccount: 0,
            ecache: Vec::new(),
            last_confirmation_ts: None,
            last_event_ts: None,
            probe_timeout,
            batch_id_order,
            observed_batch_ids,
        }
    }

    pub fn last_event_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_event_ts
    }

    pub fn last_confirmation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_confirmation_ts
    }

    pub fn events_cached(&self) -> usize {
        self.ecache.len()
    }

    pub fn confirmations_cached(&self) -> usize {
        self.ccount
    }

    pub fn load_confirmations(&mut self) {
        let confirmations = self.confirmation_reader.next_batch();
        for con in &confirmations {
            if self.last_confirmation_ts.map_or(true, |ts| ts < con.timestamp) {
                self.last_confirmation_ts = Some(con.timestamp);
            }
        }
        debug!(count = confirmations.len(), "loaded confirmations");
        self.ccount += confirmations.len();
        for con in confirmations {
            self.ccache.entry(con.userid).or_default().push(con);
        }
    }

    pub fn load_events(&mut self) {
        let before = self.ecache.len();
        let batch = self.event_reader.next_batch();
        for event in &batch {
            if self.last_event_ts.map_or(true, |ts| ts < event.packet.observed) {
                self.last_event_ts = Some(event.packet.observed);
            }
        }
        self.ecache.extend(batch);
        debug!(loaded = self.ecache.len() - before, "loaded events");
    }

    fn evict_confirmations(&mut self, batch_id: u64) {
        let mut evicted = 0usize;
        let mut unsure = 0usize;
        let mut empty_keys = Vec::new();

        for (key, confirmations) in self.ccache.iter_mut() {
            let before = confirmations.len();
            unsure += confirmations
                .iter()
                .filter(|c| c.batch_id == Some(batch_id) && c.method != "tcp-rst")
                .count();
            confirmations.retain(|c| c.batch_id != Some(batch_id));
            let removed = before - confirmations.len();
            evicted += removed;
            self.ccount -= removed;
            if confirmations.is_empty() {
                empty_keys.push(*key);
            }
        }
        for key in empty_keys {
            self.ccache.remove(&key);
        }
        debug!(evicted, unsure, "evicted stale confirmations");
    }

    fn evict_events(&mut self, batch_id: u64) {
        let before = self.ecache.len();
        self.ecache.retain(|e| e.batch_id != Some(batch_id));
        let discarded = before - self.ecache.len();
        if discarded > 0 {
            warn!(discarded, batch_id, "discarding old unmatched events");
        }
    }

    /// Finds and removes the first confirmation matching `req`'s key whose
    /// timestamp is within `probe_timeout` of the packet's observed time.
    fn find_confirmation(&mut self, pkt_ts: DateTime<Utc>, key: ProbeKey) -> Option<ProbeConfirmation> {
        let uid = key.5;
        let confirmations = self.ccache.get_mut(&uid)?;
        let timeout = chrono::Duration::from_std(self.probe_timeout).ok()?;
        let idx = confirmations.iter().position(|con| {
            con.key() == key
                && {
                    let diff = con.timestamp - pkt_ts;
                    (if diff < chrono::Duration::zero() { -diff } else { diff }) <= timeout
                }
        })?;
        let matched = confirmations.remove(idx);
        self.ccount -= 1;
        if confirmations.is_empty() {
            self.ccache.remove(&uid);
        }
        Some(matched)
    }

    /// Matches cached events against cached confirmations, evicting the
    /// oldest tracked batch once a third distinct batch id is observed.
    pub fn match_events(&mut self) -> Vec<Event> {
        let mut results = Vec::new();
        let mut unmatched = Vec::new();
        let mut ids_in_batch = std::collections::HashSet::new();

        let mut with_confirmation = 0usize;
        let mut without_probe = 0usize;

        for mut event in std::mem::take(&mut self.ecache) {
            if let Some(batch_id) = event.batch_id {
                ids_in_batch.insert(batch_id);
            }
            if let Some(req) = &event.probe_request {
                let key = req.key();
                let pkt_ts = event.packet.observed;
                if let Some(con) = self.find_confirmation(pkt_ts, key) {
                    event.bind_confirmation(con);
                    with_confirmation += 1;
                    results.push(event);
                } else {
                    unmatched.push(event);
                }
            } else {
                without_probe += 1;
                results.push(event);
            }
        }
        self.ecache = unmatched;

        self.observed_batch_ids.extend(&ids_in_batch);
        if self.observed_batch_ids.len() >= 3 {
            let oldest = self.batch_id_order[0];
            debug!(oldest, "evicting old batch");
            self.evict_confirmations(oldest);
            self.evict_events(oldest);

            let previous: std::collections::HashSet<u64> =
                self.batch_id_order.iter().copied().collect();
            let mut new_ids: Vec<u64> = self
                .observed_batch_ids
                .difference(&previous)
                .copied()
                .collect();
            new_ids.sort_unstable();
            if new_ids.len() > 1 {
                warn!(?new_ids, "unexpected number of new batch ids");
            }
            self.batch_id_order.extend(new_ids);
            self.observed_batch_ids.remove(&oldest);
            self.batch_id_order.remove(0);
        }

        info!(with_confirmation, without_probe, "matched events to confirmations");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileFactory, StreamSpec};
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    fn readers(dir: PathBuf) -> (LiveReader<ProbeConfirmation>, LiveReader<Event>) {
        let start = Utc::now();
        let con_spec = StreamSpec {
            path: dir.clone(),
            datasource: "bcix-nt".into(),
            proto: "tcp".into(),
            log_type: "scamper".into(),
            compressed: false,
            read_csv: false,
        };
        let event_spec = StreamSpec {
            path: dir,
            datasource: "bcix-nt".into(),
            proto: "tcp".into(),
            log_type: "raw".into(),
            compressed: false,
            read_csv: false,
        };
        (
            LiveReader::new(FileFactory::new(con_spec), start),
            LiveReader::new(FileFactory::new(event_spec), start),
        )
    }

    #[test]
    fn match_events_passes_through_unprobed_events() {
        let dir = tempfile::tempdir().unwrap();
        let (cr, er) = readers(dir.path().to_path_buf());
        let mut cm = ConfirmationMatcher::new(cr, er, Duration::from_secs(300));

        let packet = crate::model::Packet {
            observed: Utc::now(),
            saddr: "192.0.2.1".parse::<Ipv4Addr>().unwrap(),
            daddr: "192.0.2.2".parse::<Ipv4Addr>().unwrap(),
            ipid: 1,
            ttl: 64,
            protocol: crate::model::Protocol::Tcp(crate::model::TcpPayload {
                sport: 1,
                dport: 2,
                snum: 0,
                anum: 0,
                window_size: 0,
                flags: crate::model::TcpFlags::default(),
                options: Vec::new(),
                payload: String::new(),
            }),
            batch_id: Some(0),
        };
        let mut event = Event::new(packet);
        event.batch_id = Some(0);
        cm.ecache.push(event);

        let results = cm.match_events();
        assert_eq!(results.len(), 1);
        assert!(results[0].probe_confirmation.is_none());
    }
}
