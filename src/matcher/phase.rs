/// Buckets up cached events by connection and works out which ones form a
/// two-phase scan-then-confirm-then-load sequence.
///
/// Grounded on `PhaseMatcher` in the original phase matcher: events land in
/// one of eight buckets depending on their TCP flags and how they relate to
/// events already seen, buckets are promoted into each other as matching
/// packets arrive, and bucket contents tagged with a batch id are dumped
/// once that batch is evicted.
use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::LateAckPolicy;
use crate::model::{Event, EventKey, RetransmitSignature};

/// An irregular (or regular) SYN matched to the ACK the scanner later
/// sent on the same connection.
pub struct SynAck {
    pub syn: Event,
    pub ack: Event,
}

/// A regular SYN matched to an earlier irregular SYN, before any ACK on
/// either side has shown up.
pub struct TwoPhaseNoAck {
    pub isyn: Event,
    pub iack: Option<Event>,
    pub rsyn: Event,
}

/// A completed two-phase sequence: irregular SYN (optionally acked)
/// followed by a regular SYN that was acked.
pub struct TwoPhase {
    pub isyn: Event,
    pub iack: Option<Event>,
    pub rsyn: Event,
    pub rack: Event,
}

/// A regular SYN/ACK pair that matches the first phase of a two-phase
/// sequence already recorded, i.e. the target got scanned and loaded more
/// than once.
pub struct RepeatedConnection {
    pub rsyn: Event,
    pub rack: Event,
    pub ident: u64,
}

pub struct PhaseMatcher {
    irregular_syns: HashMap<EventKey, Vec<Event>>,
    regular_syns: HashMap<EventKey, Vec<Event>>,
    acks: HashMap<EventKey, Vec<Event>>,

    irregular_acked: HashMap<EventKey, Vec<SynAck>>,
    regular_acked: HashMap<EventKey, Vec<SynAck>>,

    two_phase_no_ack: HashMap<EventKey, Vec<TwoPhaseNoAck>>,
    two_phase: HashMap<EventKey, Vec<TwoPhase>>,

    repeated_connection_attempts: HashMap<EventKey, Vec<RepeatedConnection>>,

    retransmit_cache: HashMap<u64, HashSet<RetransmitSignature>>,
    retransmits: HashMap<u64, Vec<Event>>,
    retransmit_window_batches: u32,

    phase_timeout_s: i64,

    /// Resolves Open Question #1 (§9): what to do with `acks` residue still
    /// sitting around when its batch is evicted.
    late_ack_policy: LateAckPolicy,
}

fn count<V>(map: &HashMap<EventKey, Vec<V>>) -> usize {
    map.values().map(Vec::len).sum()
}

fn is_syn(event: &Event) -> bool {
    event
        .packet
        .protocol
        .as_tcp()
        .is_some_and(|tcp| tcp.flags.syn && !tcp.flags.ack)
}

fn is_ack(event: &Event) -> bool {
    event
        .packet
        .protocol
        .as_tcp()
        .is_some_and(|tcp| tcp.flags.ack && !tcp.flags.syn)
}

fn is_rst(event: &Event) -> bool {
    event.packet.protocol.as_tcp().is_some_and(|tcp| tcp.flags.rst)
}

fn is_irregular_syn(event: &Event) -> bool {
    if !is_syn(event) {
        return false;
    }
    let tcp = event.packet.protocol.as_tcp().unwrap();
    event.packet.ipid == 54321 || event.packet.ttl > 200 || tcp.options.is_empty()
}

fn is_within_timeout(event: &Event, ts_syn: i64, timeout_s: i64) -> bool {
    let Some(con) = &event.probe_confirmation else {
        return false;
    };
    let ts_con = con.timestamp.timestamp();
    (ts_con <= ts_syn && (ts_syn - ts_con) < timeout_s) || (ts_syn < ts_con && (ts_con - ts_syn) <= 1)
}

fn is_matching_ack(syn: &Event, ack: &Event) -> bool {
    let (Some(req), Some(syn_tcp), Some(ack_tcp)) = (
        &syn.probe_request,
        syn.packet.protocol.as_tcp(),
        ack.packet.protocol.as_tcp(),
    ) else {
        return false;
    };
    syn_tcp.sport == req.dport && req.dport == ack_tcp.sport && req.anum == ack_tcp.snum
}

impl PhaseMatcher {
    pub fn new(phase_timeout_s: i64, retransmit_window_batches: u32, late_ack_policy: LateAckPolicy) -> Self {
        PhaseMatcher {
            irregular_syns: HashMap::new(),
            regular_syns: HashMap::new(),
            acks: HashMap::new(),
            irregular_acked: HashMap::new(),
            regular_acked: HashMap::new(),
            two_phase_no_ack: HashMap::new(),
            two_phase: HashMap::new(),
            repeated_connection_attempts: HashMap::new(),
            retransmit_cache: HashMap::new(),
            retransmits: HashMap::new(),
            retransmit_window_batches: retransmit_window_batches.max(1),
            phase_timeout_s,
            late_ack_policy,
        }
    }

    pub fn add_event(&mut self, event: Event) {
        if is_rst(&event) {
            return;
        }
        if self.is_retransmit(&event) {
            let batch_id = event.batch_id.unwrap_or(0);
            self.retransmits.entry(batch_id).or_default().push(event);
            return;
        }
        let Some(key) = event.key() else { return };

        if is_irregular_syn(&event) {
            self.irregular_syns.entry(key).or_default().push(event);
        } else if is_syn(&event) {
            if let Some(event) = self.try_match_rsyn_to_isyn(event, key) {
                if let Some(event) = self.try_match_rsyn_to_isyn_acked(event, key) {
                    self.regular_syns.entry(key).or_default().push(event);
                }
            }
        } else if is_ack(&event) {
            if let Some(event) = self.try_match_ack_to_rsyn(event, key) {
                if let Some(event) = self.try_match_ack_to_isyn(event, key) {
                    if let Some(event) = self.try_match_ack_to_tp(event, key) {
                        self.acks.entry(key).or_default().push(event);
                    }
                }
            }
        }
        // SYN-ACK and anything else: nothing to do, matching the original's
        // intentional no-op branches.
    }

    /// Retries matching every still-pending ACK and regular SYN against
    /// everything currently cached, for the late-arrival sweep that runs
    /// right before a batch is evicted.
    pub fn try_match_everything(&mut self) {
        let mut matched_later = 0usize;
        for (key, acks) in std::mem::take(&mut self.acks) {
            let mut remaining = Vec::new();
            for ack in acks {
                if let Some(ack) = self.try_match_ack_to_rsyn(ack, key) {
                    if let Some(ack) = self.try_match_ack_to_isyn(ack, key) {
                        if let Some(ack) = self.try_match_ack_to_tp(ack, key) {
                            remaining.push(ack);
                            continue;
                        }
                    }
                }
                matched_later += 1;
            }
            if !remaining.is_empty() {
                self.acks.insert(key, remaining);
            }
        }
        debug!(matched_later, "matched pending acks on late sweep");

        let mut matched_later = 0usize;
        for (key, rsyns) in std::mem::take(&mut self.regular_syns) {
            let mut remaining = Vec::new();
            let mut matched_one = false;
            for rsyn in rsyns {
                if matched_one {
                    remaining.push(rsyn);
                    continue;
                }
                if let Some(rsyn) = self.try_match_rsyn_to_isyn(rsyn, key) {
                    if let Some(rsyn) = self.try_match_rsyn_to_isyn_acked(rsyn, key) {
                        remaining.push(rsyn);
                        continue;
                    }
                }
                matched_one = true;
                matched_later += 1;
            }
            if !remaining.is_empty() {
                self.regular_syns.insert(key, remaining);
            }
        }
        debug!(matched_later, "matched pending regular syns on late sweep");

        let mut matched_later = 0usize;
        for (key, rseqs) in std::mem::take(&mut self.regular_acked) {
            let mut remaining = Vec::new();
            let mut matched_one = false;
            for rseq in rseqs {
                if matched_one {
                    remaining.push(rseq);
                    continue;
                }
                if let Some(rseq) = self.try_match_rsyn_acked_to_isyn(rseq, key) {
                    if let Some(rseq) = self.try_match_rsyn_acked_to_isyn_acked(rseq, key) {
                        remaining.push(rseq);
                        continue;
                    }
                }
                matched_one = true;
                matched_later += 1;
            }
            if !remaining.is_empty() {
                self.regular_acked.insert(key, remaining);
            }
        }
        debug!(matched_later, "matched pending acked regular syns on late sweep");
    }

    /// Finds `regular_acked` entries whose first phase was already seen
    /// and recorded, indicating the scanner returned to the same target.
    pub fn find_repeated_connections(&mut self) {
        let before = count(&self.regular_acked);
        let mut total_deleting = 0usize;
        let mut now_empty = Vec::new();

        for (key, rseqs) in self.regular_acked.iter_mut() {
            let mut keep = Vec::new();
            let mut deleting = 0usize;
            for rseq in std::mem::take(rseqs) {
                match find_repeated_ident(&self.two_phase_no_ack, &self.two_phase, *key, &rseq, self.phase_timeout_s) {
                    Some(ident) => {
                        self.repeated_connection_attempts.entry(*key).or_default().push(
                            RepeatedConnection { rsyn: rseq.syn, rack: rseq.ack, ident },
                        );
                        deleting += 1;
                    }
                    None => keep.push(rseq),
                }
            }
            total_deleting += deleting;
            if keep.is_empty() {
                now_empty.push(*key);
            } else {
                *rseqs = keep;
            }
        }
        for key in now_empty {
            self.regular_acked.remove(&key);
        }
        let after = count(&self.regular_acked);
        info!(matched = before - after, "matched regular syns to earlier first phases");
        debug_assert_eq!(after + total_deleting, before);
    }

    // -- retransmits ----------------------------------------------------

    fn is_retransmit(&mut self, event: &Event) -> bool {
        let Some(sig) = event.packet.retransmit_signature() else {
            return false;
        };
        let batch_id = event.batch_id.unwrap_or(0);
        if self
            .retransmit_cache
            .get(&batch_id)
            .is_some_and(|set| set.contains(&sig))
        {
            return true;
        }
        for back in 1..self.retransmit_window_batches as u64 {
            if batch_id < back {
                break;
            }
            let prev = batch_id - back;
            if self
                .retransmit_cache
                .get(&prev)
                .is_some_and(|set| set.contains(&sig))
            {
                self.retransmit_cache.entry(batch_id).or_default().insert(sig);
                return true;
            }
        }
        self.retransmit_cache.entry(batch_id).or_default().insert(sig);
        false
    }

    pub fn evict_retransmits(&mut self, batch_id: u64) {
        self.retransmit_cache.remove(&batch_id);
        debug!(remaining = self.retransmit_cache.values().map(HashSet::len).sum::<usize>(), "evicted retransmit signatures");
        self.retransmits.clear();
    }

    // -- matching ---------------------------------------------------------

    /// Tries to pair `rsyn` with a cached irregular SYN within the phase
    /// timeout of its confirmation. Returns `None` on success (consumed
    /// into `two_phase_no_ack`), otherwise gives `rsyn` back.
    fn try_match_rsyn_to_isyn(&mut self, rsyn: Event, key: EventKey) -> Option<Event> {
        let ts_syn = rsyn.packet.unix_timestamp();
        let repertory = self.irregular_syns.get_mut(&key)?;
        let idx = repertory
            .iter()
            .position(|isyn| is_within_timeout(isyn, ts_syn, self.phase_timeout_s))?;
        let isyn = repertory.remove(idx);
        if repertory.is_empty() {
            self.irregular_syns.remove(&key);
        }
        self.two_phase_no_ack
            .entry(key)
            .or_default()
            .push(TwoPhaseNoAck { isyn, iack: None, rsyn });
        None
    }

    fn try_match_rsyn_to_isyn_acked(&mut self, rsyn: Event, key: EventKey) -> Option<Event> {
        let ts_syn = rsyn.packet.unix_timestamp();
        let repertory = self.irregular_acked.get_mut(&key)?;
        let idx = repertory
            .iter()
            .position(|p1| is_within_timeout(&p1.syn, ts_syn, self.phase_timeout_s))?;
        let SynAck { syn, ack } = repertory.remove(idx);
        if repertory.is_empty() {
            self.irregular_acked.remove(&key);
        }
        self.two_phase_no_ack.entry(key).or_default().push(TwoPhaseNoAck {
            isyn: syn,
            iack: Some(ack),
            rsyn,
        });
        None
    }

    fn try_match_rsyn_acked_to_isyn(&mut self, rseq: SynAck, key: EventKey) -> Option<SynAck> {
        let ts_syn = rseq.syn.packet.unix_timestamp();
        let repertory = self.irregular_syns.get_mut(&key)?;
        let idx = repertory
            .iter()
            .position(|isyn| is_within_timeout(isyn, ts_syn, self.phase_timeout_s))?;
        let isyn = repertory.remove(idx);
        if repertory.is_empty() {
            self.irregular_syns.remove(&key);
        }
        self.two_phase.entry(key).or_default().push(TwoPhase {
            isyn,
            iack: None,
            rsyn: rseq.syn,
            rack: rseq.ack,
        });
        None
    }

    fn try_match_rsyn_acked_to_isyn_acked(&mut self, rseq: SynAck, key: EventKey) -> Option<SynAck> {
        let ts_syn = rseq.syn.packet.unix_timestamp();
        let repertory = self.irregular_acked.get_mut(&key)?;
        let idx = repertory
            .iter()
            .position(|p1| is_within_timeout(&p1.syn, ts_syn, self.phase_timeout_s))?;
        let SynAck { syn, ack } = repertory.remove(idx);
        if repertory.is_empty() {
            self.irregular_acked.remove(&key);
        }
        self.two_phase.entry(key).or_default().push(TwoPhase {
            isyn: syn,
            iack: Some(ack),
            rsyn: rseq.syn,
            rack: rseq.ack,
        });
        None
    }

    fn try_match_ack_to_isyn(&mut self, ack: Event, key: EventKey) -> Option<Event> {
        let repertory = self.irregular_syns.get_mut(&key)?;
        let idx = repertory.iter().position(|syn| is_matching_ack(syn, &ack))?;
        let syn = repertory.remove(idx);
        if repertory.is_empty() {
            self.irregular_syns.remove(&key);
        }
        self.irregular_acked.entry(key).or_default().push(SynAck { syn, ack });
        None
    }

    fn try_match_ack_to_rsyn(&mut self, ack: Event, key: EventKey) -> Option<Event> {
        let repertory = self.regular_syns.get_mut(&key)?;
        let idx = repertory.iter().position(|syn| is_matching_ack(syn, &ack))?;
        let syn = repertory.remove(idx);
        if repertory.is_empty() {
            self.regular_syns.remove(&key);
        }
        self.regular_acked.entry(key).or_default().push(SynAck { syn, ack });
        None
    }

    fn try_match_ack_to_tp(&mut self, ack: Event, key: EventKey) -> Option<Event> {
        let repertory = self.two_phase_no_ack.get_mut(&key)?;
        let idx = repertory
            .iter()
            .position(|entry| is_matching_ack(&entry.rsyn, &ack))?;
        let TwoPhaseNoAck { isyn, iack, rsyn } = repertory.remove(idx);
        if repertory.is_empty() {
            self.two_phase_no_ack.remove(&key);
        }
        self.two_phase.entry(key).or_default().push(TwoPhase { isyn, iack, rsyn, rack: ack });
        None
    }

    // -- evict and emit -----------------------------------------------------

    /// Drains every bucket entry tagged with `batch_id`, converts it to its
    /// output record, and returns them sorted by trigger timestamp.
    pub fn evict(&mut self, batch_id: u64) -> Vec<Value> {
        if self.late_ack_policy == LateAckPolicy::RetryOnEvict {
            self.try_match_everything();
        }

        let mut elems = Vec::new();

        elems.extend(filter_simple(&mut self.irregular_syns, batch_id, "isyn"));
        elems.extend(filter_simple(&mut self.regular_syns, batch_id, "rsyn"));
        // Acks are cleaned up but never written.
        filter_simple(&mut self.acks, batch_id, "ack");

        elems.extend(filter_synack(&mut self.irregular_acked, batch_id, "isyn (acked)"));
        elems.extend(filter_synack(&mut self.regular_acked, batch_id, "rsyn (acked)"));
        elems.extend(filter_two_phase_no_ack(&mut self.two_phase_no_ack, batch_id));
        elems.extend(filter_two_phase(&mut self.two_phase, batch_id));

        self.repeated_connection_attempts.clear();

        info!(count = elems.len(), "evicted batch elements");
        elems.sort_by_key(|v| v["ts"].as_i64().unwrap_or(0));
        elems
    }
}

fn find_repeated_ident(
    two_phase_no_ack: &HashMap<EventKey, Vec<TwoPhaseNoAck>>,
    two_phase: &HashMap<EventKey, Vec<TwoPhase>>,
    key: EventKey,
    rseq: &SynAck,
    phase_timeout_s: i64,
) -> Option<u64> {
    let ts_rsyn = rseq.syn.packet.unix_timestamp();
    if let Some(entries) = two_phase_no_ack.get(&key) {
        for entry in entries {
            if is_within_timeout(&entry.isyn, ts_rsyn, phase_timeout_s) {
                return Some(repeated_ident(&entry.isyn));
            }
        }
    }
    if let Some(entries) = two_phase.get(&key) {
        for entry in entries {
            if is_within_timeout(&entry.isyn, ts_rsyn, phase_timeout_s) {
                return Some(repeated_ident(&entry.isyn));
            }
        }
    }
    None
}

/// `hash((isyn_ts, isyn.sport, isyn.ipid, isyn.anum))`, grounded on the
/// `ident` computed in `try_match_rsyn_acked_to_tp(_no_ack)`.
fn repeated_ident(isyn: &Event) -> u64 {
    use std::hash::{Hash, Hasher};
    let tcp = isyn.packet.protocol.as_tcp();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    isyn.packet.unix_timestamp().hash(&mut hasher);
    tcp.map(|t| t.sport).unwrap_or(0).hash(&mut hasher);
    isyn.packet.ipid.hash(&mut hasher);
    tcp.map(|t| t.anum).unwrap_or(0).hash(&mut hasher);
    hasher.finish()
}

fn filter_simple(map: &mut HashMap<EventKey, Vec<Event>>, batch_id: u64, tag: &str) -> Vec<Value> {
    let mut removed = Vec::new();
    let mut empty_keys = Vec::new();
    for (key, events) in map.iter_mut() {
        let mut keep = Vec::new();
        for event in std::mem::take(events) {
            if event.batch_id == Some(batch_id) {
                let ts = event.packet.unix_timestamp();
                removed.push(simple_record(tag, ts, &event));
            } else {
                keep.push(event);
            }
        }
        if keep.is_empty() {
            empty_keys.push(*key);
        } else {
            *events = keep;
        }
    }
    for key in empty_keys {
        map.remove(&key);
    }
    removed
}

fn filter_synack(map: &mut HashMap<EventKey, Vec<SynAck>>, batch_id: u64, tag: &str) -> Vec<Value> {
    let mut removed = Vec::new();
    let mut empty_keys = Vec::new();
    for (key, entries) in map.iter_mut() {
        let mut keep = Vec::new();
        for entry in std::mem::take(entries) {
            if entry.syn.batch_id == Some(batch_id) {
                let ts = entry.syn.packet.unix_timestamp();
                removed.push(composite_record(tag, ts, Some(&entry.syn), Some(&entry.ack), None, None));
            } else {
                keep.push(entry);
            }
        }
        if keep.is_empty() {
            empty_keys.push(*key);
        } else {
            *entries = keep;
        }
    }
    for key in empty_keys {
        map.remove(&key);
    }
    removed
}

fn filter_two_phase_no_ack(map: &mut HashMap<EventKey, Vec<TwoPhaseNoAck>>, batch_id: u64) -> Vec<Value> {
    let mut removed = Vec::new();
    let mut empty_keys = Vec::new();
    for (key, entries) in map.iter_mut() {
        let mut keep = Vec::new();
        for entry in std::mem::take(entries) {
            if entry.isyn.batch_id == Some(batch_id) {
                let ts = entry.isyn.packet.unix_timestamp();
                removed.push(composite_record(
                    "two-phase (no ack)",
                    ts,
                    Some(&entry.isyn),
                    entry.iack.as_ref(),
                    Some(&entry.rsyn),
                    None,
                ));
            } else {
                keep.push(entry);
            }
        }
        if keep.is_empty() {
            empty_keys.push(*key);
        } else {
            *entries = keep;
        }
    }
    for key in empty_keys {
        map.remove(&key);
    }
    removed
}

fn filter_two_phase(map: &mut HashMap<EventKey, Vec<TwoPhase>>, batch_id: u64) -> Vec<Value> {
    let mut removed = Vec::new();
    let mut empty_keys = Vec::new();
    for (key, entries) in map.iter_mut() {
        let mut keep = Vec::new();
        for entry in std::mem::take(entries) {
            if entry.isyn.batch_id == Some(batch_id) {
                let ts = entry.isyn.packet.unix_timestamp();
                removed.push(composite_record(
                    "two-phase",
                    ts,
                    Some(&entry.isyn),
                    entry.iack.as_ref(),
                    Some(&entry.rsyn),
                    Some(&entry.rack),
                ));
            } else {
                keep.push(entry);
            }
        }
        if keep.is_empty() {
            empty_keys.push(*key);
        } else {
            *entries = keep;
        }
    }
    for key in empty_keys {
        map.remove(&key);
    }
    removed
}

fn simple_record(tag: &str, ts: i64, event: &Event) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("ts".into(), ts.into());
    obj.insert("isyn".into(), Value::Null);
    obj.insert("iack".into(), Value::Null);
    obj.insert("rsyn".into(), Value::Null);
    obj.insert("rack".into(), Value::Null);
    obj.insert("tag".into(), tag.into());
    obj.insert(tag.to_string(), event.to_json());
    Value::Object(obj)
}

fn composite_record(
    tag: &str,
    ts: i64,
    isyn: Option<&Event>,
    iack: Option<&Event>,
    rsyn: Option<&Event>,
    rack: Option<&Event>,
) -> Value {
    json!({
        "ts": ts,
        "tag": tag,
        "isyn": isyn.map(Event::to_json),
        "iack": iack.map(Event::to_json),
        "rsyn": rsyn.map(Event::to_json),
        "rack": rack.map(Event::to_json),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Packet, Protocol, ProbeRequest, TcpFlags, TcpPayload};
    use chrono::Utc;
    use std::net::Ipv4Addr;

    fn tcp_event(sport: u16, dport: u16, syn: bool, ack: bool, ipid: u16, ttl: u8, options_empty: bool, batch_id: u64) -> Event {
        let packet = Packet {
            observed: Utc::now(),
            saddr: "192.0.2.1".parse::<Ipv4Addr>().unwrap(),
            daddr: "192.0.2.2".parse::<Ipv4Addr>().unwrap(),
            ipid,
            ttl,
            protocol: Protocol::Tcp(TcpPayload {
                sport,
                dport,
                snum: 100,
                anum: 0,
                window_size: 65535,
                flags: TcpFlags { syn, ack, ..Default::default() },
                options: if options_empty { Vec::new() } else { vec!["mss".into()] },
                payload: String::new(),
            }),
            batch_id: Some(batch_id),
        };
        let mut event = Event::new(packet);
        event.batch_id = Some(batch_id);
        event
    }

    #[test]
    fn irregular_syn_detected_via_ipid() {
        let event = tcp_event(1, 2, true, false, 54321, 64, false, 0);
        assert!(is_irregular_syn(&event));
    }

    #[test]
    fn regular_syn_not_irregular() {
        let event = tcp_event(1, 2, true, false, 1, 64, false, 0);
        assert!(!is_irregular_syn(&event));
        assert!(is_syn(&event));
    }

    #[test]
    fn add_event_buckets_irregular_syn() {
        let mut pm = PhaseMatcher::new(600, 2, LateAckPolicy::RetryOnEvict);
        let event = tcp_event(1, 2, true, false, 54321, 64, false, 0);
        let key = event.key().unwrap();
        pm.add_event(event);
        assert_eq!(pm.irregular_syns.get(&key).map(Vec::len), Some(1));
    }

    #[test]
    fn retransmit_detected_on_repeat_in_same_batch() {
        let mut pm = PhaseMatcher::new(600, 2, LateAckPolicy::RetryOnEvict);
        let e1 = tcp_event(1, 2, true, false, 1, 64, false, 0);
        let e2 = tcp_event(1, 2, true, false, 1, 64, false, 0);
        assert!(!pm.is_retransmit(&e1));
        assert!(pm.is_retransmit(&e2));
    }

    #[test]
    fn retransmit_detected_across_one_batch_boundary() {
        let mut pm = PhaseMatcher::new(600, 2, LateAckPolicy::RetryOnEvict);
        let e1 = tcp_event(1, 2, true, false, 1, 64, false, 0);
        assert!(!pm.is_retransmit(&e1));
        let e2 = tcp_event(1, 2, true, false, 1, 64, false, 1);
        assert!(pm.is_retransmit(&e2));
    }

    #[test]
    fn ack_matches_pending_regular_syn() {
        let mut pm = PhaseMatcher::new(600, 2, LateAckPolicy::RetryOnEvict);
        let mut syn = tcp_event(41725, 42, true, false, 1, 64, false, 0);
        syn.probe_request = Some(ProbeRequest {
            saddr: "192.0.2.2".parse().unwrap(),
            daddr: "192.0.2.1".parse().unwrap(),
            sport: 42,
            dport: 41725,
            anum: 500,
            snum: 0,
            userid: 1,
            method: "tcp-synack".into(),
            num_probes: 1,
            payload: String::new(),
            batch_id: Some(0),
        });
        let key = syn.key().unwrap();
        pm.add_event(syn);
        assert_eq!(pm.regular_syns.get(&key).map(Vec::len), Some(1));

        let mut ack = tcp_event(41725, 42, false, true, 1, 64, false, 0);
        if let Protocol::Tcp(tcp) = &mut ack.packet.protocol {
            tcp.snum = 500;
        }
        pm.add_event(ack);
        assert!(pm.regular_syns.get(&key).is_none());
        assert_eq!(pm.regular_acked.get(&key).map(Vec::len), Some(1));
    }

    #[test]
    fn evict_emits_irregular_syn_tagged_record() {
        let mut pm = PhaseMatcher::new(600, 2, LateAckPolicy::RetryOnEvict);
        let event = tcp_event(1, 2, true, false, 54321, 64, false, 7);
        pm.add_event(event);
        let elems = pm.evict(7);
        assert_eq!(elems.len(), 1);
        assert_eq!(elems[0]["tag"], "isyn");
        assert!(elems[0]["isyn"].is_object());
        assert!(elems[0]["rsyn"].is_null());
    }
}
