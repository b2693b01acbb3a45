/// Top-level driver loop: advances the two live readers, feeds matched
/// events to the phase matcher, and triggers hourly checkpoints.
///
/// Grounded on `EventMatcher` in the original event matcher: `next_dump_ts`
/// tracks the next hourly boundary, `batch_to_dump` tracks which batch id
/// is due for eviction, and a pending-events queue decouples confirmation
/// matching from phase matching.
use std::collections::VecDeque;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{error, info};

use crate::error::AssembleResult;
use crate::io::{naming, DiskWriter};
use crate::matcher::confirmation::ConfirmationMatcher;
use crate::matcher::phase::PhaseMatcher;
use crate::model::Event;

pub struct EventMatcher {
    confirmation_matcher: ConfirmationMatcher,
    phase_matcher: PhaseMatcher,
    writer: DiskWriter,
    confirmation_load_threshold: Duration,
    next_dump_ts: DateTime<Utc>,
    batch_to_dump: u64,
    pending: VecDeque<Event>,
}

impl EventMatcher {
    pub fn new(
        confirmation_matcher: ConfirmationMatcher,
        phase_matcher: PhaseMatcher,
        writer: DiskWriter,
        confirmation_load_threshold: StdDuration,
        start_hour: DateTime<Utc>,
        batch_to_dump: u64,
    ) -> Self {
        EventMatcher {
            confirmation_matcher,
            phase_matcher,
            writer,
            confirmation_load_threshold: Duration::from_std(confirmation_load_threshold)
                .unwrap_or_else(|_| Duration::minutes(30)),
            next_dump_ts: start_hour + Duration::hours(1) + Duration::minutes(30),
            batch_to_dump,
            pending: VecDeque::new(),
        }
    }

    pub fn batch_to_dump(&self) -> u64 {
        self.batch_to_dump
    }

    pub fn next_dump_ts(&self) -> DateTime<Utc> {
        self.next_dump_ts
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Advances whichever stream is lagging behind the other by more than
    /// the load threshold, matches confirmations to cached events, and
    /// queues the results for phase matching.
    pub fn run_once(&mut self) -> AssembleResult<()> {
        self.advance_streams();
        let matched = self.confirmation_matcher.match_events();
        self.pending.extend(matched);
        self.process_pending()
    }

    fn advance_streams(&mut self) {
        let ets = self.confirmation_matcher.last_event_timestamp();
        let cts = self.confirmation_matcher.last_confirmation_timestamp();

        let load_confirmations = match (ets, cts) {
            (Some(ets), Some(cts)) => cts - ets < self.confirmation_load_threshold,
            _ => true,
        };
        let load_events = match (ets, cts) {
            (Some(ets), Some(cts)) => ets - cts < self.confirmation_load_threshold,
            _ => true,
        };

        if load_confirmations {
            self.confirmation_matcher.load_confirmations();
        }
        if load_events {
            self.confirmation_matcher.load_events();
        }
    }

    fn process_pending(&mut self) -> AssembleResult<()> {
        while let Some(event) = self.pending.pop_front() {
            let ts = event.packet.observed;
            self.phase_matcher.add_event(event);
            if ts >= self.next_dump_ts {
                self.checkpoint()?;
            }
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> AssembleResult<()> {
        info!(batch_to_dump = self.batch_to_dump, next_dump_ts = %self.next_dump_ts, "reached checkpoint");
        self.phase_matcher.try_match_everything();
        self.phase_matcher.find_repeated_connections();
        self.phase_matcher.evict_retransmits(self.batch_to_dump);
        let elems = self.phase_matcher.evict(self.batch_to_dump);

        if !elems.is_empty() {
            let first_ts = elems[0]["ts"].as_i64().unwrap_or(0);
            let governing = Utc
                .timestamp_opt(first_ts, 0)
                .single()
                .unwrap_or(self.next_dump_ts);
            let file_ts = naming::make_file_timestr(governing);
            self.writer.write_elems(&elems, &file_ts)?;
        } else {
            info!(batch_to_dump = self.batch_to_dump, "checkpoint produced no records");
        }

        self.next_dump_ts = self.next_dump_ts + Duration::hours(1);
        self.batch_to_dump += 1;
        Ok(())
    }

    /// Runs until interrupted. Each iteration advances streams, matches,
    /// and checkpoints as hourly boundaries are crossed; there is no other
    /// termination condition by design (§4.4).
    pub fn run(&mut self) -> AssembleResult<()> {
        loop {
            if let Err(e) = self.run_once() {
                error!(error = %e, "event matcher iteration failed");
                if !e.is_retryable() {
                    self.writer.close_all()?;
                    return Err(e);
                }
            }
            std::thread::sleep(StdDuration::from_millis(100));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LateAckPolicy;
    use crate::io::{FileFactory, LiveReader, StreamSpec};
    use crate::model::{Packet, ProbeConfirmation};

    fn matcher(dir: std::path::PathBuf, start: DateTime<Utc>) -> EventMatcher {
        let con_spec = StreamSpec {
            path: dir.clone(),
            datasource: "bcix-nt".into(),
            proto: "tcp".into(),
            log_type: "scamper".into(),
            compressed: false,
            read_csv: false,
        };
        let event_spec = StreamSpec {
            path: dir.clone(),
            datasource: "bcix-nt".into(),
            proto: "tcp".into(),
            log_type: "raw".into(),
            compressed: false,
            read_csv: false,
        };
        let cr: LiveReader<ProbeConfirmation> = LiveReader::new(FileFactory::new(con_spec), start);
        let er: LiveReader<Event> = LiveReader::new(FileFactory::new(event_spec), start);
        let cm = ConfirmationMatcher::new(cr, er, StdDuration::from_secs(300));
        let pm = PhaseMatcher::new(600, 2, LateAckPolicy::RetryOnEvict);
        let writer = DiskWriter::new("bcix-nt", dir);
        EventMatcher::new(cm, pm, writer, StdDuration::from_secs(1800), start, 0)
    }

    #[test]
    fn next_dump_ts_starts_ninety_minutes_after_start_hour() {
        let dir = tempfile::tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2020, 9, 7, 7, 0, 0).unwrap();
        let em = matcher(dir.path().to_path_buf(), start);
        assert_eq!(em.next_dump_ts(), start + Duration::hours(1) + Duration::minutes(30));
        assert_eq!(em.batch_to_dump(), 0);
    }

    #[test]
    fn checkpoint_advances_dump_ts_and_batch_id() {
        let dir = tempfile::tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2020, 9, 7, 7, 0, 0).unwrap();
        let mut em = matcher(dir.path().to_path_buf(), start);
        let before = em.next_dump_ts();
        em.checkpoint().unwrap();
        assert_eq!(em.next_dump_ts(), before + Duration::hours(1));
        assert_eq!(em.batch_to_dump(), 1);
    }

    #[test]
    fn process_pending_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2020, 9, 7, 7, 0, 0).unwrap();
        let mut em = matcher(dir.path().to_path_buf(), start);

        let packet = Packet {
            observed: start,
            saddr: "192.0.2.1".parse().unwrap(),
            daddr: "192.0.2.2".parse().unwrap(),
            ipid: 54321,
            ttl: 64,
            protocol: crate::model::Protocol::Tcp(crate::model::TcpPayload {
                sport: 1,
                dport: 2,
                snum: 0,
                anum: 0,
                window_size: 0,
                flags: crate::model::TcpFlags { syn: true, ..Default::default() },
                options: Vec::new(),
                payload: String::new(),
            }),
            batch_id: Some(0),
        };
        em.pending.push_back(Event::new(packet));
        em.process_pending().unwrap();
        assert_eq!(em.pending_len(), 0);
    }
}
