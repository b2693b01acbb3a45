/// Hourly log file reading, mirroring `SpokiLogFile`/`JSONFile`/`CSVFile`
/// and `LiveReader` from the original reader: a file that may still be
/// written while we read it, polled until its output hour's deadline passes.
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::error::AssembleResult;
use crate::io::naming::hourly_log_filename;
use crate::model::{Event, ProbeConfirmation};

/// Anything a log file can be parsed into: one entry per line, in either
/// the JSON or pipe-delimited CSV wire format.
pub trait LogRecord: Sized {
    fn from_json(v: &serde_json::Value) -> AssembleResult<Self>;
    fn from_csv_row(row: &HashMap<String, String>) -> AssembleResult<Self>;
    fn set_batch_id(&mut self, batch_id: u64);
}

impl LogRecord for Event {
    fn from_json(v: &serde_json::Value) -> AssembleResult<Self> {
        Event::from_json(v)
    }

    fn from_csv_row(row: &HashMap<String, String>) -> AssembleResult<Self> {
        Event::from_csv_row(row)
    }

    fn set_batch_id(&mut self, batch_id: u64) {
        Event::set_batch_id(self, batch_id)
    }
}

impl LogRecord for ProbeConfirmation {
    fn from_json(v: &serde_json::Value) -> AssembleResult<Self> {
        ProbeConfirmation::from_json(v)
    }

    fn from_csv_row(row: &HashMap<String, String>) -> AssembleResult<Self> {
        ProbeConfirmation::from_csv_row(row)
    }

    fn set_batch_id(&mut self, batch_id: u64) {
        ProbeConfirmation::set_batch_id(self, batch_id)
    }
}

/// How long the live reader will wait for an hourly file to show up before
/// giving up and skipping straight to the next hour.
pub const SKIP_TIME: ChronoDuration = ChronoDuration::minutes(65);

/// Configuration shared by every file the reader opens for one stream.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub path: PathBuf,
    pub datasource: String,
    pub proto: String,
    pub log_type: String,
    pub compressed: bool,
    pub read_csv: bool,
}

/// One hourly file, possibly not created yet, possibly still being written.
pub struct LogFile<T: LogRecord> {
    spec: StreamSpec,
    hour: DateTime<Utc>,
    batch_id: u64,
    filepath: PathBuf,
    reader: Option<Box<dyn BufRead>>,
    csv_header: Option<Vec<String>>,
    last_read_got_data: bool,
    lines_read: u64,
    timeout: DateTime<Utc>,
    /// Tail of a JSON line that did not yet end in a newline on the last
    /// `consume`, carried forward so the next read can complete it.
    fragment: String,
    _marker: std::marker::PhantomData<T>,
}

impl<T: LogRecord> LogFile<T> {
    pub fn new(spec: StreamSpec, hour: DateTime<Utc>, batch_id: u64) -> Self {
        let filename = hourly_log_filename(
            hour,
            &spec.datasource,
            &spec.proto,
            &spec.log_type,
            spec.compressed,
            spec.read_csv,
        );
        let filepath = spec.path.join(&filename);
        debug!(?filepath, "upcoming log file");
        LogFile {
            timeout: hour + ChronoDuration::hours(1) + ChronoDuration::minutes(10),
            spec,
            hour,
            batch_id,
            filepath,
            reader: None,
            csv_header: None,
            last_read_got_data: true,
            lines_read: 0,
            fragment: String::new(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn hour(&self) -> DateTime<Utc> {
        self.hour
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    pub fn exists(&self) -> bool {
        self.filepath.is_file()
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn open(&mut self) -> bool {
        if !self.exists() {
            return false;
        }
        match File::open(&self.filepath) {
            Ok(file) => {
                let reader: Box<dyn BufRead> = if self.spec.compressed {
                    Box::new(BufReader::new(GzDecoder::new(file)))
                } else {
                    Box::new(BufReader::new(file))
                };
                self.reader = Some(reader);
                debug!(path = %self.filepath.display(), "opened log file");
                true
            }
            Err(e) => {
                warn!(path = %self.filepath.display(), error = %e, "failed to open log file");
                false
            }
        }
    }

    /// Read up to `num` records. Returns an empty vec once the file has no
    /// more complete lines buffered (it may still grow later).
    pub fn consume(&mut self, num: usize) -> Vec<T> {
        let Some(reader) = self.reader.as_mut() else {
            warn!("consume called with no open file");
            return Vec::new();
        };

        let mut items = Vec::new();
        for _ in 0..num {
            let mut line = std::mem::take(&mut self.fragment);
            match reader.read_line(&mut line) {
                Ok(0) => {
                    if !line.is_empty() {
                        // nothing new arrived; keep the tail buffered for the
                        // next consume rather than parsing it half-formed
                        self.fragment = line;
                    }
                    break;
                }
                Ok(_) => {
                    if !self.spec.read_csv && !line.ends_with('\n') {
                        // partial line at the current end of file; buffer and
                        // retry once the rest has been written (§4.1)
                        self.fragment = line;
                        break;
                    }
                    let trimmed = line.trim_end_matches(['\n', '\r']);
                    if trimmed.is_empty() {
                        continue;
                    }
                    if self.spec.read_csv {
                        if self.csv_header.is_none() {
                            self.csv_header =
                                Some(trimmed.split('|').map(|s| s.to_string()).collect());
                            continue;
                        }
                        let header = self.csv_header.as_ref().unwrap();
                        let parts: Vec<&str> = trimmed.split('|').collect();
                        let row: HashMap<String, String> = header
                            .iter()
                            .cloned()
                            .zip(parts.into_iter().map(|s| s.to_string()))
                            .collect();
                        match T::from_csv_row(&row) {
                            Ok(mut elem) => {
                                elem.set_batch_id(self.batch_id);
                                self.lines_read += 1;
                                items.push(elem);
                            }
                            Err(e) => {
                                e.log();
                            }
                        }
                    } else {
                        match serde_json::from_str::<serde_json::Value>(trimmed) {
                            Ok(v) => match T::from_json(&v) {
                                Ok(mut elem) => {
                                    elem.set_batch_id(self.batch_id);
                                    self.lines_read += 1;
                                    items.push(elem);
                                }
                                Err(e) => e.log(),
                            },
                            Err(e) => {
                                warn!(line = %trimmed, error = %e, "dropping corrupt line after buffer-and-retry");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "I/O error reading log file");
                    self.fragment = line;
                    break;
                }
            }
        }

        self.last_read_got_data = !items.is_empty();
        items
    }

    /// Whether more data is plausibly still coming: either the last read
    /// produced data, or we haven't yet passed this file's output deadline.
    pub fn expect_more(&self) -> bool {
        if self.last_read_got_data {
            return true;
        }
        Utc::now() <= self.timeout
    }
}

/// Creates hourly `LogFile`s for one stream as the live reader advances.
pub struct FileFactory<T: LogRecord> {
    spec: StreamSpec,
    _marker: std::marker::PhantomData<T>,
}

impl<T: LogRecord> FileFactory<T> {
    pub fn new(spec: StreamSpec) -> Self {
        FileFactory {
            spec,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn make(&self, hour: DateTime<Utc>, batch_id: u64) -> LogFile<T> {
        LogFile::new(self.spec.clone(), hour, batch_id)
    }
}

/// Reads one stream's hourly files as a sequence of batches, opening new
/// files as they appear and retiring ones that have stopped growing.
pub struct LiveReader<T: LogRecord> {
    factory: FileFactory<T>,
    next_hour: DateTime<Utc>,
    next_batch_id: u64,
    upcoming: Option<LogFile<T>>,
    open_files: Vec<LogFile<T>>,
    sleep: Duration,
}

impl<T: LogRecord> LiveReader<T> {
    pub fn new(factory: FileFactory<T>, start_hour: DateTime<Utc>) -> Self {
        let mut reader = LiveReader {
            factory,
            next_hour: start_hour,
            next_batch_id: 0,
            upcoming: None,
            open_files: Vec::new(),
            sleep: Duration::from_secs(5),
        };
        reader.prepare_next_file();
        reader
    }

    pub fn next_hour(&self) -> DateTime<Utc> {
        self.next_hour
    }

    /// Batch id that will be assigned to the file that is about to be
    /// created. Used by `ConfirmationMatcher` to seed its eviction window.
    pub fn upcoming_batch_id(&self) -> u64 {
        self.next_batch_id
    }

    fn prepare_next_file(&mut self) {
        if self.upcoming.is_some() {
            warn!("cannot prepare next file: already set");
            return;
        }
        let file = self.factory.make(self.next_hour, self.next_batch_id);
        self.next_batch_id += 1;
        self.next_hour += ChronoDuration::hours(1);
        self.upcoming = Some(file);
    }

    /// Reads one non-empty batch, blocking (sleeping) until data appears.
    pub fn next_batch(&mut self) -> Vec<T> {
        loop {
            let mut items = Vec::new();
            let mut to_remove = Vec::new();

            for (idx, file) in self.open_files.iter_mut().enumerate() {
                let new_items = file.consume(100_000);
                if !new_items.is_empty() {
                    items.extend(new_items);
                } else if !file.expect_more() {
                    to_remove.push(idx);
                }
            }

            let mut opened_new_file = false;
            if items.is_empty() {
                if self.upcoming.is_none() {
                    self.prepare_next_file();
                }
                let upcoming = self.upcoming.as_mut().unwrap();
                if upcoming.exists() {
                    if upcoming.open() {
                        let file = self.upcoming.take().unwrap();
                        self.open_files.push(file);
                        opened_new_file = true;
                    } else {
                        warn!(path = ?upcoming.filepath, "failed to open upcoming file");
                    }
                } else {
                    let file_hour = upcoming.hour();
                    debug!(%file_hour, "next file does not exist yet");
                    if Utc::now() > file_hour + SKIP_TIME {
                        debug!(%file_hour, "skipping hour, file never appeared");
                        self.upcoming = None;
                        self.prepare_next_file();
                    }
                }
            }

            for idx in to_remove.into_iter().rev() {
                let removed = self.open_files.remove(idx);
                debug!(
                    batch_id = removed.batch_id(),
                    hour = %removed.hour(),
                    lines = removed.lines_read(),
                    "retiring exhausted batch file"
                );
            }

            if !items.is_empty() {
                return items;
            }
            if !opened_new_file {
                std::thread::sleep(self.sleep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Event;
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;

    fn spec(dir: &Path) -> StreamSpec {
        StreamSpec {
            path: dir.to_path_buf(),
            datasource: "bcix-nt".to_string(),
            proto: "tcp".to_string(),
            log_type: "raw".to_string(),
            compressed: false,
            read_csv: false,
        }
    }

    #[test]
    fn log_file_consumes_json_lines() {
        let dir = tempdir().unwrap();
        let hour = Utc::now();
        let mut lf: LogFile<Event> = LogFile::new(spec(dir.path()), hour, 0);
        std::fs::write(
            &lf.filepath,
            format!(
                "{}\n",
                serde_json::json!({
                    "trigger": {
                        "observed": 1_599_487_200_000i64,
                        "saddr": "192.0.2.1",
                        "daddr": "192.0.2.2",
                        "ttl": 231,
                        "ipid": 61602,
                        "tcp": {
                            "sport": 22734, "dport": 42, "snum": 0, "anum": 0,
                            "window_size": 65535, "syn": true, "options": {}, "payload": ""
                        }
                    }
                })
            ),
        )
        .unwrap();
        assert!(lf.exists());
        assert!(lf.open());
        let items = lf.consume(10);
        assert_eq!(items.len(), 1);
        assert!(!lf.expect_more() || lf.lines_read() == 1);
    }

    #[test]
    fn partial_tail_line_is_buffered_and_completed_on_next_consume() {
        let dir = tempdir().unwrap();
        let hour = Utc::now();
        let mut lf: LogFile<Event> = LogFile::new(spec(dir.path()), hour, 0);
        let record = serde_json::json!({
            "trigger": {
                "observed": 1_599_487_200_000i64,
                "saddr": "192.0.2.1",
                "daddr": "192.0.2.2",
                "ttl": 231,
                "ipid": 61602,
                "tcp": {
                    "sport": 22734, "dport": 42, "snum": 0, "anum": 0,
                    "window_size": 65535, "syn": true, "options": {}, "payload": ""
                }
            }
        })
        .to_string();
        let (head, tail) = record.split_at(record.len() / 2);

        std::fs::write(&lf.filepath, head).unwrap();
        assert!(lf.open());
        let items = lf.consume(10);
        assert!(items.is_empty());
        assert!(lf.lines_read() == 0);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&lf.filepath)
            .unwrap();
        writeln!(file, "{}", tail).unwrap();
        drop(file);

        let items = lf.consume(10);
        assert_eq!(items.len(), 1);
        assert_eq!(lf.lines_read(), 1);
    }

    #[test]
    fn missing_file_does_not_open() {
        let dir = tempdir().unwrap();
        let lf: LogFile<Event> = LogFile::new(spec(dir.path()), Utc::now(), 0);
        assert!(!lf.exists());
    }

    #[test]
    fn csv_file_parses_header_then_rows() {
        let dir = tempdir().unwrap();
        let mut s = spec(dir.path());
        s.read_csv = true;
        let hour = Utc::now();
        let mut lf: LogFile<Event> = LogFile::new(s, hour, 0);
        let mut file = File::create(&lf.filepath).unwrap();
        writeln!(file, "ts|saddr|daddr|ipid|ttl|proto|sport|dport|anum|snum|options|payload|syn|ack|rst|fin|window size|probed").unwrap();
        writeln!(file, "1599487200000|192.0.2.1|192.0.2.2|61602|231|tcp|22734|42|0|0||||1|0|0|0|65535|false").unwrap();
        drop(file);
        assert!(lf.open());
        let items = lf.consume(10);
        assert_eq!(items.len(), 1);
    }
}
