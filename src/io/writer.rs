/// Writes assembled events to gzip-compressed, newline-delimited JSON
/// files on disk, one per dump timestamp.
///
/// Grounded on `LogWriter` in the original writer: at most two files stay
/// open at once, the oldest is flushed and closed when a third is opened.
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::error::AssembleResult;

pub struct DiskWriter {
    datasource: String,
    out_dir: PathBuf,
    open_files: HashMap<String, GzEncoder<std::fs::File>>,
    open_order: Vec<String>,
}

impl DiskWriter {
    pub fn new<S: Into<String>>(datasource: S, out_dir: PathBuf) -> Self {
        DiskWriter {
            datasource: datasource.into(),
            out_dir,
            open_files: HashMap::new(),
            open_order: Vec::new(),
        }
    }

    fn get_file(&mut self, file_ts: &str) -> AssembleResult<&mut GzEncoder<std::fs::File>> {
        if !self.open_files.contains_key(file_ts) {
            let filename = crate::io::naming::output_log_filename(&self.datasource, file_ts);
            let path = self.out_dir.join(&filename);
            if path.is_file() {
                warn!(path = %path.display(), "output file already exists, appending");
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            let encoder = GzEncoder::new(file, Compression::default());
            self.open_files.insert(file_ts.to_string(), encoder);
            self.open_order.push(file_ts.to_string());
            self.cleanup();
        }
        Ok(self.open_files.get_mut(file_ts).unwrap())
    }

    /// Keeps at most two files open, closing (and flushing) the oldest.
    fn cleanup(&mut self) {
        if self.open_order.len() <= 2 {
            return;
        }
        let oldest = self.open_order.remove(0);
        if let Some(mut encoder) = self.open_files.remove(&oldest) {
            if let Err(e) = encoder.try_finish() {
                warn!(file_ts = %oldest, error = %e, "failed to finish gzip stream on close");
            }
            debug!(file_ts = %oldest, "closed output file");
        }
    }

    pub fn write_elems(&mut self, elems: &[serde_json::Value], file_ts: &str) -> AssembleResult<()> {
        let encoder = self.get_file(file_ts)?;
        for elem in elems {
            writeln!(encoder, "{}", elem)?;
        }
        Ok(())
    }

    /// Flushes and closes every still-open file. Call once the matcher
    /// loop exits so gzip trailers are written.
    pub fn close_all(&mut self) -> AssembleResult<()> {
        for file_ts in self.open_order.drain(..) {
            if let Some(mut encoder) = self.open_files.remove(&file_ts) {
                encoder.try_finish()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn writes_and_reads_back_gzip_json_lines() {
        let dir = tempdir().unwrap();
        let mut writer = DiskWriter::new("bcix-nt", dir.path().to_path_buf());
        writer
            .write_elems(&[serde_json::json!({"ts": 1})], "20200907-070000")
            .unwrap();
        writer.close_all().unwrap();

        let path = dir.path().join("bcix-nt-events-20200907-070000.json.gz");
        let file = std::fs::File::open(path).unwrap();
        let mut decoder = GzDecoder::new(file);
        let mut contents = String::new();
        decoder.read_to_string(&mut contents).unwrap();
        assert!(contents.contains("\"ts\":1"));
    }

    #[test]
    fn evicts_oldest_file_past_two_open() {
        let dir = tempdir().unwrap();
        let mut writer = DiskWriter::new("bcix-nt", dir.path().to_path_buf());
        writer.write_elems(&[serde_json::json!({"ts": 1})], "a").unwrap();
        writer.write_elems(&[serde_json::json!({"ts": 2})], "b").unwrap();
        writer.write_elems(&[serde_json::json!({"ts": 3})], "c").unwrap();
        assert_eq!(writer.open_files.len(), 2);
        assert!(!writer.open_files.contains_key("a"));
        writer.close_all().unwrap();
    }
}
