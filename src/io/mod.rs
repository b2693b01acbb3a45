/// Hourly log file I/O: naming conventions, the live file reader, and the
/// gzip output writer.
pub mod naming;
pub mod reader;
pub mod writer;

pub use reader::{FileFactory, LiveReader, LogFile, LogRecord, StreamSpec};
pub use writer::DiskWriter;
