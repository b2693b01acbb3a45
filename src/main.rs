/// spoki-assemble - honeypot event assembly CLI
///
/// Wires the confirmation matcher, phase matcher, and driver loop to a pair
/// of live hourly readers over `log_dir`, emitting gzipped JSON-lines
/// output for every hour of interaction records produced.
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::Parser;
use tracing::{error, info};

use spoki_assemble::io::{FileFactory, LiveReader, StreamSpec};
use spoki_assemble::model::{Event, ProbeConfirmation};
use spoki_assemble::{
    init_library, AssembleError, AssembleResult, ConfirmationMatcher, DiskWriter, EventMatcher,
    PhaseMatcher,
};

#[derive(Parser)]
#[command(name = "assemble")]
#[command(version = spoki_assemble::VERSION)]
#[command(about = "Assembles honeypot packet/probe/confirmation streams into interaction records", long_about = None)]
struct Args {
    /// Directory containing the hourly log files (or the Swift container
    /// path when `--swift` is passed).
    log_dir: PathBuf,

    /// First hour to read, as YYYY-MM-DD.
    #[arg(long)]
    start_date: NaiveDate,

    /// Hour of day (0-23) that `start_date` begins at.
    #[arg(long, default_value_t = 0)]
    hour: u32,

    /// Datasource identifier embedded in input/output filenames.
    #[arg(long)]
    datasource: String,

    /// Probe confirmation binding window, in minutes.
    #[arg(long = "probe-timeout", default_value_t = 5)]
    probe_timeout_mins: u64,

    /// Two-phase promotion window, in seconds.
    #[arg(long = "phase-timeout", default_value_t = 600)]
    phase_timeout_secs: i64,

    /// Last hour to read. Currently only used for validation: the driver
    /// loop itself runs indefinitely (§4.4), same as the original.
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Read from an object-store (Swift) layout instead of a local directory.
    #[arg(long, conflicts_with = "local")]
    swift: bool,

    /// Read from a local directory (default).
    #[arg(long, conflicts_with = "swift")]
    local: bool,

    /// Publish assembled records to Kafka instead of local gzip files.
    /// Not implemented by this assembler (see DESIGN.md); passing it is a
    /// hard error rather than a silent fallback.
    #[arg(long, conflicts_with = "logs")]
    kafka: bool,

    /// Write assembled records to local gzip files (default).
    #[arg(long, conflicts_with = "kafka")]
    logs: bool,

    /// Input hourly files are gzip-compressed.
    #[arg(long)]
    compressed: bool,

    /// Read pipe-delimited CSV input (default).
    #[arg(long, conflicts_with = "json")]
    csv: bool,

    /// Read newline-delimited JSON input.
    #[arg(long, conflicts_with = "csv")]
    json: bool,

    /// Output directory for assembled records.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Path to a configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

fn main() {
    let args = Args::parse();

    let (config, _guard) = match init_library(Some(&args.config)) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("failed to initialize: {e}");
            eprintln!("using default configuration...");
            match init_library::<&str>(None) {
                Ok(result) => result,
                Err(e) => {
                    eprintln!("fatal error: {e}");
                    process::exit(1);
                }
            }
        }
    };

    if let Err(e) = run(args, config) {
        error!(error = %e, "assembler exited with error");
        process::exit(1);
    }
}

fn run(args: Args, config: spoki_assemble::AppConfig) -> AssembleResult<()> {
    if args.kafka {
        return Err(AssembleError::validation_error(
            "kafka",
            "Kafka output is not implemented by this assembler; use --logs",
        ));
    }

    let read_csv = if args.json {
        false
    } else {
        args.csv || config.io.read_csv
    };
    let compressed = args.compressed || config.io.compressed;
    let probe_timeout = Duration::from_secs(args.probe_timeout_mins * 60);
    let phase_timeout_secs = if args.phase_timeout_secs > 0 {
        args.phase_timeout_secs
    } else {
        config.assembly.phase_timeout_secs as i64
    };
    let confirmation_load_threshold =
        Duration::from_secs(config.assembly.confirmation_load_threshold_secs);
    let out_dir = args.output.unwrap_or_else(|| PathBuf::from(&config.io.out_dir));
    std::fs::create_dir_all(&out_dir)?;

    let start_hour = start_datetime(&args)?;

    let confirmation_spec = StreamSpec {
        path: args.log_dir.clone(),
        datasource: args.datasource.clone(),
        proto: "tcp".to_string(),
        log_type: "scamper".to_string(),
        compressed,
        read_csv,
    };
    let event_spec = StreamSpec {
        path: args.log_dir.clone(),
        datasource: args.datasource.clone(),
        proto: "tcp".to_string(),
        log_type: "raw".to_string(),
        compressed,
        read_csv,
    };

    let confirmation_reader: LiveReader<ProbeConfirmation> =
        LiveReader::new(FileFactory::new(confirmation_spec), start_hour);
    let event_reader: LiveReader<Event> =
        LiveReader::new(FileFactory::new(event_spec), start_hour);

    let confirmation_matcher =
        ConfirmationMatcher::new(confirmation_reader, event_reader, probe_timeout);
    let phase_matcher = PhaseMatcher::new(
        phase_timeout_secs,
        config.assembly.retransmit_window_batches,
        config.assembly.late_ack_policy,
    );
    let writer = DiskWriter::new(args.datasource.clone(), out_dir);

    let mut event_matcher = EventMatcher::new(
        confirmation_matcher,
        phase_matcher,
        writer,
        confirmation_load_threshold,
        start_hour,
        0,
    );

    info!(
        log_dir = %args.log_dir.display(),
        datasource = %args.datasource,
        start_hour = %start_hour,
        "starting event assembly"
    );

    event_matcher.run()
}

fn start_datetime(args: &Args) -> AssembleResult<DateTime<Utc>> {
    let naive = args
        .start_date
        .and_hms_opt(args.hour, 0, 0)
        .ok_or_else(|| AssembleError::validation_error("hour", "hour must be 0-23"))?;
    Utc.from_local_datetime(&naive)
        .single()
        .ok_or_else(|| AssembleError::validation_error("start_date", "ambiguous local datetime"))
}
