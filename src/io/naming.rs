/// Input/output filename schemas for hourly log files.
///
/// Grounded on `swift_fn`/`compressed_pattern`/`uncompressed_pattern` in
/// the original reader, and the `{datasource}-events-{file_ts}.json.gz`
/// pattern in the original writer.
use chrono::{DateTime, Utc};

/// Builds the name of an hourly input log file:
/// `{date}.{datasource}.spoki.{proto}.{log_type}.{unix_ts}.{ext}[.gz]`.
pub fn hourly_log_filename(
    hour: DateTime<Utc>,
    datasource: &str,
    proto: &str,
    log_type: &str,
    compressed: bool,
    read_csv: bool,
) -> String {
    let date_str = hour.format("%Y-%m-%d.%H:%M:%S").to_string();
    let unix_ts = hour.timestamp();
    let ext = if read_csv { "csv" } else { "json" };
    let base = format!("{date_str}.{datasource}.spoki.{proto}.{log_type}.{unix_ts}.{ext}");
    if compressed {
        format!("{base}.gz")
    } else {
        base
    }
}

/// The timestamp component attached to output dump files:
/// `%Y%m%d-%H%M%S`, always expressed in UTC.
pub fn make_file_timestr(observed: DateTime<Utc>) -> String {
    observed.format("%Y%m%d-%H%M%S").to_string()
}

/// Output event log filename: `{datasource}-events-{file_ts}.json.gz`.
pub fn output_log_filename(datasource: &str, file_ts: &str) -> String {
    format!("{datasource}-events-{file_ts}.json.gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builds_expected_input_filename() {
        let hour = Utc.with_ymd_and_hms(2020, 9, 7, 7, 0, 0).unwrap();
        let name = hourly_log_filename(hour, "ucsd-nt-reactive", "tcp", "raw", true, false);
        assert_eq!(
            name,
            "2020-09-07.07:00:00.ucsd-nt-reactive.spoki.tcp.raw.1599462000.json.gz"
        );
    }

    #[test]
    fn builds_expected_output_filename() {
        let hour = Utc.with_ymd_and_hms(2020, 9, 7, 7, 0, 0).unwrap();
        let ts = make_file_timestr(hour);
        assert_eq!(output_log_filename("bcix-nt", &ts), format!("bcix-nt-events-{ts}.json.gz"));
    }
}
