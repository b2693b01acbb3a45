/// spoki-assemble - honeypot event assembly
///
/// Reconstructs multi-phase TCP scanner/loader interactions from three
/// independent hourly log streams: raw packets, probe requests, and probe
/// confirmations. See `SPEC_FULL.md` for the full component design.

// Module declarations
pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod matcher;
pub mod model;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AssembleError, AssembleResult};
pub use io::{DiskWriter, FileFactory, LiveReader, StreamSpec};
pub use matcher::{ConfirmationMatcher, EventMatcher, PhaseMatcher};
pub use model::{Event, Packet, ProbeConfirmation, ProbeRequest};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Loads configuration and initializes logging, returning the guard that
/// must be kept alive for file logging to flush.
///
/// # Example
/// ```no_run
/// use spoki_assemble::init_library;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (config, _guard) = init_library(Some("config.toml"))?;
///     println!("{}", config.general.app_name);
///     Ok(())
/// }
/// ```
pub fn init_library<P: AsRef<std::path::Path>>(
    config_path: Option<P>,
) -> AssembleResult<(AppConfig, Option<tracing_appender::non_blocking::WorkerGuard>)> {
    use tracing::info;

    let config = match config_path {
        Some(path) => AppConfig::load_or_default(path)?,
        None => AppConfig::default(),
    };

    let guard = logging::init_logging(&config.logging)?;
    info!("{} v{} initialized", NAME, VERSION);

    Ok((config, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_and_name_are_present() {
        assert!(!VERSION.is_empty());
        assert!(!NAME.is_empty());
    }

    #[test]
    fn init_library_falls_back_without_config_path() {
        let (config, _guard) = init_library::<&str>(None).unwrap();
        assert_eq!(config.general.app_name, "spoki-assemble");
    }
}
