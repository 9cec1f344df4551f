use env_logger::DEFAULT_FILTER_ENV;
use log::LevelFilter;
use std::io::Write;

/// Target of the messages that policy scripts emit through `slurm.log_*`.
pub const SCRIPT_LOG_TARGET: &str = "jobsubmit::script";

/// Returns the default level of the hook itself and of the script target.
fn default_levels(verbose: bool) -> (LevelFilter, LevelFilter) {
    if verbose {
        // `slurm.log_debug2` maps to trace
        (LevelFilter::Debug, LevelFilter::Trace)
    } else {
        (LevelFilter::Info, LevelFilter::Info)
    }
}

/// Sets the behavior of the logger, based on passed environment variables
/// such as `RUST_LOG`.
pub fn setup_logging(verbose: bool) {
    let mut builder = env_logger::Builder::default();
    let (level, script_level) = default_levels(verbose);
    builder.filter_level(level);
    builder.filter_module(SCRIPT_LOG_TARGET, script_level);

    let has_debug = std::env::var(DEFAULT_FILTER_ENV)
        .map(|v| v.contains("debug"))
        .unwrap_or(false);

    if verbose || has_debug {
        builder.format_timestamp_millis();
    } else {
        // Shortened format
        // <time> <level> [script] <message>
        builder.format(|buf, record| {
            let level_style = buf.default_level_style(record.level()).bold();
            let origin = if record.target() == SCRIPT_LOG_TARGET {
                "[script] "
            } else {
                ""
            };
            writeln!(
                buf,
                "{} {level_style}{}{level_style:#} {origin}{}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        });
    }

    // Overwrite the defaults from env
    builder.parse_default_env();
    builder.init();
}
