use std::io::Write;

use log::LevelFilter;

/// Initialize the process-wide logger. Verbose raises the filter from Warn
/// to Debug; `RUST_LOG` still overrides either. All output goes to stderr.
pub fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{:>5} [{}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .try_init()
        .ok();
}
