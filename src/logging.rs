//! Tracing subscriber setup for the `cidx` binary.
//!
//! Logs go to stderr so command output on stdout stays parseable. `RUST_LOG`
//! takes precedence; otherwise the level is `info`, or `debug` with
//! `--verbose`.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
