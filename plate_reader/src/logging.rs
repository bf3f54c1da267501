use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence. Without it, everything logs at `info` and this
/// crate at `debug` when `verbose` is set.
pub fn setup_tracing(verbose: bool) {
    let default_directive = if verbose {
        "info,plate_reader=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
