use tracing_subscriber::filter::EnvFilter;

/// Installs the global subscriber, honouring `RUST_LOG` and defaulting to `warn`.
///
/// Output goes to stderr so it never mixes with the CSV written to stdout.
pub fn set_up() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
