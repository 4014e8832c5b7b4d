use tracing_subscriber::EnvFilter;

/// Log to stderr so stdout stays a single JSON document. `RUST_LOG`
/// overrides the default `warn` level.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
