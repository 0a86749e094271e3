use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init();
}
