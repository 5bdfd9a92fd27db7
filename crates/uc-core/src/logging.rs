use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `UC_LOG_FORMAT=pretty` switches from JSON
/// lines to human-readable output for local runs.
pub fn init(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let pretty = std::env::var("UC_LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("pretty"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = if pretty {
        builder.pretty().try_init().is_ok()
    } else {
        builder.json().try_init().is_ok()
    };

    if installed {
        tracing::info!(service = service_name, "logging initialized");
    }
}
