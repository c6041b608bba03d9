//! Tracing subscriber setup from the `logging` config section.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use chat_relay_core::config::LoggingConfig;

/// Filter directives: `-v` forces debug, otherwise the configured level,
/// followed by any per-crate filters.
fn directives(config: Option<&LoggingConfig>, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.and_then(|c| c.level.as_deref()).unwrap_or("info")
    };

    let mut parts = vec![level.to_string()];
    if let Some(config) = config {
        parts.extend(config.filters.iter().cloned());
    }
    parts.join(",")
}

pub fn init(config: Option<&LoggingConfig>, verbose: bool) {
    let directives = directives(config, verbose);
    let (filter, invalid) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, None),
        Err(_) => match EnvFilter::try_new(&directives) {
            Ok(filter) => (filter, None),
            Err(e) => (EnvFilter::new("info"), Some(e)),
        },
    };

    let writer = match config.map(|c| c.output.as_str()) {
        Some("stdout") => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if config.is_some_and(|c| c.format == "json") {
        builder.json().init();
    } else {
        builder.init();
    }

    if let Some(e) = invalid {
        tracing::warn!(directives = %directives, error = %e, "Invalid log filter, using info");
    }
}
