//! Tracing setup for hosts that don't install their own subscriber.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Map a `STREAMPIPE_LOG` value onto a level directive.
fn base_level(value: Option<&str>) -> &'static str {
    match value {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

fn build_filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let level = base_level(std::env::var("STREAMPIPE_LOG").ok().as_deref());
    EnvFilter::new(format!("streampipe={level}"))
}

/// Install a stderr subscriber honoring `RUST_LOG`, `STREAMPIPE_LOG` and
/// `LOG_FORMAT=json`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = build_filter();
    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
