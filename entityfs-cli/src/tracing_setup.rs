//! Tracing initialization. Mirrors the teacher's per-subsystem env-filter
//! convention, keyed off `ENTITYFS_LOG` instead of a project-specific name,
//! with an opt-in JSON formatter for production log shipping.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `-v` raises the default filter from `warn` up through `info`, `debug`,
/// `trace`; `--log-json` switches to structured JSON output.
pub fn init(verbosity: u8, json: bool) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("ENTITYFS_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("entityfs={default_level}")));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_line_number(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_line_number(true))
            .with(filter)
            .init();
    }
}
