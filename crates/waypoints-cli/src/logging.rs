//! Diagnostic tracing.
//!
//! stdout belongs to the hook protocol, so the console layer writes to
//! stderr. `RUST_LOG` controls it (default `warn`). Hook invocations also
//! append to a log file under the install root at `info`, since the host
//! hides hook stderr.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

pub fn init(log_file: Option<&Path>) {
    let file_layer = log_file.and_then(open_append).map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .with_filter(filter("info"))
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
                .with_filter(filter("warn")),
        )
        .with(file_layer)
        .init();
}

/// A missing or unwritable log directory only costs us the log.
fn open_append(path: &Path) -> Option<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok()?;
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}
