//! Journal initialization

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::info;

/// Options controlling where and how verbosely svcadm logs.
#[derive(Debug, Clone)]
pub struct JournalOptions {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Append-only log file; `None` logs to the console only
    pub log_file: Option<PathBuf>,
}

/// Map an operator-facing level name onto a tracing filter directive.
///
/// `fatal` has no tracing counterpart and maps onto `error`.
pub fn level_directive(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "fatal" => "error",
        _ => "info",
    }
}

/// Initialize console logging and, when configured, the log file.
pub fn init_journal(options: &JournalOptions) -> io::Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&options.level)));

    let console = fmt::layer().with_target(false).compact();

    let file_layer = match &options.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .mode(0o644)
                .open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .init();

    if let Some(path) = &options.log_file {
        info!("Logging to {}", path.display());
    }

    Ok(())
}
