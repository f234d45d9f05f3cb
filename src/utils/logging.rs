use std::{
    fs::{self, OpenOptions},
    io,
    path::Path,
    sync::Mutex,
};
use tracing_subscriber::{fmt, EnvFilter};

fn default_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }))
}

/// Installs the global subscriber. `RUST_LOG` wins over `debug`.
///
/// With a log file, lines are appended to it instead of going to stderr.
pub fn init_logging(debug: bool, log_file: Option<&str>) -> io::Result<()> {
    let builder = fmt().with_env_filter(default_filter(debug)).with_target(debug);

    let installed = match log_file {
        Some(log_file) => {
            // Create log directory if it doesn't exist
            if let Some(parent) = Path::new(log_file).parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(log_file)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    };

    installed.map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}
