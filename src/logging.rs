use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialise logging. The default level is `info`; with `debug` enabled it is
/// `debug` and can be overridden via the `RUST_LOG` environment variable.
/// When `file` is given, output is appended to that file instead of stderr.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(debug: bool, file: Option<PathBuf>) -> bool {
    // Without debug logging `RUST_LOG` is ignored so a stray variable in the
    // environment cannot turn on verbose output.
    let level = if debug { "debug" } else { "info" };
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let Some(path) = file else {
        return tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_ok();
    };

    let opened = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
        });
    match opened {
        Ok(log) => {
            let (writer, guard) = tracing_appender::non_blocking(log);
            let installed = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .is_ok();
            if installed {
                let _ = FILE_GUARD.set(guard);
            }
            installed
        }
        Err(e) => {
            let installed = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .try_init()
                .is_ok();
            tracing::warn!(path = %path.display(), "cannot open log file: {e}");
            installed
        }
    }
}
