//! Tracing setup. Stdout carries protocol output only, so logs go to stderr
//! or to the file named by `TRIAGE_LOG`.

use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const LOG_FILE_ENV: &str = "TRIAGE_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stderr,
    File(PathBuf),
}

impl LogDestination {
    pub fn from_env() -> Self {
        Self::from_value(std::env::var(LOG_FILE_ENV).ok())
    }

    fn from_value(value: Option<String>) -> Self {
        match value {
            Some(path) if !path.trim().is_empty() => LogDestination::File(PathBuf::from(path)),
            _ => LogDestination::Stderr,
        }
    }
}

/// Flushes buffered file logs when dropped. Hold it for the life of the process.
#[derive(Debug)]
pub struct TelemetryGuard {
    _file: Option<WorkerGuard>,
}

struct Sink {
    writer: BoxMakeWriter,
    guard: Option<WorkerGuard>,
    ansi: bool,
}

impl Sink {
    fn stderr() -> Self {
        Self {
            writer: BoxMakeWriter::new(std::io::stderr),
            guard: None,
            ansi: std::io::stderr().is_terminal(),
        }
    }

    fn file(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        Ok(Self {
            writer: BoxMakeWriter::new(writer),
            guard: Some(guard),
            ansi: false,
        })
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `default_level`.
/// An unwritable log file degrades to stderr rather than failing the command.
pub fn init_tracing(default_level: &str, destination: &LogDestination) -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let sink = match destination {
        LogDestination::Stderr => Sink::stderr(),
        LogDestination::File(path) => Sink::file(path).unwrap_or_else(|err| {
            eprintln!("Warning: cannot log to {}: {}", path.display(), err);
            Sink::stderr()
        }),
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(sink.ansi)
        .with_writer(sink.writer)
        .try_init()
        .is_ok();

    TelemetryGuard {
        _file: if installed { sink.guard } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_defaults_to_stderr() {
        assert_eq!(LogDestination::from_value(None), LogDestination::Stderr);
        assert_eq!(
            LogDestination::from_value(Some("  ".to_string())),
            LogDestination::Stderr
        );
    }

    #[test]
    fn test_destination_from_path() {
        assert_eq!(
            LogDestination::from_value(Some("/tmp/triage.log".to_string())),
            LogDestination::File(PathBuf::from("/tmp/triage.log"))
        );
    }

    #[test]
    fn test_file_sink_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("triage.log");
        let sink = Sink::file(&path).unwrap();
        assert!(sink.guard.is_some());
        assert!(!sink.ansi);
        assert!(path.exists());
    }
}
