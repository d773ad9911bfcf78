use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

const DEFAULT_EXECUTABLE: &str = "python3";
const DEFAULT_WORKER_PATH: &str = "ai-engine/main.py";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// How worker output lines are matched to waiting requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrelationMode {
    /// The next output line answers the oldest outstanding request.
    #[default]
    Fifo,
    /// Commands carry a `request_id` that the worker echoes back.
    Tagged,
}

impl CorrelationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationMode::Fifo => "fifo",
            CorrelationMode::Tagged => "tagged",
        }
    }
}

impl FromStr for CorrelationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(CorrelationMode::Fifo),
            "tagged" => Ok(CorrelationMode::Tagged),
            other => Err(format!("unknown correlation mode '{}'", other)),
        }
    }
}

/// Program line used to launch one worker: `executable [script] [args...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub executable: String,
    pub script: Option<PathBuf>,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            script: None,
            args: Vec::new(),
        }
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn display(&self) -> String {
        let mut parts = vec![self.executable.clone()];
        if let Some(script) = &self.script {
            parts.push(script.display().to_string());
        }
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub worker: WorkerCommand,
    pub request_timeout: Duration,
    pub startup_timeout: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_sessions: usize,
    pub correlation: CorrelationMode,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl TriageConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparseable values fall
    /// back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let executable = with_legacy(&lookup, "TRIAGE_WORKER_EXECUTABLE", "PYTHON_EXECUTABLE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EXECUTABLE.to_string());
        let script = match with_legacy(&lookup, "TRIAGE_WORKER_PATH", "PYTHON_ENGINE_PATH") {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_WORKER_PATH)),
        };

        let correlation = match lookup("TRIAGE_CORRELATION") {
            Some(raw) => raw.parse().unwrap_or_else(|err: String| {
                warn!(error = %err, "Ignoring TRIAGE_CORRELATION, using fifo");
                CorrelationMode::Fifo
            }),
            None => CorrelationMode::Fifo,
        };

        Self {
            worker: WorkerCommand {
                executable,
                script,
                args: Vec::new(),
            },
            request_timeout: Duration::from_millis(parse_or(
                &lookup,
                "TRIAGE_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
            )),
            startup_timeout: Duration::from_millis(parse_or(
                &lookup,
                "TRIAGE_STARTUP_TIMEOUT_MS",
                DEFAULT_STARTUP_TIMEOUT_MS,
            )),
            idle_timeout: Duration::from_secs(parse_or(
                &lookup,
                "TRIAGE_IDLE_TIMEOUT",
                DEFAULT_IDLE_TIMEOUT_SECS,
            )),
            sweep_interval: Duration::from_secs(
                parse_or(&lookup, "TRIAGE_SWEEP_INTERVAL", DEFAULT_SWEEP_INTERVAL_SECS).max(1),
            ),
            max_sessions: parse_or(&lookup, "TRIAGE_MAX_SESSIONS", DEFAULT_MAX_SESSIONS),
            correlation,
        }
    }

    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn with_correlation(mut self, mode: CorrelationMode) -> Self {
        self.correlation = mode;
        self
    }
}

fn with_legacy<F>(lookup: &F, key: &str, legacy: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        return Some(value);
    }
    let value = lookup(legacy)?;
    warn!(
        legacy = legacy,
        replacement = key,
        "Using deprecated environment variable; please switch to the new name"
    );
    Some(value)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> TriageConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TriageConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = TriageConfig::default();
        assert_eq!(config.worker.executable, DEFAULT_EXECUTABLE);
        assert_eq!(
            config.worker.script,
            Some(PathBuf::from(DEFAULT_WORKER_PATH))
        );
        assert_eq!(
            config.request_timeout,
            Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)
        );
        assert_eq!(
            config.startup_timeout,
            Duration::from_millis(DEFAULT_STARTUP_TIMEOUT_MS)
        );
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(config.correlation, CorrelationMode::Fifo);
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("TRIAGE_WORKER_EXECUTABLE", "sh"),
            ("TRIAGE_WORKER_PATH", "worker.sh"),
            ("TRIAGE_REQUEST_TIMEOUT_MS", "250"),
            ("TRIAGE_STARTUP_TIMEOUT_MS", "1500"),
            ("TRIAGE_IDLE_TIMEOUT", "5"),
            ("TRIAGE_SWEEP_INTERVAL", "2"),
            ("TRIAGE_MAX_SESSIONS", "3"),
            ("TRIAGE_CORRELATION", "Tagged"),
        ]);
        assert_eq!(config.worker.executable, "sh");
        assert_eq!(config.worker.script, Some(PathBuf::from("worker.sh")));
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.startup_timeout, Duration::from_millis(1500));
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.sweep_interval, Duration::from_secs(2));
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.correlation, CorrelationMode::Tagged);
    }

    #[test]
    fn test_legacy_names_are_honoured() {
        let config = config_from(&[
            ("PYTHON_EXECUTABLE", "python3.11"),
            ("PYTHON_ENGINE_PATH", "/opt/engine/main.py"),
        ]);
        assert_eq!(config.worker.executable, "python3.11");
        assert_eq!(
            config.worker.script,
            Some(PathBuf::from("/opt/engine/main.py"))
        );
    }

    #[test]
    fn test_new_names_win_over_legacy() {
        let config = config_from(&[
            ("PYTHON_EXECUTABLE", "python2"),
            ("TRIAGE_WORKER_EXECUTABLE", "python3"),
        ]);
        assert_eq!(config.worker.executable, "python3");
    }

    #[test]
    fn test_empty_worker_path_runs_executable_alone() {
        let config = config_from(&[("TRIAGE_WORKER_PATH", "")]);
        assert!(config.worker.script.is_none());
    }

    #[test]
    fn test_garbage_values_fall_back() {
        let config = config_from(&[
            ("TRIAGE_REQUEST_TIMEOUT_MS", "soon"),
            ("TRIAGE_MAX_SESSIONS", "-4"),
            ("TRIAGE_CORRELATION", "psychic"),
            ("TRIAGE_SWEEP_INTERVAL", "0"),
        ]);
        assert_eq!(
            config.request_timeout,
            Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)
        );
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(config.correlation, CorrelationMode::Fifo);
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_pattern() {
        let config = TriageConfig::default()
            .with_worker(WorkerCommand::new("sh").with_script("w.sh").with_arg("-x"))
            .with_request_timeout(Duration::from_millis(100))
            .with_startup_timeout(Duration::from_millis(200))
            .with_idle_timeout(Duration::from_secs(1))
            .with_sweep_interval(Duration::from_millis(50))
            .with_max_sessions(2)
            .with_correlation(CorrelationMode::Tagged);

        assert_eq!(config.worker.display(), "sh w.sh -x");
        assert_eq!(config.request_timeout, Duration::from_millis(100));
        assert_eq!(config.startup_timeout, Duration::from_millis(200));
        assert_eq!(config.idle_timeout, Duration::from_secs(1));
        assert_eq!(config.sweep_interval, Duration::from_millis(50));
        assert_eq!(config.max_sessions, 2);
        assert_eq!(config.correlation, CorrelationMode::Tagged);
    }
}
