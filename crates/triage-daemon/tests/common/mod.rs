#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::json;
use triage_daemon::{Clock, TriageConfig, WorkerCommand};
use triage_protocol::Command;

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn worker_config(script: &str) -> TriageConfig {
    TriageConfig::default()
        .with_worker(WorkerCommand::new("sh").with_script(fixture(script)))
        .with_request_timeout(Duration::from_secs(5))
        .with_startup_timeout(Duration::from_secs(5))
        .with_idle_timeout(Duration::from_secs(300))
}

pub fn fake_worker_config() -> TriageConfig {
    worker_config("fake_worker.sh")
}

/// Worker replies with `{"label": label}` after `delay` seconds, blocking
/// everything queued behind it.
pub fn slow(label: &str, delay: f64) -> Command {
    Command::new("slow")
        .with_field("delay", json!(delay))
        .with_field("label", json!(label))
}

/// Like `slow`, but the worker answers from a background job so later
/// commands can overtake it.
pub fn overtakable(label: &str, delay: f64) -> Command {
    Command::new("async")
        .with_field("delay", json!(delay))
        .with_field("label", json!(label))
}

pub fn stall() -> Command {
    Command::new("stall")
}

pub fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Clock that only moves when a test advances it.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}
