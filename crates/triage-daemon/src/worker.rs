//! One external worker process and the tasks that pump its pipes.
//!
//! A worker is driven by four tasks: a stdout reader that splits output into
//! lines, a stdin writer fed through a channel, a stderr logger, and an exit
//! watcher. Observations are reported through [`WorkerEvents`]; the handle
//! itself never interprets output.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WorkerCommand;
use crate::error::SessionError;

/// How long the exit watcher waits for buffered stdout after the process exits.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Callbacks from the worker's I/O tasks. Invoked from tokio tasks, so they
/// must not block.
pub trait WorkerEvents: Send + Sync + 'static {
    /// One complete, non-blank stdout line without its terminator.
    fn on_output_line(&self, line: &str);

    /// One stderr line. Never correlated with requests.
    fn on_error_data(&self, line: &str);

    /// The process exited and stdout has been drained.
    fn on_exit(&self, exit: WorkerExit);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "killed by signal"),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("worker is not running")]
pub struct WorkerNotRunning;

pub struct WorkerHandle {
    pid: Option<u32>,
    stdin_tx: mpsc::UnboundedSender<String>,
    kill: Arc<Notify>,
    running: Arc<AtomicBool>,
    exit_rx: watch::Receiver<Option<WorkerExit>>,
}

impl WorkerHandle {
    /// Launch the worker and wire its I/O tasks. Must be called from within a
    /// tokio runtime.
    pub fn spawn(
        command: &WorkerCommand,
        events: Arc<dyn WorkerEvents>,
    ) -> Result<Self, SessionError> {
        let startup_error = |reason: String| SessionError::StartupFailure {
            program: command.display(),
            reason,
        };

        let mut cmd = Command::new(&command.executable);
        if let Some(script) = &command.script {
            cmd.arg(script);
        }
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| startup_error(e.to_string()))?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| startup_error("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| startup_error("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| startup_error("stderr not captured".to_string()))?;

        info!(pid = ?pid, command = %command.display(), "Worker spawned");

        let kill = Arc::new(Notify::new());
        let running = Arc::new(AtomicBool::new(true));
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let reader = spawn_stdout_reader(stdout, pid, Arc::clone(&events));
        spawn_stderr_logger(stderr, Arc::clone(&events));
        spawn_stdin_writer(stdin, stdin_rx, pid, Arc::clone(&kill));
        spawn_exit_watcher(ExitWatch {
            child,
            pid,
            reader,
            kill: Arc::clone(&kill),
            running: Arc::clone(&running),
            events,
            exit_tx,
        });

        Ok(Self {
            pid,
            stdin_tx,
            kill,
            running,
            exit_rx,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue one newline-terminated command for the writer task. Does not wait
    /// for a reply.
    pub fn send(&self, line: String) -> Result<(), WorkerNotRunning> {
        if !self.is_running() {
            return Err(WorkerNotRunning);
        }
        self.stdin_tx.send(line).map_err(|_| WorkerNotRunning)
    }

    /// Terminate the process if it is still running. Idempotent.
    pub fn kill(&self) {
        if self.is_running() {
            self.kill.notify_one();
        }
    }

    /// Wait for the process to exit and its output to be drained.
    pub async fn wait(&self) -> Option<WorkerExit> {
        let mut rx = self.exit_rx.clone();
        let exit = rx.wait_for(Option::is_some).await.ok()?;
        *exit
    }

    /// Exit status if the process has already exited.
    pub fn exit_status(&self) -> Option<WorkerExit> {
        *self.exit_rx.borrow()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

fn spawn_stdout_reader<R>(
    stdout: R,
    pid: Option<u32>,
    events: Arc<dyn WorkerEvents>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() != Some(&b'\n') {
                        warn!(
                            pid = ?pid,
                            bytes = buf.len(),
                            "Dropping unterminated worker output at EOF"
                        );
                        break;
                    }
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if line.trim().is_empty() {
                        continue;
                    }
                    events.on_output_line(line);
                }
                Err(e) => {
                    warn!(pid = ?pid, error = %e, "Worker stdout read failed");
                    break;
                }
            }
        }
        debug!(pid = ?pid, "Worker stdout closed");
    })
}

fn spawn_stderr_logger<R>(stderr: R, events: Arc<dyn WorkerEvents>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if !line.is_empty() {
                        events.on_error_data(line);
                    }
                }
            }
        }
    });
}

fn spawn_stdin_writer(
    stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<String>,
    pid: Option<u32>,
    kill: Arc<Notify>,
) {
    tokio::spawn(async move {
        let mut writer = BufWriter::new(stdin);
        while let Some(line) = rx.recv().await {
            let result = async {
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = result {
                warn!(pid = ?pid, error = %e, "Worker stdin write failed, killing worker");
                kill.notify_one();
                break;
            }
        }
    });
}

struct ExitWatch {
    child: Child,
    pid: Option<u32>,
    reader: JoinHandle<()>,
    kill: Arc<Notify>,
    running: Arc<AtomicBool>,
    events: Arc<dyn WorkerEvents>,
    exit_tx: watch::Sender<Option<WorkerExit>>,
}

fn spawn_exit_watcher(watch: ExitWatch) {
    let ExitWatch {
        mut child,
        pid,
        mut reader,
        kill,
        running,
        events,
        exit_tx,
    } = watch;

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill.notified() => {
                debug!(pid = ?pid, "Killing worker");
                if let Err(e) = child.start_kill() {
                    debug!(pid = ?pid, error = %e, "Kill signal not delivered");
                }
                child.wait().await
            }
        };

        let exit = WorkerExit {
            code: status.ok().and_then(|s| s.code()),
        };

        if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, &mut reader)
            .await
            .is_err()
        {
            warn!(pid = ?pid, "Worker stdout still open after exit, abandoning it");
            reader.abort();
        }

        running.store(false, Ordering::SeqCst);
        info!(pid = ?pid, status = %exit, "Worker exited");
        events.on_exit(exit);
        let _ = exit_tx.send(Some(exit));
    });
}
