use std::borrow::Borrow;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use triage_common::mutex_lock_or_recover;
use triage_protocol::{Command, WorkerResponse};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{CorrelationMode, TriageConfig};
use crate::error::SessionError;
use crate::pending::{LineOutcome, PendingQueue, Reply};
use crate::worker::{WorkerEvents, WorkerExit, WorkerHandle};

/// Upper bound on waiting for a killed worker to be reaped.
const EXIT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opaque session identifier handed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for SessionId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Point-in-time snapshot of a session for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub pid: Option<u32>,
    pub active: bool,
    pub pending: usize,
    pub created_at: DateTime<Utc>,
    pub idle_ms: u64,
}

/// Resolves once with the worker's reply to one command.
///
/// Dropping the handle abandons the reply; the worker's answer is still
/// consumed so later requests stay correlated.
#[derive(Debug)]
pub struct ResponseHandle {
    request_id: u64,
    rx: oneshot::Receiver<Reply>,
}

impl ResponseHandle {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }
}

impl Future for ResponseHandle {
    type Output = Result<WorkerResponse, SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(reply) => reply,
            Err(_) => Err(SessionError::WorkerTerminated(
                "response channel closed".to_string(),
            )),
        })
    }
}

struct SessionState {
    active: bool,
    last_activity: Instant,
    pending: PendingQueue,
    next_request_id: u64,
}

/// State shared between the session and its worker's I/O tasks.
struct SessionShared {
    id: SessionId,
    state: Mutex<SessionState>,
    clock: Arc<dyn Clock>,
    correlation: CorrelationMode,
}

impl SessionShared {
    fn expire(&self, request_id: u64, timeout: Duration) {
        let mut state = mutex_lock_or_recover(&self.state);
        let timeout_ms = timeout.as_millis() as u64;
        if state
            .pending
            .expire(request_id, SessionError::RequestTimeout { timeout_ms })
        {
            warn!(
                session_id = %self.id,
                request_id = request_id,
                timeout_ms = timeout_ms,
                "Request timed out"
            );
        }
    }
}

impl WorkerEvents for SessionShared {
    fn on_output_line(&self, line: &str) {
        let mut state = mutex_lock_or_recover(&self.state);
        match state.pending.resolve_line(line, self.correlation) {
            LineOutcome::Resolved(request_id) => {
                debug!(session_id = %self.id, request_id = request_id, "Response delivered");
            }
            LineOutcome::DecodeFailed(request_id) => {
                warn!(
                    session_id = %self.id,
                    request_id = request_id,
                    line = line,
                    "Worker response is not valid JSON"
                );
            }
            LineOutcome::Unsolicited => {
                warn!(session_id = %self.id, line = line, "Dropping worker output with no pending request");
            }
            LineOutcome::Untagged => {
                warn!(session_id = %self.id, line = line, "Dropping worker output without request_id");
            }
            LineOutcome::UnknownId(request_id) => {
                warn!(
                    session_id = %self.id,
                    request_id = request_id,
                    "Dropping worker output for unknown request"
                );
            }
        }
    }

    fn on_error_data(&self, line: &str) {
        debug!(session_id = %self.id, stderr = line, "Worker stderr");
    }

    fn on_exit(&self, exit: WorkerExit) {
        let mut state = mutex_lock_or_recover(&self.state);
        let was_active = state.active;
        state.active = false;
        let failed = state
            .pending
            .fail_all(SessionError::WorkerTerminated(format!("worker exited ({})", exit)));
        drop(state);

        if was_active {
            warn!(session_id = %self.id, status = %exit, failed = failed, "Worker exited unexpectedly");
        } else {
            debug!(session_id = %self.id, status = %exit, "Worker exited");
        }
    }
}

/// One conversation bound to one worker process.
pub struct Session {
    shared: Arc<SessionShared>,
    worker: WorkerHandle,
    request_timeout: Duration,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Spawn a worker and complete the startup handshake.
    ///
    /// On failure the half-started worker is killed and reaped before the
    /// error is returned.
    pub async fn create(
        config: &TriageConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, WorkerResponse), SessionError> {
        let id = SessionId::generate();
        let shared = Arc::new(SessionShared {
            id: id.clone(),
            state: Mutex::new(SessionState {
                active: true,
                last_activity: clock.now(),
                pending: PendingQueue::new(),
                next_request_id: 0,
            }),
            clock,
            correlation: config.correlation,
        });

        let events: Arc<dyn WorkerEvents> = Arc::clone(&shared) as Arc<dyn WorkerEvents>;
        let worker = WorkerHandle::spawn(&config.worker, events)?;
        let session = Self {
            shared,
            worker,
            request_timeout: config.request_timeout,
            created_at: Utc::now(),
        };

        let handshake = match session.send_with_timeout(&Command::start(), config.startup_timeout)
        {
            Ok(handle) => handle.await,
            Err(err) => Err(err),
        };

        match handshake {
            Ok(response) => {
                info!(session_id = %id, pid = ?session.pid(), "Session started");
                Ok((session, response))
            }
            Err(err) => {
                warn!(session_id = %id, error = %err, "Worker handshake failed");
                session.shutdown().await;
                Err(SessionError::HandshakeFailure(err.to_string()))
            }
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.worker.pid()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_active(&self) -> bool {
        mutex_lock_or_recover(&self.shared.state).active
    }

    pub fn pending_count(&self) -> usize {
        mutex_lock_or_recover(&self.shared.state).pending.len()
    }

    /// Forward a command to the worker and return a handle to its reply.
    pub fn send(&self, command: &Command) -> Result<ResponseHandle, SessionError> {
        self.send_with_timeout(command, self.request_timeout)
    }

    /// Send and wait for the reply.
    pub async fn request(&self, command: &Command) -> Result<WorkerResponse, SessionError> {
        self.send(command)?.await
    }

    /// `send` with an explicit reply deadline instead of the configured one.
    pub fn send_with_timeout(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<ResponseHandle, SessionError> {
        let mut state = mutex_lock_or_recover(&self.shared.state);
        if !state.active {
            return Err(SessionError::Inactive(self.shared.id.to_string()));
        }

        state.next_request_id += 1;
        let request_id = state.next_request_id;
        let line = match self.shared.correlation {
            CorrelationMode::Fifo => command.to_line(),
            CorrelationMode::Tagged => command.tagged(request_id).to_line(),
        }
        .map_err(|e| SessionError::Encode(e.to_string()))?;

        state.last_activity = self.shared.clock.now();
        let (tx, rx) = oneshot::channel();
        let timer = spawn_timeout(Arc::downgrade(&self.shared), request_id, timeout);
        state.pending.push(request_id, tx, Some(timer));

        if self.worker.send(line).is_err() {
            state.pending.cancel(request_id);
            return Err(SessionError::Inactive(self.shared.id.to_string()));
        }

        debug!(
            session_id = %self.shared.id,
            request_id = request_id,
            action = command.action(),
            "Command sent"
        );
        Ok(ResponseHandle { request_id, rx })
    }

    /// Stop accepting commands, fail outstanding requests and kill the worker.
    /// Idempotent.
    pub fn terminate(&self) {
        let mut state = mutex_lock_or_recover(&self.shared.state);
        let was_active = state.active;
        state.active = false;
        let failed = state
            .pending
            .fail_all(SessionError::WorkerTerminated("session terminated".to_string()));
        drop(state);

        self.worker.kill();
        if was_active {
            info!(session_id = %self.shared.id, failed = failed, "Session terminated");
        }
    }

    /// Terminate and wait (bounded) for the worker process to exit.
    pub async fn shutdown(&self) {
        self.terminate();
        if tokio::time::timeout(EXIT_WAIT_TIMEOUT, self.worker.wait())
            .await
            .is_err()
        {
            warn!(session_id = %self.shared.id, pid = ?self.pid(), "Worker did not exit in time");
        }
    }

    pub fn idle_for(&self) -> Duration {
        let state = mutex_lock_or_recover(&self.shared.state);
        self.shared.clock.elapsed(state.last_activity)
    }

    pub fn is_idle(&self, threshold: Duration) -> bool {
        self.idle_for() > threshold
    }

    /// Deactivate the session if its worker is gone or it has been idle longer
    /// than `threshold`. Shares the lock with `send`, so a command being
    /// enqueued either completes first or observes the session as inactive.
    /// The caller is responsible for killing the worker afterwards.
    pub fn retire_if_stale(&self, threshold: Duration) -> bool {
        let mut state = mutex_lock_or_recover(&self.shared.state);
        if !state.active {
            return true;
        }
        let idle = self.shared.clock.elapsed(state.last_activity);
        if idle <= threshold {
            return false;
        }
        state.active = false;
        state
            .pending
            .fail_all(SessionError::WorkerTerminated("session expired".to_string()));
        info!(
            session_id = %self.shared.id,
            idle_secs = idle.as_secs(),
            "Session idle, retiring"
        );
        true
    }

    pub fn info(&self) -> SessionInfo {
        let state = mutex_lock_or_recover(&self.shared.state);
        SessionInfo {
            id: self.shared.id.clone(),
            pid: self.worker.pid(),
            active: state.active,
            pending: state.pending.len(),
            created_at: self.created_at,
            idle_ms: self.shared.clock.elapsed(state.last_activity).as_millis() as u64,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("pid", &self.worker.pid())
            .finish()
    }
}

fn spawn_timeout(shared: Weak<SessionShared>, request_id: u64, timeout: Duration) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(shared) = shared.upgrade() {
            shared.expire(request_id, timeout);
        }
    })
    .abort_handle()
}
