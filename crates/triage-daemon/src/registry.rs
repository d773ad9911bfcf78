//! Process-wide map of live sessions plus the periodic idle sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use triage_common::{mutex_lock_or_recover, rwlock_read_or_recover, rwlock_write_or_recover};
use triage_protocol::{Command, WorkerResponse};

use crate::clock::{Clock, SystemClock};
use crate::config::TriageConfig;
use crate::error::SessionError;
use crate::session::{Session, SessionId, SessionInfo};

/// Owns every live session. Lock order is registry map, then session state.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    config: TriageConfig,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(config: TriageConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: TriageConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            clock,
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        }
    }

    /// Build a registry and start its periodic sweep.
    pub fn start(config: TriageConfig) -> Arc<Self> {
        let registry = Arc::new(Self::new(config));
        registry.start_sweeper();
        registry
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Start a worker, complete its handshake and register the session.
    /// Nothing is registered unless startup succeeded.
    pub async fn create_session(&self) -> Result<(SessionId, WorkerResponse), SessionError> {
        if self.is_closed() {
            return Err(SessionError::ShuttingDown);
        }
        let max = self.config.max_sessions;
        if self.session_count() >= max {
            return Err(SessionError::LimitReached(max));
        }

        let (session, response) = Session::create(&self.config, Arc::clone(&self.clock)).await?;
        let id = session.id().clone();
        let session = Arc::new(session);

        let rejection = {
            let mut sessions = rwlock_write_or_recover(&self.sessions);
            if self.is_closed() {
                Some(SessionError::ShuttingDown)
            } else if sessions.len() >= max {
                Some(SessionError::LimitReached(max))
            } else {
                sessions.insert(id.clone(), Arc::clone(&session));
                None
            }
        };

        if let Some(err) = rejection {
            session.shutdown().await;
            return Err(err);
        }

        info!(session_id = %id, "Session registered");
        Ok((id, response))
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        rwlock_read_or_recover(&self.sessions)
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Send a command to a session's worker and wait for its reply. A session
    /// found dead along the way is removed so later calls see `NotFound`.
    pub async fn dispatch(
        &self,
        id: &str,
        command: &Command,
    ) -> Result<WorkerResponse, SessionError> {
        let session = self.lookup(id)?;
        let result = session.request(command).await;
        if let Err(SessionError::Inactive(_) | SessionError::WorkerTerminated(_)) = &result {
            if !session.is_active() {
                self.reap(id, &session);
            }
        }
        result
    }

    fn reap(&self, id: &str, session: &Arc<Session>) {
        let removed = {
            let mut sessions = rwlock_write_or_recover(&self.sessions);
            match sessions.get(id) {
                Some(current) if Arc::ptr_eq(current, session) => sessions.remove(id),
                _ => None,
            }
        };
        if let Some(session) = removed {
            session.terminate();
            info!(session_id = %id, "Reaped dead session");
        }
    }

    /// Remove and terminate a session. Unknown ids are a no-op.
    pub async fn terminate(&self, id: &str) -> bool {
        let removed = rwlock_write_or_recover(&self.sessions).remove(id);
        match removed {
            Some(session) => {
                session.shutdown().await;
                true
            }
            None => {
                debug!(session_id = %id, "Terminate for unknown session ignored");
                false
            }
        }
    }

    /// Evict sessions idle beyond the configured threshold or whose worker
    /// has died. Returns the evicted ids.
    pub fn sweep(&self) -> Vec<SessionId> {
        let threshold = self.config.idle_timeout;
        let evicted: Vec<Arc<Session>> = {
            let mut sessions = rwlock_write_or_recover(&self.sessions);
            let stale: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, session)| session.retire_if_stale(threshold))
                .map(|(id, _)| id.clone())
                .collect();
            stale.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        evicted
            .into_iter()
            .map(|session| {
                session.terminate();
                info!(session_id = %session.id(), "Evicted stale session");
                session.id().clone()
            })
            .collect()
    }

    /// Run `sweep` every `sweep_interval` until the registry is dropped or
    /// shut down. Calling this twice has no effect.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = mutex_lock_or_recover(&self.sweeper);
        if slot.is_some() || self.is_closed() {
            return;
        }

        let registry = Arc::downgrade(self);
        let period = self.config.sweep_interval.max(Duration::from_millis(1));
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.sweep();
                if !evicted.is_empty() {
                    info!(count = evicted.len(), "Idle sweep evicted sessions");
                }
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "Session sweeper started");
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = rwlock_read_or_recover(&self.sessions)
            .values()
            .map(|session| session.info())
            .collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    pub fn session_count(&self) -> usize {
        rwlock_read_or_recover(&self.sessions).len()
    }

    /// Stop the sweeper, refuse new sessions, and terminate every worker.
    /// Returns the number of sessions shut down. Idempotent.
    pub async fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        if let Some(handle) = mutex_lock_or_recover(&self.sweeper).take() {
            handle.abort();
        }

        let sessions: Vec<Arc<Session>> = rwlock_write_or_recover(&self.sessions)
            .drain()
            .map(|(_, session)| session)
            .collect();
        let count = sessions.len();
        info!(count = count, "Shutting down all sessions");

        for session in &sessions {
            session.terminate();
        }
        for session in &sessions {
            session.shutdown().await;
        }
        count
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if let Some(handle) = mutex_lock_or_recover(&self.sweeper).take() {
            handle.abort();
        }
    }
}
