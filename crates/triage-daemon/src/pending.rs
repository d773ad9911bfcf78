//! Outstanding requests awaiting a worker response.
//!
//! The queue is plain data: every method runs under the owning session's lock
//! and never blocks. Each waiter carries the identity used for timeout expiry
//! and, in tagged mode, for matching the echoed `request_id`.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use triage_protocol::WorkerResponse;

use crate::config::CorrelationMode;
use crate::error::SessionError;

pub type Reply = Result<WorkerResponse, SessionError>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Reply>,
    timer: Option<AbortHandle>,
}

impl Waiter {
    fn resolve(self, reply: Reply) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The caller may have stopped waiting; the line is consumed either way.
        let _ = self.tx.send(reply);
    }
}

/// What happened to one line of worker output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Delivered to the waiter with this id.
    Resolved(u64),
    /// The matched waiter was failed with `DecodeFailure`.
    DecodeFailed(u64),
    /// Nobody was waiting for this line.
    Unsolicited,
    /// Tagged mode: the line carried no usable `request_id`.
    Untagged,
    /// Tagged mode: no waiter has this `request_id`.
    UnknownId(u64),
}

#[derive(Default)]
pub struct PendingQueue {
    waiters: VecDeque<Waiter>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn push(&mut self, id: u64, tx: oneshot::Sender<Reply>, timer: Option<AbortHandle>) {
        self.waiters.push_back(Waiter { id, tx, timer });
    }

    /// Route one output line to its waiter.
    pub fn resolve_line(&mut self, line: &str, mode: CorrelationMode) -> LineOutcome {
        match mode {
            CorrelationMode::Fifo => self.resolve_head(line),
            CorrelationMode::Tagged => self.resolve_tagged(line),
        }
    }

    fn resolve_head(&mut self, line: &str) -> LineOutcome {
        let Some(waiter) = self.waiters.pop_front() else {
            return LineOutcome::Unsolicited;
        };
        let id = waiter.id;
        match WorkerResponse::decode(line) {
            Ok(response) => {
                waiter.resolve(Ok(response));
                LineOutcome::Resolved(id)
            }
            Err(err) => {
                waiter.resolve(Err(SessionError::DecodeFailure {
                    reason: err.to_string(),
                    line: line.to_string(),
                }));
                LineOutcome::DecodeFailed(id)
            }
        }
    }

    fn resolve_tagged(&mut self, line: &str) -> LineOutcome {
        let Some(response) = WorkerResponse::decode(line).ok() else {
            return LineOutcome::Untagged;
        };
        let Some(request_id) = response.request_id() else {
            return LineOutcome::Untagged;
        };
        match self.take(request_id) {
            Some(waiter) => {
                waiter.resolve(Ok(response));
                LineOutcome::Resolved(request_id)
            }
            None => LineOutcome::UnknownId(request_id),
        }
    }

    /// Fail the waiter with this id, if it is still queued.
    pub fn expire(&mut self, id: u64, error: SessionError) -> bool {
        match self.take(id) {
            Some(waiter) => {
                waiter.resolve(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drop the waiter with this id without resolving it.
    pub fn cancel(&mut self, id: u64) -> bool {
        match self.take(id) {
            Some(waiter) => {
                if let Some(timer) = waiter.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Fail every waiter in queue order. Returns how many were failed.
    pub fn fail_all(&mut self, error: SessionError) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            waiter.resolve(Err(error.clone()));
        }
        count
    }

    fn take(&mut self, id: u64) -> Option<Waiter> {
        let index = self.waiters.iter().position(|w| w.id == id)?;
        self.waiters.remove(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tokio::sync::oneshot::error::TryRecvError;

    fn enqueue(queue: &mut PendingQueue, id: u64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        queue.push(id, tx, None);
        rx
    }

    #[test]
    fn test_fifo_resolves_head_first() {
        let mut queue = PendingQueue::new();
        let mut first = enqueue(&mut queue, 1);
        let mut second = enqueue(&mut queue, 2);

        assert_eq!(
            queue.resolve_line(r#"{"n":1}"#, CorrelationMode::Fifo),
            LineOutcome::Resolved(1)
        );
        assert_eq!(
            first.try_recv().unwrap().unwrap().as_value(),
            &json!({"n": 1})
        );
        assert!(matches!(second.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_decode_failure_consumes_only_head() {
        let mut queue = PendingQueue::new();
        let mut first = enqueue(&mut queue, 1);
        let mut second = enqueue(&mut queue, 2);

        assert_eq!(
            queue.resolve_line("not json", CorrelationMode::Fifo),
            LineOutcome::DecodeFailed(1)
        );
        match first.try_recv().unwrap() {
            Err(SessionError::DecodeFailure { line, .. }) => assert_eq!(line, "not json"),
            other => panic!("unexpected reply: {other:?}"),
        }

        queue.resolve_line("{}", CorrelationMode::Fifo);
        assert!(second.try_recv().unwrap().is_ok());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_unsolicited_line_is_reported() {
        let mut queue = PendingQueue::new();
        assert_eq!(
            queue.resolve_line("{}", CorrelationMode::Fifo),
            LineOutcome::Unsolicited
        );
    }

    #[test]
    fn test_expire_removes_by_identity() {
        let mut queue = PendingQueue::new();
        let mut first = enqueue(&mut queue, 1);
        let mut second = enqueue(&mut queue, 2);
        let mut third = enqueue(&mut queue, 3);

        assert!(queue.expire(2, SessionError::RequestTimeout { timeout_ms: 5 }));
        assert!(!queue.expire(2, SessionError::RequestTimeout { timeout_ms: 5 }));
        assert_eq!(
            second.try_recv().unwrap(),
            Err(SessionError::RequestTimeout { timeout_ms: 5 })
        );

        queue.resolve_line(r#"{"n":1}"#, CorrelationMode::Fifo);
        queue.resolve_line(r#"{"n":3}"#, CorrelationMode::Fifo);
        assert_eq!(first.try_recv().unwrap().unwrap().as_value()["n"], 1);
        assert_eq!(third.try_recv().unwrap().unwrap().as_value()["n"], 3);
    }

    #[test]
    fn test_fail_all_in_order() {
        let mut queue = PendingQueue::new();
        let mut receivers: Vec<_> = (1..=3).map(|id| enqueue(&mut queue, id)).collect();

        let failed = queue.fail_all(SessionError::WorkerTerminated("exit 1".into()));
        assert_eq!(failed, 3);
        assert_eq!(queue.len(), 0);
        for rx in receivers.iter_mut() {
            assert_eq!(
                rx.try_recv().unwrap(),
                Err(SessionError::WorkerTerminated("exit 1".into()))
            );
        }
    }

    #[test]
    fn test_cancel_drops_without_reply() {
        let mut queue = PendingQueue::new();
        let mut rx = enqueue(&mut queue, 7);
        assert!(queue.cancel(7));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));
    }

    #[test]
    fn test_tagged_matches_out_of_order() {
        let mut queue = PendingQueue::new();
        let mut first = enqueue(&mut queue, 1);
        let mut second = enqueue(&mut queue, 2);

        assert_eq!(
            queue.resolve_line(r#"{"request_id":2,"v":"b"}"#, CorrelationMode::Tagged),
            LineOutcome::Resolved(2)
        );
        assert_eq!(second.try_recv().unwrap().unwrap().as_value()["v"], "b");
        assert!(matches!(first.try_recv(), Err(TryRecvError::Empty)));

        assert_eq!(
            queue.resolve_line(r#"{"request_id":9}"#, CorrelationMode::Tagged),
            LineOutcome::UnknownId(9)
        );
        assert_eq!(
            queue.resolve_line("garbage", CorrelationMode::Tagged),
            LineOutcome::Untagged
        );
        assert_eq!(
            queue.resolve_line(r#"{"v":"a"}"#, CorrelationMode::Tagged),
            LineOutcome::Untagged
        );
        assert_eq!(queue.len(), 1);

        queue.resolve_line(r#"{"request_id":1,"v":"a"}"#, CorrelationMode::Tagged);
        assert_eq!(first.try_recv().unwrap().unwrap().as_value()["v"], "a");
    }

    proptest! {
        #[test]
        fn prop_fifo_answers_in_send_order(
            count in 1usize..24,
            expired in proptest::collection::vec(any::<bool>(), 24),
        ) {
            let mut queue = PendingQueue::new();
            let mut receivers = Vec::new();
            for id in 0..count as u64 {
                receivers.push((id, enqueue(&mut queue, id)));
            }

            for (id, _) in receivers.iter() {
                if expired[*id as usize] {
                    queue.expire(*id, SessionError::RequestTimeout { timeout_ms: 1 });
                }
            }

            let remaining = queue.len();
            for seq in 0..remaining {
                let line = format!(r#"{{"seq":{}}}"#, seq);
                queue.resolve_line(&line, CorrelationMode::Fifo);
            }
            prop_assert_eq!(queue.len(), 0);

            let mut seq = 0u64;
            for (id, rx) in receivers.iter_mut() {
                let reply = rx.try_recv().unwrap();
                if expired[*id as usize] {
                    prop_assert_eq!(reply, Err(SessionError::RequestTimeout { timeout_ms: 1 }));
                } else {
                    let response = reply.unwrap();
                    prop_assert_eq!(response.as_value()["seq"].as_u64(), Some(seq));
                    seq += 1;
                }
            }
        }
    }
}
