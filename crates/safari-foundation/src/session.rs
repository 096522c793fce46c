//! Recurrent-state sessions
//!
//! Each session owns one [`StateBuffer`]. Requests that name a session
//! continue its recurrent memory; requests without one get a throwaway
//! buffer, so unrelated calls never perturb each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use safari_kernel::config::SessionSettings;
use safari_kernel::{Clock, DetectResult, DetectionError, OperationKind, SessionId};

use crate::state_engine::StateBuffer;

struct SessionSlot {
    kind: OperationKind,
    buffer: Arc<Mutex<StateBuffer>>,
    last_used_ms: AtomicU64,
}

/// Bounded arena of session buffers keyed by [`SessionId`].
pub struct SessionArena {
    sessions: DashMap<SessionId, SessionSlot>,
    /// Serializes admission so the capacity check and the insert are one step.
    admission: parking_lot::Mutex<()>,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
}

impl SessionArena {
    pub fn new(settings: SessionSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            admission: parking_lot::Mutex::new(()),
            settings,
            clock,
        }
    }

    /// Start a session bound to one operation kind.
    pub fn open(&self, kind: OperationKind) -> DetectResult<SessionId> {
        let _admission = self.admission.lock();
        self.prune_idle();
        if self.sessions.len() >= self.settings.max_sessions {
            return Err(DetectionError::ResourceExhausted(format!(
                "session limit of {} reached",
                self.settings.max_sessions
            )));
        }

        let id = SessionId::new();
        self.sessions.insert(
            id,
            SessionSlot {
                kind,
                buffer: Arc::new(Mutex::new(StateBuffer::new())),
                last_used_ms: AtomicU64::new(self.clock.now_millis()),
            },
        );
        debug!(session = %id, %kind, "session opened");
        Ok(id)
    }

    pub fn close(&self, id: SessionId) -> DetectResult<()> {
        match self.sessions.remove(&id) {
            Some(_) => {
                debug!(session = %id, "session closed");
                Ok(())
            }
            None => Err(DetectionError::SessionNotFound(id.to_string())),
        }
    }

    /// Clear the recurrent state of a session, keeping the session open.
    pub async fn reset(&self, id: SessionId) -> DetectResult<()> {
        let buffer = self.lookup(id)?.0;
        buffer.lock().await.reset();
        Ok(())
    }

    /// The buffer of `id`, checked against the requesting operation.
    pub fn checkout(&self, id: SessionId, kind: OperationKind) -> DetectResult<Arc<Mutex<StateBuffer>>> {
        let (buffer, session_kind) = self.lookup(id)?;
        if session_kind != kind {
            return Err(DetectionError::InvalidInput(format!(
                "session {id} was opened for {session_kind} detection, not {kind}"
            )));
        }
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove sessions idle for longer than the configured timeout.
    pub fn prune_idle(&self) -> usize {
        let now = self.clock.now_millis();
        let idle_ms = self.settings.idle_timeout_secs.saturating_mul(1000);
        let before = self.sessions.len();
        self.sessions
            .retain(|_, slot| now.saturating_sub(slot.last_used_ms.load(Ordering::Relaxed)) < idle_ms);
        let pruned = before.saturating_sub(self.sessions.len());
        if pruned > 0 {
            info!(pruned, "pruned idle sessions");
        }
        pruned
    }

    fn lookup(&self, id: SessionId) -> DetectResult<(Arc<Mutex<StateBuffer>>, OperationKind)> {
        let slot = self
            .sessions
            .get(&id)
            .ok_or_else(|| DetectionError::SessionNotFound(id.to_string()))?;
        slot.last_used_ms
            .store(self.clock.now_millis(), Ordering::Relaxed);
        Ok((Arc::clone(&slot.buffer), slot.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_engine::LayerState;
    use safari_kernel::ManualClock;
    use std::time::Duration;

    fn arena(max: usize) -> (SessionArena, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let settings = SessionSettings {
            max_sessions: max,
            idle_timeout_secs: 60,
        };
        (SessionArena::new(settings, clock.clone()), clock)
    }

    #[test]
    fn test_open_close() {
        let (arena, _) = arena(4);
        let id = arena.open(OperationKind::Species).unwrap();
        assert_eq!(arena.len(), 1);
        arena.close(id).unwrap();
        assert!(arena.is_empty());
        assert!(matches!(arena.close(id), Err(DetectionError::SessionNotFound(_))));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let (arena, _) = arena(2);
        arena.open(OperationKind::Species).unwrap();
        arena.open(OperationKind::Fossil).unwrap();
        assert!(matches!(
            arena.open(OperationKind::Species),
            Err(DetectionError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_idle_sessions_are_pruned_on_open() {
        let (arena, clock) = arena(1);
        let stale = arena.open(OperationKind::Species).unwrap();
        clock.advance(Duration::from_secs(61));

        let fresh = arena.open(OperationKind::Species).unwrap();
        assert_eq!(arena.len(), 1);
        assert!(arena.checkout(stale, OperationKind::Species).is_err());
        assert!(arena.checkout(fresh, OperationKind::Species).is_ok());
    }

    #[test]
    fn test_checkout_checks_kind() {
        let (arena, _) = arena(2);
        let id = arena.open(OperationKind::Fossil).unwrap();
        assert!(matches!(
            arena.checkout(id, OperationKind::Species),
            Err(DetectionError::InvalidInput(_))
        ));
        assert!(matches!(
            arena.checkout(SessionId::new(), OperationKind::Fossil),
            Err(DetectionError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_opens_never_exceed_capacity() {
        let (arena, _) = arena(3);
        let opened: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| arena.open(OperationKind::Species).is_ok()))
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap() as usize)
                .sum()
        });
        assert_eq!(opened, 3);
        assert_eq!(arena.len(), 3);
    }

    #[tokio::test]
    async fn test_reset_clears_buffer() {
        let (arena, _) = arena(2);
        let id = arena.open(OperationKind::Species).unwrap();
        {
            let buffer = arena.checkout(id, OperationKind::Species).unwrap();
            buffer.lock().await.commit(0, LayerState::new(4));
        }
        arena.reset(id).await.unwrap();
        let buffer = arena.checkout(id, OperationKind::Species).unwrap();
        assert!(buffer.lock().await.is_empty());
    }
}
