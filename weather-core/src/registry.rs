use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{model::WeatherData, session::SessionHandle};

/// The set of sessions the server currently knows about.
///
/// Shared between the accept loop, the sweeper, the broadcaster and shutdown;
/// every operation takes the lock briefly and never awaits while holding it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<Vec<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, handle: SessionHandle) {
        self.lock().push(handle);
    }

    /// Forget the session with `id`; `false` if it was already gone.
    pub fn remove(&self, id: u64) -> bool {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|s| s.id() != id);
        sessions.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.lock().iter().filter(|s| s.is_connected()).count()
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.lock().clone()
    }

    /// Drop sessions whose connection has ended. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let evicted: Vec<SessionHandle> = {
            let mut sessions = self.lock();
            let (gone, alive): (Vec<_>, Vec<_>) =
                sessions.drain(..).partition(|s| !s.is_connected());
            *sessions = alive;
            gone
        };

        for session in &evicted {
            session.close();
        }

        if !evicted.is_empty() {
            tracing::info!(evicted = evicted.len(), "Removed disconnected clients");
        }
        evicted.len()
    }

    /// Offer the same reading to every connected session. Returns how many accepted it.
    pub fn broadcast(&self, data: &WeatherData) -> usize {
        let sessions = self.handles();
        let delivered = sessions.iter().filter(|s| s.offer(data)).count();

        if delivered < sessions.len() {
            tracing::debug!(
                delivered,
                total = sessions.len(),
                "Some clients skipped this broadcast"
            );
        }
        delivered
    }

    /// Ask every session to stop and empty the registry.
    pub fn close_all(&self) -> usize {
        let sessions: Vec<SessionHandle> = std::mem::take(&mut *self.lock());
        for session in &sessions {
            session.close();
        }
        sessions.len()
    }
}
