// Lock Session Port
//
// Advisory locks are scoped to the database session that took them. A
// LockSession is that session: one long-lived connection per instance,
// never recycled for unrelated queries.

use crate::domain::TaskId;
use crate::error::Result;
use async_trait::async_trait;

/// Session-scoped advisory lock primitive, keyed by task id
#[async_trait]
pub trait LockSession: Send + Sync {
    /// Non-blocking acquire.
    ///
    /// Re-entrant: acquiring a key this session already holds succeeds and
    /// deepens the hold count.
    async fn try_lock(&self, key: TaskId) -> Result<bool>;

    /// Release one hold of `key`. Returns false if the session did not hold it.
    async fn unlock(&self, key: TaskId) -> Result<bool>;

    /// Release every lock held by this session
    async fn unlock_all(&self) -> Result<()>;

    /// Whether any session (this one included) currently holds `key`
    async fn is_locked_anywhere(&self, key: TaskId) -> Result<bool>;

    /// Whether this session believes it holds `key`.
    ///
    /// Cleared when the underlying connection is lost, since the server
    /// drops a session's locks with the session.
    fn holds(&self, key: TaskId) -> bool;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared lock table standing in for the database server
    #[derive(Default)]
    pub struct InMemoryLockBroker {
        // key -> (session id, hold count)
        holders: Mutex<HashMap<TaskId, (u64, u32)>>,
        next_session: AtomicU64,
    }

    impl InMemoryLockBroker {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Open a new session against this broker
        pub fn session(self: &Arc<Self>) -> InMemoryLockSession {
            InMemoryLockSession {
                broker: Arc::clone(self),
                session: AtomicU64::new(self.open_session()),
                held: Mutex::new(HashSet::new()),
                terminated: AtomicBool::new(false),
            }
        }

        /// Session currently holding `key`, if any
        pub fn holder_of(&self, key: TaskId) -> Option<u64> {
            self.holders.lock().unwrap().get(&key).map(|(s, _)| *s)
        }

        fn open_session(&self) -> u64 {
            self.next_session.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn drop_session(&self, session: u64) {
            self.holders.lock().unwrap().retain(|_, (s, _)| *s != session);
        }
    }

    /// One simulated database session.
    ///
    /// `terminate()` kills the session server-side, like a crash or an
    /// administrator's `pg_terminate_backend`: its locks vanish at once, the
    /// next call fails with a connection error and the call after that runs
    /// on a fresh session.
    pub struct InMemoryLockSession {
        broker: Arc<InMemoryLockBroker>,
        session: AtomicU64,
        held: Mutex<HashSet<TaskId>>,
        terminated: AtomicBool,
    }

    impl InMemoryLockSession {
        pub fn session_id(&self) -> u64 {
            self.session.load(Ordering::SeqCst)
        }

        pub fn terminate(&self) {
            self.broker.drop_session(self.session_id());
            self.terminated.store(true, Ordering::SeqCst);
        }

        fn check_alive(&self) -> Result<u64> {
            if self.terminated.swap(false, Ordering::SeqCst) {
                self.held.lock().unwrap().clear();
                self.session
                    .store(self.broker.open_session(), Ordering::SeqCst);
                return Err(AppError::Database(
                    "terminating connection due to administrator command".to_string(),
                ));
            }
            Ok(self.session_id())
        }
    }

    #[async_trait]
    impl LockSession for InMemoryLockSession {
        async fn try_lock(&self, key: TaskId) -> Result<bool> {
            let session = self.check_alive()?;
            let mut holders = self.broker.holders.lock().unwrap();
            match holders.get_mut(&key) {
                Some((holder, count)) if *holder == session => {
                    *count += 1;
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => {
                    holders.insert(key, (session, 1));
                    self.held.lock().unwrap().insert(key);
                    Ok(true)
                }
            }
        }

        async fn unlock(&self, key: TaskId) -> Result<bool> {
            let session = self.check_alive()?;
            let mut holders = self.broker.holders.lock().unwrap();
            match holders.get_mut(&key) {
                Some((holder, count)) if *holder == session => {
                    *count -= 1;
                    if *count == 0 {
                        holders.remove(&key);
                        self.held.lock().unwrap().remove(&key);
                    }
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn unlock_all(&self) -> Result<()> {
            let session = self.check_alive()?;
            self.broker.drop_session(session);
            self.held.lock().unwrap().clear();
            Ok(())
        }

        async fn is_locked_anywhere(&self, key: TaskId) -> Result<bool> {
            self.check_alive()?;
            Ok(self.broker.holder_of(key).is_some())
        }

        fn holds(&self, key: TaskId) -> bool {
            self.held.lock().unwrap().contains(&key)
        }
    }

}
