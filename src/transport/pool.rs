//! Async session pool
//!
//! Holds a fixed number of sessions established up front and hands them out
//! to async tasks. A slot semaphore bounds how many sessions are checked out;
//! the idle set only ever holds sessions whose slot is free.
//!
//! Sessions are returned by dropping the [`PooledSession`] guard, including
//! on error paths and when the owning task is cancelled. A guard marked
//! broken discards its session instead; the vacated slot is refilled with a
//! fresh connection by the next acquirer.
//!
//! A guard can also be split into the bare session and a [`SlotLease`], so
//! a caller can give up the slot without waiting for a hung remote call to
//! hand the session back.

use crate::error::{PoolError, PoolResult, TransportError};
use crate::transport::Connector;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

struct PoolInner<C: Connector> {
    /// Establishes replacement sessions
    connector: C,
    /// Sessions ready for use
    idle: Mutex<Vec<C::Session>>,
    /// One permit per slot
    slots: Arc<Semaphore>,
    /// Slots established at construction
    capacity: usize,
    /// Slots asked for at construction
    requested: usize,
    /// How long `acquire` waits before giving up
    acquire_timeout: Option<Duration>,
    /// Sessions discarded as broken
    broken: AtomicU64,
    /// Sessions established after construction
    replaced: AtomicU64,
}

/// Bounded pool of transport sessions
pub struct SessionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for SessionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> SessionPool<C> {
    /// Establish up to `requested` sessions (blocking)
    ///
    /// Sessions that fail to connect are logged and left out, so the pool's
    /// capacity may be anywhere in `0..=requested`. Callers decide whether a
    /// shrunken (or empty) pool is usable.
    pub fn new(connector: C, requested: usize, acquire_timeout: Option<Duration>) -> Self {
        let endpoint = connector.endpoint();
        let mut sessions = Vec::with_capacity(requested);

        for attempt in 0..requested {
            match connector.connect() {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(
                    endpoint = %endpoint,
                    attempt = attempt + 1,
                    error = %e,
                    "Failed to establish session, excluding it from the pool"
                ),
            }
        }

        let capacity = sessions.len();
        if capacity < requested {
            warn!(
                endpoint = %endpoint,
                requested,
                established = capacity,
                "Session pool is smaller than requested"
            );
        } else {
            info!(endpoint = %endpoint, sessions = capacity, "Session pool ready");
        }

        Self {
            inner: Arc::new(PoolInner {
                connector,
                idle: Mutex::new(sessions),
                slots: Arc::new(Semaphore::new(capacity)),
                capacity,
                requested,
                acquire_timeout,
                broken: AtomicU64::new(0),
                replaced: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire a session, waiting up to the pool's acquire timeout
    ///
    /// Returns `PoolError::Exhausted` when no session frees up in time and
    /// `PoolError::Closed` after [`close`](Self::close).
    pub async fn acquire(&self) -> PoolResult<PooledSession<C>> {
        let slots = Arc::clone(&self.inner.slots);
        let permit = match self.inner.acquire_timeout {
            Some(limit) => match tokio::time::timeout(limit, slots.acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => {
                    return Err(PoolError::Exhausted {
                        waited: limit,
                        capacity: self.inner.capacity,
                    })
                }
            },
            None => slots.acquire_owned().await.map_err(|_| PoolError::Closed)?,
        };

        let idle = self.inner.idle.lock().pop();
        let session = match idle {
            Some(session) => session,
            // A broken session left this slot vacant
            None => self.reconnect().await?,
        };

        Ok(PooledSession {
            session: Some(session),
            pool: Arc::clone(&self.inner),
            healthy: true,
            permit: Some(permit),
        })
    }

    async fn reconnect(&self) -> PoolResult<C::Session> {
        let inner = Arc::clone(&self.inner);
        let session = tokio::task::spawn_blocking(move || inner.connector.connect())
            .await
            .map_err(|e| {
                PoolError::Reconnect(TransportError::SessionLost {
                    reason: format!("connect task failed: {}", e),
                })
            })?
            .map_err(PoolError::Reconnect)?;

        self.inner.replaced.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint = %self.inner.connector.endpoint(), "Replaced broken session");
        Ok(session)
    }

    /// Stop handing out sessions and drop the idle ones
    ///
    /// Pending and future `acquire` calls fail with `PoolError::Closed`;
    /// sessions still checked out are dropped when their guard is.
    pub fn close(&self) {
        self.inner.slots.close();
        self.inner.idle.lock().clear();
    }

    /// Number of sessions established at construction
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of sessions asked for at construction
    pub fn requested(&self) -> usize {
        self.inner.requested
    }

    /// Slots not currently checked out
    pub fn available(&self) -> usize {
        self.inner.slots.available_permits()
    }

    /// Slots currently checked out
    pub fn checked_out(&self) -> usize {
        self.inner.capacity - self.available()
    }

    /// Sessions sitting in the idle set
    pub fn idle_sessions(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Sessions discarded as broken so far
    pub fn broken_sessions(&self) -> u64 {
        self.inner.broken.load(Ordering::Relaxed)
    }

    /// Replacement sessions established so far
    pub fn replaced_sessions(&self) -> u64 {
        self.inner.replaced.load(Ordering::Relaxed)
    }

    /// Endpoint the pool is connected to
    pub fn endpoint(&self) -> String {
        self.inner.connector.endpoint()
    }

    /// Check if `close` was called
    pub fn is_closed(&self) -> bool {
        self.inner.slots.is_closed()
    }
}

/// A checked-out session, returned to the pool on drop
///
/// The guard owns its slot, so it can be moved into a blocking task and
/// the slot is freed wherever the guard ends up being dropped.
pub struct PooledSession<C: Connector> {
    session: Option<C::Session>,
    pool: Arc<PoolInner<C>>,
    healthy: bool,
    // Dropped after `Drop::drop` has re-admitted the session
    permit: Option<OwnedSemaphorePermit>,
}

impl<C: Connector> PooledSession<C> {
    /// Mutable access to the session
    pub fn session(&mut self) -> &mut C::Session {
        &mut **self
    }

    /// Discard the session on drop instead of returning it to the pool
    pub fn mark_broken(&mut self) {
        self.healthy = false;
    }

    /// Check if the session will be returned to the pool
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Split into the bare session and the slot it occupies
    ///
    /// The session can then be moved somewhere it may never come back from.
    /// [`SlotLease::restore`] puts the pair back together; dropping or
    /// abandoning the lease frees the slot with the session counted as broken.
    pub fn into_parts(mut self) -> (C::Session, SlotLease<C>) {
        let session = match self.session.take() {
            Some(session) => session,
            None => unreachable!("session is only taken in drop"),
        };
        let lease = SlotLease {
            pool: Arc::clone(&self.pool),
            healthy: self.healthy,
            permit: self.permit.take(),
        };
        (session, lease)
    }
}

/// A checked-out slot whose session was taken out with
/// [`PooledSession::into_parts`]
pub struct SlotLease<C: Connector> {
    pool: Arc<PoolInner<C>>,
    healthy: bool,
    permit: Option<OwnedSemaphorePermit>,
}

impl<C: Connector> SlotLease<C> {
    /// Put `session` back into this slot
    pub fn restore(mut self, session: C::Session) -> PooledSession<C> {
        PooledSession {
            session: Some(session),
            pool: Arc::clone(&self.pool),
            healthy: self.healthy,
            permit: self.permit.take(),
        }
    }

    /// Free the slot now; the session it held is not coming back
    ///
    /// The next `acquire` that lands on the slot opens a new session.
    pub fn abandon(self) {
        drop(self);
    }
}

impl<C: Connector> Drop for SlotLease<C> {
    fn drop(&mut self) {
        if self.permit.take().is_some() {
            self.pool.broken.fetch_add(1, Ordering::Relaxed);
            debug!("Slot released without its session");
        }
    }
}

impl<C: Connector> Deref for PooledSession<C> {
    type Target = C::Session;

    fn deref(&self) -> &C::Session {
        match &self.session {
            Some(session) => session,
            None => unreachable!("session is only taken in drop"),
        }
    }
}

impl<C: Connector> DerefMut for PooledSession<C> {
    fn deref_mut(&mut self) -> &mut C::Session {
        match &mut self.session {
            Some(session) => session,
            None => unreachable!("session is only taken in drop"),
        }
    }
}

impl<C: Connector> Drop for PooledSession<C> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if !self.healthy {
            self.pool.broken.fetch_add(1, Ordering::Relaxed);
            debug!("Discarding broken session");
            drop(session);
            return;
        }

        if self.pool.slots.is_closed() {
            drop(session);
            return;
        }

        self.pool.idle.lock().push(session);
    }
}
