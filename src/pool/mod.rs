//! Bounded connection pool (spec §4.6): `Acquire(ctx) → Connection`,
//! `Release(conn, err)`. A [`tokio::sync::Semaphore`] caps the number of
//! physical connections that may exist at once (idle or checked out); idle
//! ones additionally sit in a FIFO deque so `Acquire` prefers reuse over
//! dialing. Grounded on the teacher's `Connection::duplicate` (the
//! dial-on-demand factory) and on spec §4.6's explicit contract, which
//! names an acquire/release pair rather than an RAII guard.
//!
//! Generic over [`Poolable`] (mirroring [`crate::query::flow::QueryTransport`]'s
//! decoupling from any concrete socket) so the capacity/FIFO bookkeeping
//! can be exercised in tests without a live server.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::ClientError;

type Result<T> = std::result::Result<T, ClientError>;

/// What the pool needs from a connection: whether it's still good for
/// reuse, a way to force it unusable, and a way to close it down.
pub trait Poolable: Send + Sized + 'static {
  fn is_usable(&self) -> bool;
  fn mark_unusable(&mut self);
  fn close(self) -> impl Future<Output = Result<()>> + Send;
}

impl Poolable for crate::conn::Connection {
  fn is_usable(&self) -> bool {
    crate::conn::Connection::is_usable(self)
  }

  fn mark_unusable(&mut self) {
    crate::conn::Connection::mark_unusable(self)
  }

  async fn close(self) -> Result<()> {
    crate::conn::Connection::close(self).await
  }
}

type DialFuture<C> = Pin<Box<dyn Future<Output = Result<C>> + Send>>;

/// Dials a fresh physical connection on demand.
pub trait Dialer<C>: Send + Sync {
  fn dial(&self) -> DialFuture<C>;
}

impl<C, F> Dialer<C> for F
where
  F: Fn() -> DialFuture<C> + Send + Sync,
{
  fn dial(&self) -> DialFuture<C> {
    (self)()
  }
}

struct Idle<C> {
  conn: C,
  permit: OwnedSemaphorePermit,
}

/// A connection checked out of the pool. Carries the semaphore permit that
/// reserves its slot, so `Release` can return both to the pool (or drop
/// both, freeing the slot for a future dial) in one call.
pub struct PooledConnection<C> {
  conn: C,
  permit: OwnedSemaphorePermit,
}

impl<C> std::ops::Deref for PooledConnection<C> {
  type Target = C;
  fn deref(&self) -> &C {
    &self.conn
  }
}

impl<C> std::ops::DerefMut for PooledConnection<C> {
  fn deref_mut(&mut self) -> &mut C {
    &mut self.conn
  }
}

pub struct Pool<C: Poolable> {
  idle: Mutex<VecDeque<Idle<C>>>,
  capacity: Arc<Semaphore>,
  dialer: Arc<dyn Dialer<C>>,
}

impl<C: Poolable> Pool<C> {
  pub fn new(max_size: usize, dialer: Arc<dyn Dialer<C>>) -> Self {
    Self {
      idle: Mutex::new(VecDeque::new()),
      capacity: Arc::new(Semaphore::new(max_size)),
      dialer,
    }
  }

  /// Borrows an idle connection if one is queued (FIFO), otherwise dials a
  /// fresh one once a slot is available. `deadline` bounds the whole
  /// acquire, including the wait for a free slot — distinct from a
  /// per-operation timeout on the connection itself (spec §4.6).
  pub async fn acquire(&self, deadline: Option<Duration>) -> Result<PooledConnection<C>> {
    let acquire_permit = Arc::clone(&self.capacity).acquire_owned();
    let permit = match deadline {
      Some(deadline) => tokio::time::timeout(deadline, acquire_permit)
        .await
        .map_err(|_| ClientError::ConnectionTimeout)?
        .expect("pool semaphore is never closed"),
      None => acquire_permit.await.expect("pool semaphore is never closed"),
    };

    if let Some(idle) = self.idle.lock().await.pop_front() {
      debug!("reusing idle connection");
      return Ok(PooledConnection { conn: idle.conn, permit: idle.permit });
    }

    debug!("dialing a new connection, idle queue was empty");
    match self.dialer.dial().await {
      Ok(conn) => Ok(PooledConnection { conn, permit }),
      // `permit` drops here on a failed dial, returning the slot.
      Err(err) => Err(err),
    }
  }

  /// Returns a connection to the pool, or discards it if unusable. `err`
  /// is the error (if any) the caller's last operation returned; an
  /// I/O-level error already marks a `Connection` unusable via its own
  /// FSM, so this mainly matters for forcing a discard the caller doesn't
  /// trust for other reasons (e.g. a cancelled operation).
  pub async fn release(&self, mut pooled: PooledConnection<C>, err: Option<&ClientError>) {
    if let Some(err) = err {
      if err.poisons_connection() {
        pooled.conn.mark_unusable();
      }
    }

    if !pooled.conn.is_usable() {
      warn!("discarding unusable connection instead of returning it to the pool");
      // `pooled.permit` drops here, freeing the slot for a future dial.
      let _ = pooled.conn.close().await;
      return;
    }

    self.idle.lock().await.push_back(Idle {
      conn: pooled.conn,
      permit: pooled.permit,
    });
  }

  /// Number of connections currently idle, for diagnostics/tests.
  pub async fn idle_count(&self) -> usize {
    self.idle.lock().await.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct FakeConn {
    id: usize,
    usable: bool,
  }

  impl Poolable for FakeConn {
    fn is_usable(&self) -> bool {
      self.usable
    }
    fn mark_unusable(&mut self) {
      self.usable = false;
    }
    async fn close(self) -> Result<()> {
      Ok(())
    }
  }

  fn counting_dialer() -> (Arc<dyn Dialer<FakeConn>>, Arc<AtomicUsize>) {
    let dials = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dials);
    let dialer: Arc<dyn Dialer<FakeConn>> = Arc::new(move || -> DialFuture<FakeConn> {
      let id = counter.fetch_add(1, Ordering::SeqCst);
      Box::pin(async move { Ok(FakeConn { id, usable: true }) })
    });
    (dialer, dials)
  }

  #[tokio::test]
  async fn acquire_dials_on_demand_and_reuses_on_release() {
    let (dialer, dials) = counting_dialer();
    let pool = Pool::new(2, dialer);

    let a = pool.acquire(None).await.unwrap();
    assert_eq!(a.id, 0);
    assert_eq!(dials.load(Ordering::SeqCst), 1);

    pool.release(a, None).await;
    assert_eq!(pool.idle_count().await, 1);

    let b = pool.acquire(None).await.unwrap();
    assert_eq!(b.id, 0, "released connection should be reused, not redialed");
    assert_eq!(dials.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn unusable_connections_are_discarded_not_returned() {
    let (dialer, dials) = counting_dialer();
    let pool = Pool::new(2, dialer);

    let mut a = pool.acquire(None).await.unwrap();
    a.mark_unusable();
    pool.release(a, None).await;

    assert_eq!(pool.idle_count().await, 0);

    let b = pool.acquire(None).await.unwrap();
    assert_eq!(b.id, 1, "a fresh connection should be dialed since the old one was discarded");
    assert_eq!(dials.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn acquire_blocks_at_capacity_until_release() {
    let (dialer, _dials) = counting_dialer();
    let pool = Arc::new(Pool::new(1, dialer));

    let a = pool.acquire(None).await.unwrap();

    let pool2 = Arc::clone(&pool);
    let waiter = tokio::spawn(async move { pool2.acquire(Some(Duration::from_millis(200))).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.release(a, None).await;

    let b = waiter.await.unwrap().unwrap();
    assert_eq!(b.id, 0);
  }

  #[tokio::test]
  async fn acquire_times_out_when_capacity_never_frees_up() {
    let (dialer, _dials) = counting_dialer();
    let pool = Pool::new(1, dialer);

    let _a = pool.acquire(None).await.unwrap();
    let err = pool.acquire(Some(Duration::from_millis(20))).await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionTimeout));
  }
}
