use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use log::{info, warn};

use super::ClientError;

pub(crate) const DEFAULT_RETRIES: u32 = 30;
pub(crate) const DEFAULT_INTERVAL_MS: i64 = 5;

const TRIM_HIGH_WATER: usize = 10;
const TRIM_BATCH: usize = 5;
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Available,
    Reserved,
    Closed,
}

/// A pooled connection. The socket parks here while `Available` and travels
/// with the [`ConnGuard`] while `Reserved`.
struct Slot {
    id: u64,
    state: ConnState,
    socket: Option<zmq::Socket>,
}

/// Connection counts reported by the maintenance loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub available: usize,
    pub reserved: usize,
    pub closed: usize,
}

/// Pool of request connections to a single target address.
///
/// The slot list is the only shared state; one mutex guards it, held for
/// scans and state flips only, never across connects or socket I/O.
pub struct Pool {
    target: String,
    ctx: zmq::Context,
    next_id: AtomicU64,
    slots: Mutex<Vec<Slot>>,
}

impl Pool {
    /// Creates a pool for `target` and starts its maintenance thread. The
    /// thread holds a weak handle and exits once the pool is dropped.
    pub fn new(target: impl Into<String>, ctx: zmq::Context) -> Arc<Self> {
        let pool = Arc::new(Self {
            target: target.into(),
            ctx,
            next_id: AtomicU64::new(0),
            slots: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&pool);
        thread::spawn(move || maintenance_loop(&weak));
        pool
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Sends `frame` and waits for the reply, making at most `retries`
    /// attempts with a readiness poll of `interval_ms` after each send.
    /// Returns `Ok(None)` once the attempts are exhausted without a reply.
    ///
    /// A request connection permits exactly one receive per send, so a timed
    /// out attempt abandons its connection and resends on a fresh one rather
    /// than reusing the stalled handle.
    pub fn send_with_retry(
        &self,
        frame: &[u8],
        retries: u32,
        interval_ms: i64,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        if retries == 0 {
            return Ok(None);
        }

        let mut conn = self.acquire()?;
        for attempt in 1..=retries {
            conn.send(frame)?;
            if conn.poll_ready(interval_ms)? {
                return conn.recv().map(Some);
            }
            if attempt < retries {
                conn.reconnect()?;
            }
        }

        warn!(
            "no reply from {} after {} attempts, abandoning",
            self.target, retries
        );
        Ok(None)
    }

    /// [`send_with_retry`](Self::send_with_retry) with the default policy.
    pub fn send(&self, frame: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
        self.send_with_retry(frame, DEFAULT_RETRIES, DEFAULT_INTERVAL_MS)
    }

    /// Reserves the first available connection, dialing a new one when the
    /// whole pool is busy. The connect happens outside the slot lock so
    /// other callers are never blocked on the network.
    fn acquire(&self) -> Result<ConnGuard<'_>, ClientError> {
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots
                .iter_mut()
                .find(|slot| slot.state == ConnState::Available)
            {
                slot.state = ConnState::Reserved;
                let socket = slot.socket.take();
                return Ok(ConnGuard {
                    pool: self,
                    id: slot.id,
                    socket,
                });
            }
        }

        let socket = self.dial()?;
        let id = self.adopt_reserved();
        Ok(ConnGuard {
            pool: self,
            id,
            socket: Some(socket),
        })
    }

    fn dial(&self) -> Result<zmq::Socket, ClientError> {
        let socket = self.ctx.socket(zmq::REQ)?;
        socket.set_linger(0)?;
        socket.connect(&self.target)?;
        Ok(socket)
    }

    /// Registers a new reserved slot and returns its id. The socket itself
    /// stays with the guard until release.
    fn adopt_reserved(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().unwrap().push(Slot {
            id,
            state: ConnState::Reserved,
            socket: None,
        });
        id
    }

    /// Parks a reserved connection back into its slot.
    fn release(&self, id: u64, socket: zmq::Socket) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter_mut().find(|slot| slot.id == id) {
            slot.socket = Some(socket);
            slot.state = ConnState::Available;
        }
    }

    /// Drops a connection from the pool entirely. Used when a reservation
    /// abandons a stalled socket instead of returning it.
    fn forget(&self, id: u64) {
        self.slots.lock().unwrap().retain(|slot| slot.id != id);
    }

    /// Closes up to `limit` available connections, then sweeps every closed
    /// slot out of the pool. Reserved connections are never touched.
    pub fn trim(&self, limit: usize) {
        let mut slots = self.slots.lock().unwrap();

        let mut remaining = limit;
        for slot in slots.iter_mut() {
            if remaining == 0 {
                break;
            }
            if slot.state == ConnState::Available {
                slot.socket = None;
                slot.state = ConnState::Closed;
                remaining -= 1;
            }
        }

        slots.retain(|slot| slot.state != ConnState::Closed);
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.slots.lock().unwrap();
        let mut stats = PoolStats::default();
        for slot in slots.iter() {
            match slot.state {
                ConnState::Available => stats.available += 1,
                ConnState::Reserved => stats.reserved += 1,
                ConnState::Closed => stats.closed += 1,
            }
        }
        stats
    }
}

/// Scoped reservation of a pooled connection. Dropping the guard hands the
/// connection back on every exit path, including errors and timeouts.
struct ConnGuard<'a> {
    pool: &'a Pool,
    id: u64,
    socket: Option<zmq::Socket>,
}

impl ConnGuard<'_> {
    fn socket(&self) -> &zmq::Socket {
        self.socket
            .as_ref()
            .expect("reserved connection holds a socket")
    }

    fn send(&self, frame: &[u8]) -> Result<(), ClientError> {
        self.socket().send(frame, 0)?;
        Ok(())
    }

    fn poll_ready(&self, timeout_ms: i64) -> Result<bool, ClientError> {
        Ok(self.socket().poll(zmq::POLLIN, timeout_ms)? > 0)
    }

    fn recv(&self) -> Result<Vec<u8>, ClientError> {
        Ok(self.socket().recv_bytes(0)?)
    }

    /// Abandons the stalled connection and dials a replacement. The old
    /// socket is closed and its slot removed; it is never resent on.
    fn reconnect(&mut self) -> Result<(), ClientError> {
        self.socket = None;
        self.pool.forget(self.id);

        let socket = self.pool.dial()?;
        self.id = self.pool.adopt_reserved();
        self.socket = Some(socket);
        Ok(())
    }
}

impl Drop for ConnGuard<'_> {
    fn drop(&mut self) {
        match self.socket.take() {
            Some(socket) => self.pool.release(self.id, socket),
            None => self.pool.forget(self.id),
        }
    }
}

fn maintenance_loop(pool: &Weak<Pool>) {
    loop {
        thread::sleep(MAINTENANCE_INTERVAL);
        let Some(pool) = pool.upgrade() else { return };

        let stats = pool.stats();
        info!(
            "connections to {}: available={}, unavailable={}, closed={}",
            pool.target, stats.available, stats.reserved, stats.closed
        );

        if stats.available >= TRIM_HIGH_WATER {
            pool.trim(TRIM_BATCH);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn echo_peer(ctx: &zmq::Context, endpoint: &str) {
        let socket = ctx.socket(zmq::REP).unwrap();
        socket.bind(endpoint).unwrap();
        thread::spawn(move || {
            while let Ok(frame) = socket.recv_bytes(0) {
                if socket.send(frame, 0).is_err() {
                    break;
                }
            }
        });
    }

    #[test]
    fn send_with_retry_returns_the_reply() {
        let ctx = zmq::Context::new();
        echo_peer(&ctx, "inproc://pool-echo");

        let pool = Pool::new("inproc://pool-echo", ctx);
        let reply = pool.send_with_retry(b"hello", 10, 500).unwrap();
        assert_eq!(reply.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn retry_exhaustion_returns_no_reply_in_bounded_time() {
        let ctx = zmq::Context::new();
        // Bound but never serviced, so every attempt times out.
        let silent = ctx.socket(zmq::REP).unwrap();
        silent.bind("inproc://pool-silent").unwrap();

        let pool = Pool::new("inproc://pool-silent", ctx.clone());
        let started = Instant::now();
        let reply = pool.send_with_retry(b"anyone?", 3, 20).unwrap();
        assert_eq!(reply, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn released_connections_are_reused() {
        let ctx = zmq::Context::new();
        echo_peer(&ctx, "inproc://pool-reuse");

        let pool = Pool::new("inproc://pool-reuse", ctx);
        let first = pool.acquire().unwrap();
        let id = first.id;
        drop(first);

        let second = pool.acquire().unwrap();
        assert_eq!(second.id, id);
        assert_eq!(
            pool.stats(),
            PoolStats {
                available: 0,
                reserved: 1,
                closed: 0
            }
        );
    }

    #[test]
    fn concurrent_reservations_are_exclusive() {
        let ctx = zmq::Context::new();
        echo_peer(&ctx, "inproc://pool-exclusive");

        let pool = Pool::new("inproc://pool-exclusive", ctx);
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(pool.stats().reserved, 2);
    }

    #[test]
    fn trim_spares_reserved_connections_and_sweeps_closed_slots() {
        let ctx = zmq::Context::new();
        echo_peer(&ctx, "inproc://pool-trim");

        let pool = Pool::new("inproc://pool-trim", ctx);
        let held = pool.acquire().unwrap();
        let spare_a = pool.acquire().unwrap();
        let spare_b = pool.acquire().unwrap();
        drop(spare_a);
        drop(spare_b);
        assert_eq!(
            pool.stats(),
            PoolStats {
                available: 2,
                reserved: 1,
                closed: 0
            }
        );

        pool.trim(5);
        assert_eq!(
            pool.stats(),
            PoolStats {
                available: 0,
                reserved: 1,
                closed: 0
            }
        );

        drop(held);
        assert_eq!(pool.stats().available, 1);
    }

    #[test]
    fn trim_honors_its_limit() {
        let ctx = zmq::Context::new();
        echo_peer(&ctx, "inproc://pool-trim-limit");

        let pool = Pool::new("inproc://pool-trim-limit", ctx);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        drop(a);
        drop(b);
        drop(c);

        pool.trim(1);
        assert_eq!(
            pool.stats(),
            PoolStats {
                available: 2,
                reserved: 0,
                closed: 0
            }
        );
    }
}
