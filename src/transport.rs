//! Process-local mailbox transport.
//!
//! The framework treats the IPC transport as an external collaborator with a
//! small contract: numeric endpoint ids, bounded FIFO delivery, timed
//! blocking receive, and a close signal that wakes blocked receivers. This
//! module ships that contract as a process-wide router so modules in one
//! process can be wired together without any external daemon.
//!
//! Delivery is at most once: when a receiver's queue is full the oldest
//! frame is dropped (and counted) so the newest data always lands. An
//! endpoint configured with [`OverflowPolicy::Reject`] refuses the new frame
//! instead, surfacing `QueueFull` to the sender.

use crate::error::{InitError, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

/// What to do when a frame arrives at a full queue.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the oldest queued frame to make room.
    #[default]
    DropOldest,
    /// Refuse the new frame; the sender sees `QueueFull`.
    Reject,
}

/// Endpoint creation parameters.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Numeric address other endpoints send to.
    pub id: u32,
    /// Maximum number of queued frames.
    pub capacity_slots: usize,
    /// Maximum frame size in bytes; larger sends are refused.
    pub max_frame_bytes: usize,
    /// Send priority hint, carried for parity with real-time transports.
    pub priority: u8,
    /// Realtime hint, carried for parity with real-time transports.
    pub realtime: bool,
    /// Overflow behaviour of the receive queue.
    pub overflow: OverflowPolicy,
    /// Human-readable name for logs.
    pub name: String,
}

struct Queue {
    frames: VecDeque<Box<[u8]>>,
    closed: bool,
}

struct Shared {
    id: u32,
    name: String,
    capacity_slots: usize,
    max_frame_bytes: usize,
    overflow: OverflowPolicy,
    queue: Mutex<Queue>,
    available: Condvar,
    closed: AtomicBool,
    dropped: AtomicU64,
}

/// A bound transport endpoint: the receive side of one mailbox id.
///
/// Cheaply cloneable; all clones share the queue. Closing any clone wakes
/// every blocked receiver and unbinds the id from the router.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

fn router() -> &'static Mutex<HashMap<u32, Weak<Shared>>> {
    static ROUTER: OnceLock<Mutex<HashMap<u32, Weak<Shared>>>> = OnceLock::new();

    ROUTER.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Bind a new endpoint to `config.id`.
pub fn bind(config: EndpointConfig) -> Result<Endpoint, TransportError> {
    if config.capacity_slots == 0 || config.max_frame_bytes == 0 {
        return Err(TransportError::Init(InitError::ZeroCapacity));
    }

    let mut table = router().lock().unwrap_or_else(PoisonError::into_inner);

    // A previous owner may have been dropped without closing; a dead weak
    // entry does not block rebinding.
    if let Some(existing) = table.get(&config.id) {
        if existing.strong_count() > 0 {
            return Err(TransportError::Init(InitError::AddressInUse(config.id)));
        }
    }

    let shared = Arc::new(Shared {
        id: config.id,
        name: config.name,
        capacity_slots: config.capacity_slots,
        max_frame_bytes: config.max_frame_bytes,
        overflow: config.overflow,
        queue: Mutex::new(Queue {
            frames: VecDeque::with_capacity(config.capacity_slots),
            closed: false,
        }),
        available: Condvar::new(),
        closed: AtomicBool::new(false),
        dropped: AtomicU64::new(0),
    });

    table.insert(config.id, Arc::downgrade(&shared));

    log::debug!(
        "transport: bound endpoint {:#010x} ({}), {} slots x {} bytes, priority {}{}",
        config.id,
        shared.name,
        config.capacity_slots,
        config.max_frame_bytes,
        config.priority,
        if config.realtime { ", realtime" } else { "" },
    );

    Ok(Endpoint { shared })
}

/// Deliver one frame to the endpoint bound to `dest_id`.
pub fn send_to(dest_id: u32, frame: &[u8]) -> Result<(), TransportError> {
    let target = {
        let table = router().lock().unwrap_or_else(PoisonError::into_inner);

        table
            .get(&dest_id)
            .and_then(Weak::upgrade)
            .ok_or(TransportError::Unreachable)?
    };

    target.push(frame)
}

impl Shared {
    fn push(&self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > self.max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                len: frame.len(),
                max: self.max_frame_bytes,
            });
        }

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if queue.closed {
            return Err(TransportError::Closed);
        }

        if queue.frames.len() == self.capacity_slots {
            match self.overflow {
                OverflowPolicy::DropOldest => {
                    queue.frames.pop_front();

                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;

                    log::debug!(
                        "transport: endpoint {:#010x} ({}) overflow, {} frame(s) dropped",
                        self.id,
                        self.name,
                        dropped
                    );
                }
                OverflowPolicy::Reject => return Err(TransportError::QueueFull),
            }
        }

        queue.frames.push_back(frame.into());
        drop(queue);

        self.available.notify_one();

        Ok(())
    }
}

impl Endpoint {
    /// The id this endpoint is bound to.
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    /// Number of frames dropped to overflow since binding.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Receive the next frame, blocking up to `timeout` (`None` blocks
    /// indefinitely).
    ///
    /// Returns `Closed` once the endpoint is closed and the queue drained,
    /// and `Timeout` when the deadline passes without a frame.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<Box<[u8]>, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if let Some(frame) = queue.frames.pop_front() {
                return Ok(frame);
            }

            if queue.closed {
                return Err(TransportError::Closed);
            }

            queue = match deadline {
                None => self
                    .shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();

                    if now >= deadline {
                        return Err(TransportError::Timeout);
                    }

                    let (guard, _res) = self
                        .shared
                        .available
                        .wait_timeout(queue, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);

                    guard
                }
            };
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<Box<[u8]>, TransportError> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(frame) = queue.frames.pop_front() {
            Ok(frame)
        } else if queue.closed {
            Err(TransportError::Closed)
        } else {
            Err(TransportError::Timeout)
        }
    }

    /// Close the endpoint: unbind the id, refuse further sends, and wake
    /// every blocked receiver. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut table = router().lock().unwrap_or_else(PoisonError::into_inner);

            // Only remove our own binding; the id may have been rebound by
            // a restarted module.
            if let Some(entry) = table.get(&self.shared.id) {
                if entry
                    .upgrade()
                    .is_some_and(|owner| Arc::ptr_eq(&owner, &self.shared))
                {
                    table.remove(&self.shared.id);
                }
            }
        }

        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        queue.closed = true;
        drop(queue);

        self.shared.available.notify_all();

        log::debug!(
            "transport: closed endpoint {:#010x} ({})",
            self.shared.id,
            self.shared.name
        );
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(id: u32, slots: usize) -> EndpointConfig {
        EndpointConfig {
            id,
            capacity_slots: slots,
            max_frame_bytes: 64,
            priority: 0,
            realtime: false,
            overflow: OverflowPolicy::DropOldest,
            name: format!("test-{id:#x}"),
        }
    }

    // Test endpoint ids use the 0xffff_xxxx range to stay clear of module
    // tests sharing the process-wide router.

    #[test]
    fn fifo_delivery() {
        let ep = bind(config(0xffff_0001, 4)).unwrap();

        send_to(0xffff_0001, &[1]).unwrap();
        send_to(0xffff_0001, &[2]).unwrap();

        assert_eq!(&*ep.recv(None).unwrap(), &[1]);
        assert_eq!(&*ep.recv(None).unwrap(), &[2]);

        ep.close();
    }

    #[test]
    fn overflow_drops_oldest() {
        let ep = bind(config(0xffff_0002, 2)).unwrap();

        for b in 1..=3u8 {
            send_to(0xffff_0002, &[b]).unwrap();
        }

        assert_eq!(ep.dropped_frames(), 1);
        assert_eq!(&*ep.recv(None).unwrap(), &[2]);
        assert_eq!(&*ep.recv(None).unwrap(), &[3]);

        ep.close();
    }

    #[test]
    fn reject_policy_reports_queue_full() {
        let mut cfg = config(0xffff_0003, 1);
        cfg.overflow = OverflowPolicy::Reject;

        let ep = bind(cfg).unwrap();

        send_to(0xffff_0003, &[1]).unwrap();

        assert_eq!(send_to(0xffff_0003, &[2]), Err(TransportError::QueueFull));

        ep.close();
    }

    #[test]
    fn unbound_destination_unreachable() {
        assert_eq!(
            send_to(0xffff_0004, &[0]),
            Err(TransportError::Unreachable)
        );
    }

    #[test]
    fn timeout_and_close_wakeup() {
        let ep = bind(config(0xffff_0005, 2)).unwrap();

        assert_eq!(
            ep.recv(Some(Duration::from_millis(10))),
            Err(TransportError::Timeout)
        );

        let waiter = ep.clone();
        let handle = std::thread::spawn(move || waiter.recv(None));

        std::thread::sleep(Duration::from_millis(50));
        ep.close();

        assert_eq!(handle.join().unwrap(), Err(TransportError::Closed));
    }

    #[test]
    fn try_recv_never_blocks() {
        let ep = bind(config(0xffff_0008, 2)).unwrap();

        assert_eq!(ep.try_recv(), Err(TransportError::Timeout));

        send_to(0xffff_0008, &[9]).unwrap();

        assert_eq!(&*ep.try_recv().unwrap(), &[9]);

        ep.close();

        assert_eq!(ep.try_recv(), Err(TransportError::Closed));
    }

    #[test]
    fn rebind_after_close() {
        let ep = bind(config(0xffff_0006, 2)).unwrap();

        assert_eq!(
            bind(config(0xffff_0006, 2)).unwrap_err(),
            TransportError::Init(InitError::AddressInUse(0xffff_0006))
        );

        ep.close();

        let again = bind(config(0xffff_0006, 2)).unwrap();

        again.close();
    }

    #[test]
    fn oversized_frame_refused() {
        let ep = bind(config(0xffff_0007, 2)).unwrap();

        let big = vec![0u8; 65];

        assert_eq!(
            send_to(0xffff_0007, &big),
            Err(TransportError::FrameTooLarge { len: 65, max: 64 })
        );

        ep.close();
    }
}
