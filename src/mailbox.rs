//! Typed mailbox wrapper over the transport.
//!
//! A [`Mailbox`] owns one transport endpoint and speaks frames: a fixed
//! [`Header`] followed by one packed payload. Sending fills the header from
//! the payload's registry id and the mailbox's own sequence counter;
//! receiving checks byte order, size, and type before unpacking.
//!
//! Buffer sizing is the caller's lever: `max_frame_bytes` should be the
//! tight bound over the payload types the mailbox is permitted to carry
//! (see [`max_frame_len!`](crate::max_frame_len)), not the registry maximum.

use crate::address::Address;
use crate::error::{Error, LifecycleError, TransportError};
use crate::header::{Header, HeaderFlags, HEADER_LEN};
use crate::message::{Frame, Message};
use crate::time::Timestamp;
use crate::transport::{self, Endpoint, EndpointConfig, OverflowPolicy};
use commrat_wire::{CommratWireRead, CommratWireWrite};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Construction parameters for one mailbox.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    /// Fully encoded mailbox address.
    pub id: Address,
    /// Queue depth in frames.
    pub capacity_slots: usize,
    /// Largest frame this mailbox will carry, header included.
    pub max_frame_bytes: usize,
    /// Send priority hint.
    pub priority: u8,
    /// Realtime hint.
    pub realtime: bool,
    /// Receive-queue overflow behaviour.
    pub overflow: OverflowPolicy,
    /// Name used in log lines.
    pub name: String,
}

struct Inner {
    config: MailboxConfig,
    endpoint: Mutex<Option<Endpoint>>,
    seq: AtomicU32,
    sent: AtomicU64,
    received: AtomicU64,
}

/// A typed facade over one transport endpoint.
///
/// Cheaply cloneable; clones share the endpoint, sequence counter and
/// statistics. `start` binds the transport endpoint, `stop` closes it and
/// wakes any blocked receiver.
#[derive(Clone)]
pub struct Mailbox {
    inner: Arc<Inner>,
}

impl Mailbox {
    /// Create a mailbox; no transport resources are held until
    /// [`start`](Self::start).
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                endpoint: Mutex::new(None),
                seq: AtomicU32::new(0),
                sent: AtomicU64::new(0),
                received: AtomicU64::new(0),
            }),
        }
    }

    /// The mailbox address.
    pub fn id(&self) -> Address {
        self.inner.config.id
    }

    /// Frames sent through this mailbox since creation.
    pub fn messages_sent(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    /// Frames received through this mailbox since creation.
    pub fn messages_received(&self) -> u64 {
        self.inner.received.load(Ordering::Relaxed)
    }

    /// Bind the transport endpoint.
    pub fn start(&self) -> Result<(), Error> {
        let mut endpoint = self
            .inner
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if endpoint.is_some() {
            return Err(LifecycleError::AlreadyStarted.into());
        }

        let bound = transport::bind(EndpointConfig {
            id: self.inner.config.id.raw(),
            capacity_slots: self.inner.config.capacity_slots,
            max_frame_bytes: self.inner.config.max_frame_bytes,
            priority: self.inner.config.priority,
            realtime: self.inner.config.realtime,
            overflow: self.inner.config.overflow,
            name: self.inner.config.name.clone(),
        })?;

        log::info!(
            "mailbox {} started at {}",
            self.inner.config.name,
            self.inner.config.id
        );

        *endpoint = Some(bound);

        Ok(())
    }

    /// Close the endpoint. Idempotent; queued frames are discarded.
    pub fn stop(&self) {
        let mut endpoint = self
            .inner
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(ep) = endpoint.take() {
            ep.close();

            log::info!(
                "mailbox {} stopped at {}",
                self.inner.config.name,
                self.inner.config.id
            );
        }
    }

    /// Whether the mailbox is currently bound.
    pub fn is_running(&self) -> bool {
        self.inner
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn endpoint(&self) -> Result<Endpoint, Error> {
        self.inner
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::Transport(TransportError::Closed))
    }

    /// Serialize `payload` behind a header and deliver it to `dest`.
    ///
    /// The header's `msg_type` comes from the registry, `msg_size` from the
    /// packed payload, `seq_number` from this mailbox's counter, and
    /// `timestamp_ns` from the caller (the loop executors own time
    /// semantics).
    pub fn send<T: Message>(
        &self,
        payload: &T,
        timestamp_ns: Timestamp,
        dest: Address,
    ) -> Result<(), Error> {
        // Sending requires a started mailbox so the sequence stream has an
        // owner, even though delivery goes through the router.
        let _ = self.endpoint()?;

        let payload_len = payload.packed_len();
        let header = Header::new(
            T::MESSAGE_ID,
            payload_len as u32,
            timestamp_ns,
            self.inner.seq.fetch_add(1, Ordering::Relaxed),
        );

        let mut frame = vec![0u8; HEADER_LEN + payload_len];

        header.pack_to_slice(&mut frame[..HEADER_LEN])?;
        payload.pack_to_slice(&mut frame[HEADER_LEN..])?;

        transport::send_to(dest.raw(), &frame)?;

        self.inner.sent.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// Receive one frame and return its header and raw payload bytes.
    ///
    /// `timeout` of `None` blocks until a frame arrives or the mailbox is
    /// closed.
    pub fn receive_raw(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(Header, Box<[u8]>), Error> {
        let endpoint = self.endpoint()?;

        let frame = endpoint.recv(timeout)?;

        let header = Header::unpack_from_slice(&frame)?;

        if header.flags().contains(HeaderFlags::BIG_ENDIAN) {
            // Single byte-order process; a big-endian frame cannot have
            // come from this transport.
            return Err(Error::Wire(commrat_wire::WireError::InvalidValue));
        }

        let body = frame
            .get(HEADER_LEN..HEADER_LEN + header.msg_size as usize)
            .ok_or(Error::Wire(commrat_wire::WireError::ReadBufferTooShort {
                expected: HEADER_LEN + header.msg_size as usize,
                got: frame.len(),
            }))?;

        self.inner.received.fetch_add(1, Ordering::Relaxed);

        Ok((header, body.into()))
    }

    /// Receive one frame of type `T`.
    pub fn receive<T: Message>(&self, timeout: Option<Duration>) -> Result<Frame<T>, Error> {
        let (header, body) = self.receive_raw(timeout)?;

        if header.msg_type != T::MESSAGE_ID {
            return Err(Error::WrongType {
                expected: T::MESSAGE_ID,
                got: header.msg_type,
            });
        }

        let payload = T::unpack_from_slice(&body)?;

        Ok(Frame { header, payload })
    }

    /// Non-blocking receive of type `T`.
    pub fn try_receive<T: Message>(&self) -> Result<Frame<T>, Error> {
        self.receive(Some(Duration::ZERO))
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("id", &self.inner.config.id)
            .field("name", &self.inner.config.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commrat_wire::CommratWire;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
    struct Ping {
        value: u32,
    }

    impl Message for Ping {
        const MESSAGE_ID: u32 = crate::message::message_id(
            crate::message::MessagePrefix::UserDefined,
            crate::message::SubPrefix::Data,
            0x00ff_f001,
        );
    }

    #[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
    struct Pong {
        value: u64,
    }

    impl Message for Pong {
        const MESSAGE_ID: u32 = crate::message::message_id(
            crate::message::MessagePrefix::UserDefined,
            crate::message::SubPrefix::Data,
            0x00ff_f002,
        );
    }

    fn mailbox(raw_id: u32) -> Mailbox {
        Mailbox::new(MailboxConfig {
            id: Address::from_raw(raw_id),
            capacity_slots: 4,
            max_frame_bytes: crate::max_frame_len!(Ping, Pong),
            priority: 0,
            realtime: false,
            overflow: OverflowPolicy::DropOldest,
            name: format!("mbx-{raw_id:#x}"),
        })
    }

    #[test]
    fn typed_round_trip() {
        let a = mailbox(0xfffe_0100);
        let b = mailbox(0xfffe_0200);

        a.start().unwrap();
        b.start().unwrap();

        a.send(&Ping { value: 7 }, 123, b.id()).unwrap();

        let frame = b.receive::<Ping>(None).unwrap();

        assert_eq!(frame.payload, Ping { value: 7 });
        assert_eq!(frame.header.timestamp_ns, 123);
        assert_eq!(frame.header.msg_type, Ping::MESSAGE_ID);
        assert_eq!(frame.header.msg_size, 4);
        assert_eq!(frame.header.seq_number, 0);

        assert_eq!(a.messages_sent(), 1);
        assert_eq!(b.messages_received(), 1);

        a.stop();
        b.stop();
    }

    #[test]
    fn wrong_type_reported() {
        let a = mailbox(0xfffe_0300);
        let b = mailbox(0xfffe_0400);

        a.start().unwrap();
        b.start().unwrap();

        a.send(&Ping { value: 1 }, 0, b.id()).unwrap();

        let err = b.receive::<Pong>(None).unwrap_err();

        assert_eq!(
            err,
            Error::WrongType {
                expected: Pong::MESSAGE_ID,
                got: Ping::MESSAGE_ID,
            }
        );

        a.stop();
        b.stop();
    }

    #[test]
    fn double_start_refused() {
        let a = mailbox(0xfffe_0500);

        a.start().unwrap();

        assert_eq!(
            a.start().unwrap_err(),
            Error::Lifecycle(LifecycleError::AlreadyStarted)
        );

        a.stop();
        a.stop();
    }

    #[test]
    fn sequence_numbers_increment_per_mailbox() {
        let a = mailbox(0xfffe_0600);
        let b = mailbox(0xfffe_0700);

        a.start().unwrap();
        b.start().unwrap();

        for i in 0..3 {
            a.send(&Ping { value: i }, 0, b.id()).unwrap();
        }

        for expected_seq in 0..3 {
            let frame = b.receive::<Ping>(None).unwrap();

            assert_eq!(frame.header.seq_number, expected_seq);
        }

        a.stop();
        b.stop();
    }

    #[test]
    fn try_receive_on_empty_mailbox() {
        let a = mailbox(0xfffe_0900);

        a.start().unwrap();

        assert_eq!(
            a.try_receive::<Ping>().unwrap_err(),
            Error::Transport(TransportError::Timeout)
        );

        a.send(&Ping { value: 9 }, 0, a.id()).unwrap();

        assert_eq!(a.try_receive::<Ping>().unwrap().payload, Ping { value: 9 });

        a.stop();
    }

    #[test]
    fn receive_after_stop_reports_closed() {
        let a = mailbox(0xfffe_0800);

        a.start().unwrap();
        a.stop();

        assert_eq!(
            a.receive::<Ping>(Some(Duration::from_millis(5))).unwrap_err(),
            Error::Transport(TransportError::Closed)
        );
    }
}
