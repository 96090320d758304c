//! The per-module command thread: user command dispatch.

use crate::error::{Error, TransportError};
use crate::header::Header;
use crate::mailbox::Mailbox;
use crate::message::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A command received on the module's CMD mailbox, handed to `on_command`.
///
/// The payload stays packed until the handler asks for a concrete type;
/// a module with several command types matches on
/// [`is`](Self::is)/[`decode`](Self::decode).
#[derive(Debug, Clone)]
pub struct CommandFrame {
    /// The received frame header.
    pub header: Header,
    body: Box<[u8]>,
}

impl CommandFrame {
    pub(crate) fn new(header: Header, body: Box<[u8]>) -> Self {
        Self { header, body }
    }

    /// Message id of the command.
    pub fn message_id(&self) -> u32 {
        self.header.msg_type
    }

    /// Whether this command is of type `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.header.msg_type == T::MESSAGE_ID
    }

    /// Decode the command as `T`.
    pub fn decode<T: Message>(&self) -> Result<T, Error> {
        if !self.is::<T>() {
            return Err(Error::WrongType {
                expected: T::MESSAGE_ID,
                got: self.header.msg_type,
            });
        }

        Ok(T::unpack_from_slice(&self.body)?)
    }
}

pub(crate) struct CommandThread {
    pub name: String,
    pub cmd: Mailbox,
    pub command_ids: &'static [u32],
    pub running: Arc<AtomicBool>,
    pub handler: Arc<dyn Fn(&CommandFrame) + Send + Sync>,
}

impl CommandThread {
    pub fn run(self) {
        log::info!("[{}] command loop started on {}", self.name, self.cmd.id());

        while self.running.load(Ordering::Acquire) {
            let (header, body) = match self.cmd.receive_raw(None) {
                Ok(frame) => frame,
                Err(Error::Transport(TransportError::Closed)) => break,
                Err(e) => {
                    log::warn!("[{}] command receive failed: {e}", self.name);
                    continue;
                }
            };

            if !self.command_ids.contains(&header.msg_type) {
                // Unknown command types are dropped without comment.
                log::trace!(
                    "[{}] dropping unknown command {:#010x}",
                    self.name,
                    header.msg_type
                );
                continue;
            }

            (self.handler)(&CommandFrame::new(header, body));
        }

        log::info!("[{}] command loop ended", self.name);
    }
}
