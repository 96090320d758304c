//! The per-output work thread: subscription protocol traffic.

use crate::error::{Error, TransportError};
use crate::mailbox::Mailbox;
use crate::module::publish::SubscriberLists;
use crate::module::subscription::{
    handle_subscribe_request, handle_unsubscribe_request, Subscriptions,
};
use crate::system_messages::WorkMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct WorkThread {
    pub name: String,
    pub output_index: usize,
    pub work: Mailbox,
    pub lists: Arc<SubscriberLists>,
    pub subscriptions: Arc<Subscriptions>,
    pub running: Arc<AtomicBool>,
    pub period_ms: i64,
}

impl WorkThread {
    /// Idle → Receive → Dispatch, until `running` clears and the mailbox
    /// closes.
    pub fn run(self) {
        log::info!(
            "[{}] work loop started on {}",
            self.name,
            self.work.id()
        );

        while self.running.load(Ordering::Acquire) {
            let (header, body) = match self.work.receive_raw(None) {
                Ok(frame) => frame,
                Err(Error::Transport(TransportError::Closed)) => break,
                Err(e) => {
                    log::warn!("[{}] work receive failed: {e}", self.name);
                    continue;
                }
            };

            match WorkMessage::decode(&header, &body) {
                Ok(WorkMessage::Subscribe(request)) => handle_subscribe_request(
                    &self.name,
                    self.output_index,
                    &request,
                    &self.lists,
                    &self.work,
                    self.period_ms,
                ),
                Ok(WorkMessage::SubscribeAck(reply)) => {
                    log::info!(
                        "[{}] SubscribeReply received: {} (actual_period_ms={})",
                        self.name,
                        if reply.success { "success" } else { "refused" },
                        reply.actual_period_ms
                    );

                    self.subscriptions.record_reply(&reply);
                }
                Ok(WorkMessage::Unsubscribe(request)) => handle_unsubscribe_request(
                    &self.name,
                    &request,
                    &self.lists,
                    &self.work,
                ),
                Ok(WorkMessage::UnsubscribeAck(reply)) => {
                    log::trace!(
                        "[{}] UnsubscribeReply received (success={})",
                        self.name,
                        reply.success
                    );
                }
                Err(e) => {
                    // Malformed or foreign frame on a protocol mailbox:
                    // drop it, never retry.
                    log::warn!("[{}] dropping WORK frame: {e}", self.name);
                }
            }
        }

        log::info!("[{}] work loop ended", self.name);
    }
}
