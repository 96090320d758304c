//! Subscription protocol: consumer-side requests and producer-side
//! subscriber management.

use crate::address::{Address, MailboxKind};
use crate::config::ModuleConfig;
use crate::error::{Error, ProtocolError, TransportError};
use crate::mailbox::Mailbox;
use crate::module::publish::{Subscriber, SubscriberLists};
use crate::system_messages::{
    SubscribeReply, SubscribeRequest, UnsubscribeReply, UnsubscribeRequest,
    SUBSCRIBE_ERROR_CAPACITY, SUBSCRIBE_ERROR_OTHER,
};
use crate::time;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Attempts made to deliver a `SubscribeRequest` before giving up.
pub(crate) const SUBSCRIBE_RETRIES: u32 = 5;

/// Pause between subscription attempts.
pub(crate) const SUBSCRIBE_BACKOFF: Duration = Duration::from_millis(100);

/// Consumer-side view of one source subscription.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionState {
    /// A `SubscribeRequest` was delivered to the producer.
    pub requested: bool,
    /// The matching `SubscribeReply` arrived.
    pub reply_received: bool,
    /// Period the producer reported in its reply.
    pub actual_period_ms: i64,
}

/// All of a module's source subscriptions. Written by `start`/`stop` and by
/// the work threads when replies arrive.
#[derive(Debug, Default)]
pub(crate) struct Subscriptions {
    states: Mutex<Vec<SubscriptionState>>,
}

impl Subscriptions {
    pub fn reset(&self, count: usize) {
        *self.states.lock().unwrap_or_else(PoisonError::into_inner) =
            vec![SubscriptionState::default(); count];
    }

    pub fn mark_requested(&self, index: usize) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(state) = states.get_mut(index) {
            state.requested = true;
            state.reply_received = false;
        }
    }

    /// Record an arriving reply against the first slot still waiting for
    /// one. Matching is best-effort: the protocol carries no request tag,
    /// and requests are sent sequentially during `start`.
    pub fn record_reply(&self, reply: &SubscribeReply) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(state) = states
            .iter_mut()
            .find(|s| s.requested && !s.reply_received)
        {
            state.reply_received = true;
            state.actual_period_ms = reply.actual_period_ms;
        } else {
            log::debug!("unmatched SubscribeReply discarded");
        }
    }

    pub fn snapshot(&self) -> Vec<SubscriptionState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Address of the WORK mailbox of the producer whose output type equals the
/// given input type.
fn producer_work_addr(
    input_type_id: u32,
    source_system_id: u8,
    source_instance_id: u8,
) -> Result<Address, Error> {
    Ok(Address::encode(
        (input_type_id & 0xffff) as u16,
        source_system_id,
        source_instance_id,
        MailboxKind::Work,
    )?)
}

/// Send a `SubscribeRequest` for every configured source.
///
/// Each request names this module's identity base plus the kind byte of the
/// DATA mailbox that should receive the flow. Sends are retried while the
/// producer's queue is full or its WORK mailbox is not yet bound; after the
/// last attempt the source is skipped with a log entry and the module keeps
/// running without it.
pub(crate) fn subscribe_to_sources(
    config: &ModuleConfig,
    work: &Mailbox,
    identity_base: Address,
    input_type_ids: &[u32],
    subscriptions: &Subscriptions,
) {
    subscriptions.reset(config.inputs.len());

    for (index, source) in config.inputs.iter().enumerate() {
        let Some(&input_type_id) = input_type_ids.get(usize::from(source.input_index)) else {
            // Out-of-range indices never pass config validation.
            continue;
        };

        let mailbox_index = match MailboxKind::Data(source.input_index).offset() {
            Ok(byte) => byte,
            Err(e) => {
                log::error!("[{}] source {index} unaddressable: {e}", config.name);
                continue;
            }
        };

        let request = SubscribeRequest {
            subscriber_base_addr: identity_base.raw(),
            mailbox_index,
            requested_period_ms: config.period_ms(),
        };

        let dest = match producer_work_addr(input_type_id, source.system_id, source.instance_id)
        {
            Ok(dest) => dest,
            Err(e) => {
                log::error!("[{}] source {index} unaddressable: {e}", config.name);
                continue;
            }
        };

        log::info!(
            "[{}] sending SubscribeRequest[{index}] to producer WORK mailbox {dest}",
            config.name
        );

        let mut delivered = false;

        for attempt in 1..=SUBSCRIBE_RETRIES {
            match work.send(&request, time::now(), dest) {
                Ok(()) => {
                    subscriptions.mark_requested(index);
                    delivered = true;
                    break;
                }
                Err(Error::Transport(
                    TransportError::QueueFull | TransportError::Unreachable,
                )) if attempt < SUBSCRIBE_RETRIES => {
                    log::info!(
                        "[{}] SubscribeRequest[{index}] undelivered (attempt {attempt}/{SUBSCRIBE_RETRIES}), retrying",
                        config.name
                    );

                    time::sleep(SUBSCRIBE_BACKOFF);
                }
                Err(e) => {
                    log::warn!(
                        "[{}] SubscribeRequest[{index}] failed on attempt {attempt}: {e}",
                        config.name
                    );

                    if attempt < SUBSCRIBE_RETRIES {
                        time::sleep(SUBSCRIBE_BACKOFF);
                    }
                }
            }
        }

        if !delivered {
            log::error!(
                "[{}] giving up on SubscribeRequest[{index}] after {SUBSCRIBE_RETRIES} attempts",
                config.name
            );
        }
    }
}

/// Send an `UnsubscribeRequest` to every configured source. Best effort; a
/// failed send is logged and not retried.
pub(crate) fn unsubscribe_from_sources(
    config: &ModuleConfig,
    work: &Mailbox,
    identity_base: Address,
    input_type_ids: &[u32],
) {
    let request = UnsubscribeRequest {
        subscriber_base_addr: identity_base.raw(),
    };

    for (index, source) in config.inputs.iter().enumerate() {
        let Some(&input_type_id) = input_type_ids.get(usize::from(source.input_index)) else {
            continue;
        };

        let dest = match producer_work_addr(input_type_id, source.system_id, source.instance_id)
        {
            Ok(dest) => dest,
            Err(_) => continue,
        };

        if let Err(e) = work.send(&request, time::now(), dest) {
            log::debug!(
                "[{}] UnsubscribeRequest[{index}] to {dest} failed: {e}",
                config.name
            );
        }
    }
}

/// Producer side: handle a `SubscribeRequest` received on the WORK mailbox
/// of output `output_index`.
pub(crate) fn handle_subscribe_request(
    name: &str,
    output_index: usize,
    request: &SubscribeRequest,
    lists: &SubscriberLists,
    work: &Mailbox,
    period_ms: i64,
) {
    let subscriber = Subscriber {
        base_addr: request.subscriber_base_addr,
        mailbox_index: request.mailbox_index,
    };

    let reply = match lists.add(output_index, subscriber) {
        Ok(()) => {
            log::info!(
                "[{name}] subscriber {} added to output {output_index}, data mailbox {}",
                Address::from_raw(request.subscriber_base_addr),
                subscriber.data_mailbox()
            );

            SubscribeReply {
                actual_period_ms: period_ms,
                success: true,
                error_code: 0,
            }
        }
        Err(e) => {
            log::warn!(
                "[{name}] refusing subscriber {} on output {output_index}: {e}",
                Address::from_raw(request.subscriber_base_addr)
            );

            SubscribeReply {
                actual_period_ms: 0,
                success: false,
                error_code: match e {
                    ProtocolError::SubscriberCapacity => SUBSCRIBE_ERROR_CAPACITY,
                    _ => SUBSCRIBE_ERROR_OTHER,
                },
            }
        }
    };

    send_work_reply(name, work, request.subscriber_base_addr, &reply);
}

/// Producer side: handle an `UnsubscribeRequest`, scrubbing the subscriber
/// from every output list.
pub(crate) fn handle_unsubscribe_request(
    name: &str,
    request: &UnsubscribeRequest,
    lists: &SubscriberLists,
    work: &Mailbox,
) {
    let removed = lists.remove_base(request.subscriber_base_addr);

    log::info!(
        "[{name}] unsubscribed {} ({removed} record(s) removed)",
        Address::from_raw(request.subscriber_base_addr)
    );

    send_work_reply(
        name,
        work,
        request.subscriber_base_addr,
        &UnsubscribeReply { success: true },
    );
}

fn send_work_reply<T: crate::message::Message>(
    name: &str,
    work: &Mailbox,
    subscriber_base_addr: u32,
    reply: &T,
) {
    let dest = Address::from_raw(subscriber_base_addr).with_kind(MailboxKind::Work);

    match dest {
        Ok(dest) => {
            if let Err(e) = work.send(reply, time::now(), dest) {
                log::warn!("[{name}] protocol reply to {dest} failed: {e}");
            }
        }
        Err(e) => log::warn!("[{name}] protocol reply unaddressable: {e}"),
    }
}
