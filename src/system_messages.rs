//! Subscription protocol messages exchanged on WORK mailboxes.

use crate::error::ProtocolError;
use crate::header::Header;
use crate::message::{message_id, Message, MessagePrefix, Registry, SubPrefix};
use commrat_wire::{CommratWire, CommratWireRead};

/// Request to subscribe to continuous data from a producer module.
///
/// Sent by a consumer to the WORK mailbox of the producer whose output type
/// equals the consumer's input type. The producer adds the consumer to the
/// subscriber list of that specific output.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, CommratWire)]
pub struct SubscribeRequest {
    /// The consumer's base address; the producer derives both the DATA and
    /// WORK mailboxes of the consumer from it.
    pub subscriber_base_addr: u32,
    /// Kind byte of the consumer's DATA mailbox that should receive the
    /// flow (`0x30 + input_index`).
    pub mailbox_index: u8,
    /// Desired update period in milliseconds; 0 means as fast as possible.
    pub requested_period_ms: i64,
}

/// Reply confirming (or refusing) a subscription.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, CommratWire)]
pub struct SubscribeReply {
    /// The producer's actual publication period in milliseconds.
    pub actual_period_ms: i64,
    /// True when the subscriber was added.
    pub success: bool,
    /// 0 = ok, 1 = subscriber capacity exceeded, 2 = other.
    pub error_code: u32,
}

/// Error code for a refused subscription: subscriber list full.
pub const SUBSCRIBE_ERROR_CAPACITY: u32 = 1;

/// Error code for a refused subscription: unspecified failure.
pub const SUBSCRIBE_ERROR_OTHER: u32 = 2;

/// Request to stop receiving data.
///
/// Removes every subscriber record with this base address from all of the
/// producer's output lists.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, CommratWire)]
pub struct UnsubscribeRequest {
    /// The consumer's base address.
    pub subscriber_base_addr: u32,
}

/// Acknowledgment of an unsubscribe request.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, CommratWire)]
pub struct UnsubscribeReply {
    /// Always true unless the producer failed internally.
    pub success: bool,
}

impl Message for SubscribeRequest {
    const MESSAGE_ID: u32 = message_id(MessagePrefix::System, SubPrefix::Command, 0);
}

impl Message for SubscribeReply {
    const MESSAGE_ID: u32 = message_id(MessagePrefix::System, SubPrefix::Reply, 0);
}

impl Message for UnsubscribeRequest {
    const MESSAGE_ID: u32 = message_id(MessagePrefix::System, SubPrefix::Command, 1);
}

impl Message for UnsubscribeReply {
    const MESSAGE_ID: u32 = message_id(MessagePrefix::System, SubPrefix::Reply, 1);
}

/// The registry of framework-internal messages; sizes every WORK mailbox.
#[derive(Debug, Copy, Clone)]
pub struct SystemRegistry;

impl Registry for SystemRegistry {
    const MESSAGE_IDS: &'static [u32] = &[
        SubscribeRequest::MESSAGE_ID,
        SubscribeReply::MESSAGE_ID,
        UnsubscribeRequest::MESSAGE_ID,
        UnsubscribeReply::MESSAGE_ID,
    ];

    const MAX_MESSAGE_SIZE: usize = crate::message::max_usize(&[
        SubscribeRequest::MAX_FRAME_LEN,
        SubscribeReply::MAX_FRAME_LEN,
        UnsubscribeRequest::MAX_FRAME_LEN,
        UnsubscribeReply::MAX_FRAME_LEN,
    ]);
}

const _: () = crate::message::assert_unique_ids(SystemRegistry::MESSAGE_IDS);

/// A decoded WORK mailbox frame.
///
/// WORK mailboxes only ever carry the four protocol messages; anything else
/// is reported as [`ProtocolError::UnknownMessage`] so the caller can log
/// and discard it.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum WorkMessage {
    /// A consumer asks to be added to a subscriber list.
    Subscribe(SubscribeRequest),
    /// A producer acknowledges a subscription.
    SubscribeAck(SubscribeReply),
    /// A consumer asks to be removed from all subscriber lists.
    Unsubscribe(UnsubscribeRequest),
    /// A producer acknowledges removal.
    UnsubscribeAck(UnsubscribeReply),
}

impl WorkMessage {
    /// Decode a raw frame body according to the header's message id.
    pub fn decode(header: &Header, body: &[u8]) -> Result<Self, ProtocolError> {
        let map_wire = |_| ProtocolError::UnknownMessage(header.msg_type);

        match header.msg_type {
            id if id == SubscribeRequest::MESSAGE_ID => {
                SubscribeRequest::unpack_from_slice(body)
                    .map(Self::Subscribe)
                    .map_err(map_wire)
            }
            id if id == SubscribeReply::MESSAGE_ID => SubscribeReply::unpack_from_slice(body)
                .map(Self::SubscribeAck)
                .map_err(map_wire),
            id if id == UnsubscribeRequest::MESSAGE_ID => {
                UnsubscribeRequest::unpack_from_slice(body)
                    .map(Self::Unsubscribe)
                    .map_err(map_wire)
            }
            id if id == UnsubscribeReply::MESSAGE_ID => {
                UnsubscribeReply::unpack_from_slice(body)
                    .map(Self::UnsubscribeAck)
                    .map_err(map_wire)
            }
            other => Err(ProtocolError::UnknownMessage(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commrat_wire::CommratWireWriteSized;
    use pretty_assertions::assert_eq;

    #[test]
    fn ids_are_system_prefixed() {
        for id in SystemRegistry::MESSAGE_IDS {
            assert_eq!(id >> 28, 0x1);
        }
    }

    #[test]
    fn subscribe_request_round_trip() {
        let req = SubscribeRequest {
            subscriber_base_addr: 0xbeef_3200,
            mailbox_index: 0x31,
            requested_period_ms: 100,
        };

        let packed = req.pack();

        assert_eq!(packed.len(), 13);
        assert_eq!(SubscribeRequest::unpack_from_slice(&packed).unwrap(), req);
    }

    #[test]
    fn work_dispatch_by_header_type() {
        let reply = SubscribeReply {
            actual_period_ms: 50,
            success: true,
            error_code: 0,
        };

        let header = Header::new(SubscribeReply::MESSAGE_ID, 13, 0, 0);

        let decoded = WorkMessage::decode(&header, &reply.pack()).unwrap();

        assert_eq!(decoded, WorkMessage::SubscribeAck(reply));
    }

    #[test]
    fn unknown_work_message_rejected() {
        let header = Header::new(0x2100_0000, 0, 0, 0);

        assert_eq!(
            WorkMessage::decode(&header, &[]),
            Err(ProtocolError::UnknownMessage(0x2100_0000))
        );
    }
}
