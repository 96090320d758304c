//! Per-output subscriber routing.

use crate::address::Address;
use crate::error::ProtocolError;
use crate::mailbox::Mailbox;
use crate::message::Message;
use crate::time::Timestamp;
use std::sync::{Mutex, PoisonError};

/// Upper bound on subscribers per output list; the address layout caps
/// instances well below this.
pub(crate) const MAX_SUBSCRIBERS: usize = 16;

/// One consumer of one output.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Subscriber {
    /// The consumer's base address.
    pub base_addr: u32,
    /// Kind byte of the consumer's receiving DATA mailbox.
    pub mailbox_index: u8,
}

impl Subscriber {
    /// The DATA mailbox this subscriber receives on.
    pub fn data_mailbox(&self) -> Address {
        Address::from_raw(self.base_addr | u32::from(self.mailbox_index))
    }
}

type SubscriberList = heapless::Vec<Subscriber, MAX_SUBSCRIBERS>;

/// All subscriber lists of a module, one per output, behind the module's
/// single subscriber mutex. The lock is held only while adding, removing,
/// or copying a list for publication.
#[derive(Debug)]
pub(crate) struct SubscriberLists {
    lists: Mutex<Vec<SubscriberList>>,
}

impl SubscriberLists {
    pub fn new(num_outputs: usize) -> Self {
        Self {
            lists: Mutex::new(vec![SubscriberList::new(); num_outputs]),
        }
    }

    /// Drop every subscriber; used when a module restarts from scratch.
    pub fn clear(&self) {
        for list in self
            .lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
        {
            list.clear();
        }
    }

    /// Add a subscriber to output `output_index`. Re-subscribing is
    /// idempotent; a full list or an unknown output index is refused.
    pub fn add(&self, output_index: usize, subscriber: Subscriber) -> Result<(), ProtocolError> {
        let mut lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(list) = lists.get_mut(output_index) else {
            return Err(ProtocolError::UnknownOutput {
                index: output_index,
            });
        };

        if list.contains(&subscriber) {
            return Ok(());
        }

        list.push(subscriber)
            .map_err(|_| ProtocolError::SubscriberCapacity)
    }

    /// Remove every record with `base_addr` from all output lists,
    /// returning how many were removed.
    pub fn remove_base(&self, base_addr: u32) -> usize {
        let mut lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);

        let mut removed = 0;

        for list in lists.iter_mut() {
            let before = list.len();

            list.retain(|s| s.base_addr != base_addr);

            removed += before - list.len();
        }

        removed
    }

    /// Copy of output `output_index`'s list for publication outside the
    /// lock.
    pub fn snapshot(&self, output_index: usize) -> SubscriberList {
        self.lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(output_index)
            .cloned()
            .unwrap_or_default()
    }

    /// Current subscriber count per output.
    pub fn counts(&self) -> Vec<usize> {
        self.lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|list| list.len())
            .collect()
    }
}

/// Publication side of a module: one PUBLISH mailbox per output plus the
/// shared subscriber lists.
#[doc(hidden)]
#[derive(Debug)]
pub struct Publisher {
    name: String,
    mailboxes: Vec<Mailbox>,
    lists: std::sync::Arc<SubscriberLists>,
}

impl Publisher {
    pub(crate) fn new(
        name: String,
        mailboxes: Vec<Mailbox>,
        lists: std::sync::Arc<SubscriberLists>,
    ) -> Self {
        Self {
            name,
            mailboxes,
            lists,
        }
    }

    /// Send one output value to every subscriber of output `index`.
    ///
    /// Send failures are logged per subscriber and do not abort the loop;
    /// records only leave the list through an explicit unsubscribe.
    pub(crate) fn publish_one<T: Message>(&self, index: usize, value: &T, timestamp_ns: Timestamp) {
        let Some(mailbox) = self.mailboxes.get(index) else {
            return;
        };

        for subscriber in self.lists.snapshot(index) {
            let dest = subscriber.data_mailbox();

            if let Err(e) = mailbox.send(value, timestamp_ns, dest) {
                log::warn!(
                    "[{}] publish of output {index} to {dest} failed: {e}",
                    self.name
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_is_idempotent() {
        let lists = SubscriberLists::new(2);

        let sub = Subscriber {
            base_addr: 0x0001_2300,
            mailbox_index: 0x30,
        };

        lists.add(0, sub).unwrap();
        lists.add(0, sub).unwrap();

        assert_eq!(lists.counts(), vec![1, 0]);
    }

    #[test]
    fn remove_scrubs_every_list() {
        let lists = SubscriberLists::new(2);

        lists
            .add(
                0,
                Subscriber {
                    base_addr: 0xa00,
                    mailbox_index: 0x30,
                },
            )
            .unwrap();
        lists
            .add(
                1,
                Subscriber {
                    base_addr: 0xa00,
                    mailbox_index: 0x31,
                },
            )
            .unwrap();
        lists
            .add(
                1,
                Subscriber {
                    base_addr: 0xb00,
                    mailbox_index: 0x30,
                },
            )
            .unwrap();

        assert_eq!(lists.remove_base(0xa00), 2);
        assert_eq!(lists.counts(), vec![0, 1]);
    }

    #[test]
    fn capacity_refused() {
        let lists = SubscriberLists::new(1);

        for i in 0..MAX_SUBSCRIBERS {
            lists
                .add(
                    0,
                    Subscriber {
                        base_addr: (i as u32) << 8,
                        mailbox_index: 0x30,
                    },
                )
                .unwrap();
        }

        let overflow = lists.add(
            0,
            Subscriber {
                base_addr: 0xffff_ff00,
                mailbox_index: 0x30,
            },
        );

        assert_eq!(overflow, Err(ProtocolError::SubscriberCapacity));
    }

    #[test]
    fn unknown_output_list_refused() {
        let lists = SubscriberLists::new(1);

        let refused = lists.add(
            3,
            Subscriber {
                base_addr: 0xa00,
                mailbox_index: 0x30,
            },
        );

        assert_eq!(refused, Err(ProtocolError::UnknownOutput { index: 3 }));
    }

    #[test]
    fn data_mailbox_composition() {
        let sub = Subscriber {
            base_addr: 0x1234_5600,
            mailbox_index: 0x32,
        };

        assert_eq!(sub.data_mailbox(), Address::from_raw(0x1234_5632));
    }
}
