//! The CMD/WORK/PUBLISH mailbox bundle owned per output type.

use crate::address::{Address, MailboxKind};
use crate::config::ModuleConfig;
use crate::error::Error;
use crate::mailbox::{Mailbox, MailboxConfig};
use crate::message::Registry;
use crate::system_messages::SystemRegistry;
use crate::transport::OverflowPolicy;

/// The three mailboxes serving one output type, sharing one base address:
/// CMD at `base + 0x00`, WORK at `base + 0x10`, PUBLISH at `base + 0x20`.
///
/// A module with no outputs owns a single set at its identity base with the
/// PUBLISH mailbox omitted.
#[derive(Debug, Clone)]
pub(crate) struct MailboxSet {
    pub base: Address,
    pub cmd: Mailbox,
    pub work: Mailbox,
    pub publish: Option<Mailbox>,
}

impl MailboxSet {
    /// Allocate the set's mailboxes. No transport resources are bound until
    /// [`start`](Self::start).
    ///
    /// `cmd_frame_len` is the tight frame bound over the module's declared
    /// command types; `publish_frame_len` the frame length of the output
    /// type, or `None` for a module without outputs.
    pub fn initialize(
        config: &ModuleConfig,
        base: Address,
        cmd_frame_len: usize,
        publish_frame_len: Option<usize>,
        label: &str,
    ) -> Result<Self, Error> {
        let cmd = Mailbox::new(MailboxConfig {
            id: base.with_kind(MailboxKind::Cmd)?,
            capacity_slots: config.message_slots,
            max_frame_bytes: cmd_frame_len,
            priority: config.priority,
            realtime: config.realtime,
            overflow: OverflowPolicy::DropOldest,
            name: format!("{}_cmd_{label}", config.name),
        });

        let work = Mailbox::new(MailboxConfig {
            id: base.with_kind(MailboxKind::Work)?,
            capacity_slots: config.message_slots,
            max_frame_bytes: SystemRegistry::MAX_MESSAGE_SIZE,
            priority: config.priority,
            realtime: config.realtime,
            overflow: OverflowPolicy::DropOldest,
            name: format!("{}_work_{label}", config.name),
        });

        let publish = publish_frame_len
            .map(|frame_len| {
                Ok::<_, Error>(Mailbox::new(MailboxConfig {
                    id: base.with_kind(MailboxKind::Publish)?,
                    capacity_slots: config.message_slots,
                    max_frame_bytes: frame_len,
                    priority: config.priority,
                    realtime: config.realtime,
                    overflow: OverflowPolicy::DropOldest,
                    name: format!("{}_publish_{label}", config.name),
                }))
            })
            .transpose()?;

        Ok(Self {
            base,
            cmd,
            work,
            publish,
        })
    }

    /// Open all mailboxes in the set; on failure, close whatever opened.
    pub fn start(&self) -> Result<(), Error> {
        self.cmd.start()?;

        if let Err(e) = self.work.start() {
            self.cmd.stop();
            return Err(e);
        }

        if let Some(publish) = &self.publish {
            if let Err(e) = publish.start() {
                self.work.stop();
                self.cmd.stop();
                return Err(e);
            }
        }

        Ok(())
    }

    /// Close all mailboxes in the set. Idempotent.
    pub fn stop(&self) {
        if let Some(publish) = &self.publish {
            publish.stop();
        }

        self.work.stop();
        self.cmd.stop();
    }
}
