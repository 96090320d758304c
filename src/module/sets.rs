//! Output and secondary-input arity machinery.
//!
//! A module's outputs are a tuple of payload types; its secondary inputs
//! (everything past the primary) likewise. These traits give the runtime a
//! uniform view — type ids, frame bounds, per-element publication and
//! history handling — over tuple arities up to four. Both traits are sealed:
//! user code picks a tuple, it never implements these directly.

use crate::error::{Error, LifecycleError, TransportError};
use crate::mailbox::Mailbox;
use crate::message::{Frame, Message};
use crate::module::metadata::ModuleContext;
use crate::module::publish::Publisher;
use crate::module::ThreadSettings;
use crate::ring::{InterpolationMode, TimestampedRingBuffer};
use crate::time::Timestamp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

mod private {
    pub trait SealedOutputs {}

    pub trait SealedInputs {}
}

/// The outputs a module produces per `process` invocation: `()` for a pure
/// sink, or a tuple of one to four [`Message`] types.
pub trait OutputSet: private::SealedOutputs + Send + 'static {
    /// Number of outputs.
    const COUNT: usize;

    /// Message id per output, in declaration order.
    const TYPE_IDS: &'static [u32];

    /// Frame bound per output, for sizing PUBLISH mailboxes.
    const FRAME_LENS: &'static [usize];

    /// Route each element to the subscribers of its own output index.
    #[doc(hidden)]
    fn publish_all(&self, publisher: &Publisher, timestamp_ns: Timestamp);
}

impl private::SealedOutputs for () {}

impl OutputSet for () {
    const COUNT: usize = 0;
    const TYPE_IDS: &'static [u32] = &[];
    const FRAME_LENS: &'static [usize] = &[];

    fn publish_all(&self, _publisher: &Publisher, _timestamp_ns: Timestamp) {}
}

macro_rules! impl_output_set {
    ($( ($($ty:ident => $idx:tt),+) ),+ $(,)?) => {
        $(
            impl<$($ty: Message),+> private::SealedOutputs for ($($ty,)+) {}

            impl<$($ty: Message),+> OutputSet for ($($ty,)+) {
                const COUNT: usize = <Self as OutputSet>::TYPE_IDS.len();

                const TYPE_IDS: &'static [u32] = &[$($ty::MESSAGE_ID),+];

                const FRAME_LENS: &'static [usize] = &[$($ty::MAX_FRAME_LEN),+];

                fn publish_all(&self, publisher: &Publisher, timestamp_ns: Timestamp) {
                    $(
                        publisher.publish_one($idx, &self.$idx, timestamp_ns);
                    )+
                }
            }
        )+
    };
}

impl_output_set!(
    (A => 0),
    (A => 0, B => 1),
    (A => 0, B => 1, C => 2),
    (A => 0, B => 1, C => 2, D => 3),
);

/// The secondary inputs of a multi-input module: a tuple of one to three
/// [`Message`] types, sampled from history at the primary's timestamp.
pub trait SecondaryInputs: private::SealedInputs + Send + 'static {
    /// Number of secondary inputs.
    const COUNT: usize;

    /// Message id per secondary, in declaration order.
    const TYPE_IDS: &'static [u32];

    /// Frame bound per secondary, for sizing DATA mailboxes.
    const FRAME_LENS: &'static [usize];

    /// Payload tuple handed to `process` when every secondary synced.
    type Values: Send + 'static;

    /// One timestamped ring buffer per secondary.
    #[doc(hidden)]
    type Histories: Send + Sync + 'static;

    /// Allocate the history buffers.
    #[doc(hidden)]
    fn make_histories(capacity: usize) -> Self::Histories;

    /// Spawn one receive thread per secondary, each blocking on its DATA
    /// mailbox and pushing every arrival into its history buffer.
    #[doc(hidden)]
    fn spawn_receivers(
        name: &str,
        histories: &Arc<Self::Histories>,
        mailboxes: &[Mailbox],
        running: &Arc<AtomicBool>,
        settings: &ThreadSettings,
    ) -> Result<Vec<JoinHandle<()>>, Error>;

    /// Sample every secondary at `requested_ts` within `tolerance`,
    /// recording metadata per slot. The first miss invalidates its slot and
    /// aborts the whole gather.
    #[doc(hidden)]
    fn gather(
        histories: &Self::Histories,
        requested_ts: Timestamp,
        tolerance: Duration,
        ctx: &mut ModuleContext,
    ) -> Option<Self::Values>;
}

/// Blocking receive loop feeding one secondary input's history.
fn secondary_receive_loop<T: Message>(
    name: String,
    slot: usize,
    mailbox: Mailbox,
    running: Arc<AtomicBool>,
    push: impl Fn(Frame<T>),
) {
    log::info!("[{name}] secondary input {slot} receive loop started");

    while running.load(Ordering::Acquire) {
        match mailbox.receive::<T>(None) {
            Ok(frame) => push(frame),
            Err(Error::Transport(TransportError::Closed)) => break,
            Err(e) => {
                // Undecodable frame: drop it and keep the history warm.
                log::warn!("[{name}] secondary input {slot} receive failed: {e}");
            }
        }
    }

    log::info!("[{name}] secondary input {slot} receive loop ended");
}

macro_rules! impl_secondary_inputs {
    ($( ($($ty:ident => $idx:tt),+) ),+ $(,)?) => {
        $(
            impl<$($ty: Message),+> private::SealedInputs for ($($ty,)+) {}

            impl<$($ty: Message + Sync),+> SecondaryInputs for ($($ty,)+) {
                const COUNT: usize = <Self as SecondaryInputs>::TYPE_IDS.len();

                const TYPE_IDS: &'static [u32] = &[$($ty::MESSAGE_ID),+];

                const FRAME_LENS: &'static [usize] = &[$($ty::MAX_FRAME_LEN),+];

                type Values = ($($ty,)+);

                type Histories = ($(TimestampedRingBuffer<Frame<$ty>>,)+);

                fn make_histories(capacity: usize) -> Self::Histories {
                    ($(TimestampedRingBuffer::<Frame<$ty>>::new(capacity),)+)
                }

                fn spawn_receivers(
                    name: &str,
                    histories: &Arc<Self::Histories>,
                    mailboxes: &[Mailbox],
                    running: &Arc<AtomicBool>,
                    settings: &ThreadSettings,
                ) -> Result<Vec<JoinHandle<()>>, Error> {
                    let mut handles = Vec::new();

                    $(
                        {
                            // Slot 0 is the primary; secondary $idx lives in
                            // metadata slot $idx + 1 and mailbox $idx + 1.
                            let slot = $idx + 1;

                            let mailbox = mailboxes
                                .get(slot)
                                .cloned()
                                .ok_or(Error::Lifecycle(LifecycleError::ThreadSpawn))?;

                            let history = Arc::clone(histories);
                            let running = Arc::clone(running);
                            let thread_name = format!("{name}-in{slot}");
                            let loop_name = name.to_string();
                            let settings = settings.clone();

                            let handle = std::thread::Builder::new()
                                .name(thread_name)
                                .spawn(move || {
                                    settings.apply(&loop_name);

                                    secondary_receive_loop::<$ty>(
                                        loop_name,
                                        slot,
                                        mailbox,
                                        running,
                                        move |frame: Frame<$ty>| {
                                            history.$idx.push(frame.header.timestamp_ns, frame);
                                        },
                                    );
                                })
                                .map_err(|_| Error::Lifecycle(LifecycleError::ThreadSpawn))?;

                            handles.push(handle);
                        }
                    )+

                    Ok(handles)
                }

                fn gather(
                    histories: &Self::Histories,
                    requested_ts: Timestamp,
                    tolerance: Duration,
                    ctx: &mut ModuleContext,
                ) -> Option<Self::Values> {
                    Some((
                        $(
                            match histories.$idx.get_data(
                                requested_ts,
                                tolerance,
                                InterpolationMode::Nearest,
                            ) {
                                Some(entry) => {
                                    ctx.record($idx + 1, &entry.value.header, true);

                                    entry.value.payload
                                }
                                None => {
                                    ctx.invalidate($idx + 1);

                                    return None;
                                }
                            },
                        )+
                    ))
                }
            }
        )+
    };
}

impl_secondary_inputs!(
    (A => 0),
    (A => 0, B => 1),
    (A => 0, B => 1, C => 2),
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Copy, Clone, Default, PartialEq, commrat_wire::CommratWire)]
    struct Gps {
        lat: f64,
    }

    impl Message for Gps {
        const MESSAGE_ID: u32 = crate::message::message_id(
            crate::message::MessagePrefix::UserDefined,
            crate::message::SubPrefix::Data,
            0x00ff_e001,
        );
    }

    #[derive(Debug, Copy, Clone, Default, PartialEq, commrat_wire::CommratWire)]
    struct Lidar {
        range: f32,
    }

    impl Message for Lidar {
        const MESSAGE_ID: u32 = crate::message::message_id(
            crate::message::MessagePrefix::UserDefined,
            crate::message::SubPrefix::Data,
            0x00ff_e002,
        );
    }

    fn frame<T>(payload: T, ts: u64) -> Frame<T> {
        Frame {
            header: Header::new(0, 0, ts, 0),
            payload,
        }
    }

    #[test]
    fn output_set_metadata() {
        assert_eq!(<() as OutputSet>::COUNT, 0);
        assert_eq!(<(Gps,) as OutputSet>::COUNT, 1);
        assert_eq!(
            <(Gps, Lidar) as OutputSet>::TYPE_IDS,
            &[Gps::MESSAGE_ID, Lidar::MESSAGE_ID]
        );
    }

    #[test]
    fn gather_returns_synced_payloads() {
        let histories = <(Gps, Lidar) as SecondaryInputs>::make_histories(8);

        histories.0.push(1_000, frame(Gps { lat: 1.0 }, 1_000));
        histories.1.push(1_040, frame(Lidar { range: 2.0 }, 1_040));

        let mut ctx = ModuleContext::new(3);

        let values = <(Gps, Lidar) as SecondaryInputs>::gather(
            &histories,
            1_010,
            Duration::from_nanos(100),
            &mut ctx,
        )
        .unwrap();

        assert_eq!(values.0, Gps { lat: 1.0 });
        assert_eq!(values.1, Lidar { range: 2.0 });
        assert_eq!(ctx.input_timestamp(1), Some(1_000));
        assert_eq!(ctx.input_timestamp(2), Some(1_040));
    }

    #[test]
    fn gather_aborts_on_first_miss() {
        let histories = <(Gps, Lidar) as SecondaryInputs>::make_histories(8);

        // Lidar history stays empty.
        histories.0.push(1_000, frame(Gps { lat: 1.0 }, 1_000));

        let mut ctx = ModuleContext::new(3);

        let missed = <(Gps, Lidar) as SecondaryInputs>::gather(
            &histories,
            1_000,
            Duration::from_nanos(100),
            &mut ctx,
        );

        assert!(missed.is_none());
        assert!(ctx.is_input_valid(1));
        assert!(!ctx.is_input_valid(2));
    }
}
