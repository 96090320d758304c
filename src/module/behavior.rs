//! User-facing module traits and the internal behaviour glue.
//!
//! The six base variants of the facade (no/single/multi input crossed with
//! single/multi output) collapse into three user traits — the output side is
//! absorbed by [`OutputSet`] ranging over tuples — plus one internal
//! [`Behavior`] trait that tells the runtime how to describe and drive each
//! kind.

use crate::error::{Error, LifecycleError};
use crate::message::Message;
use crate::module::command::CommandFrame;
use crate::module::loops;
use crate::module::metadata::ModuleContext;
use crate::module::sets::{OutputSet, SecondaryInputs};
use crate::module::DataRuntime;
use crate::header::HEADER_LEN;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// A module that generates data without consuming any: periodic when the
/// configuration carries a period, free-running otherwise.
pub trait SourceModule: Send + 'static {
    /// Output tuple produced per invocation.
    type Outputs: OutputSet;

    /// Ids of the command types this module accepts on its CMD mailbox.
    const COMMAND_IDS: &'static [u32] = &[];

    /// Frame bound over the accepted command types, for sizing the CMD
    /// mailbox. Use [`max_frame_len!`](crate::max_frame_len) when commands
    /// are declared.
    const COMMAND_FRAME_LEN: usize = HEADER_LEN;

    /// Produce one set of outputs. Invoked once per period or as fast as
    /// possible; must not block indefinitely.
    fn process(&mut self, ctx: &ModuleContext) -> Self::Outputs;

    /// Called first inside `start`, before any mailbox opens.
    fn on_init(&mut self) {}

    /// Called once the module's mailboxes are open, before threads spawn.
    fn on_start(&mut self) {}

    /// Called first inside `stop`, while everything still runs.
    fn on_stop(&mut self) {}

    /// Called last inside `stop`, after all threads joined.
    fn on_cleanup(&mut self) {}

    /// Called from the command thread for each declared command received.
    fn on_command(&mut self, _cmd: &CommandFrame) {}
}

/// A module driven by a single continuous input.
pub trait PipelineModule: Send + 'static {
    /// The input type; arrivals drive `process`.
    type Input: Message;

    /// Output tuple produced per invocation; `()` for a pure sink.
    type Outputs: OutputSet;

    /// Ids of the command types this module accepts.
    const COMMAND_IDS: &'static [u32] = &[];

    /// Frame bound over the accepted command types.
    const COMMAND_FRAME_LEN: usize = HEADER_LEN;

    /// Process one arrival. Published outputs carry the input's timestamp.
    fn process(&mut self, input: &Self::Input, ctx: &ModuleContext) -> Self::Outputs;

    /// Called first inside `start`, before any mailbox opens.
    fn on_init(&mut self) {}

    /// Called once the module's mailboxes are open, before threads spawn.
    fn on_start(&mut self) {}

    /// Called first inside `stop`, while everything still runs.
    fn on_stop(&mut self) {}

    /// Called last inside `stop`, after all threads joined.
    fn on_cleanup(&mut self) {}

    /// Called from the command thread for each declared command received.
    fn on_command(&mut self, _cmd: &CommandFrame) {}
}

/// A module fusing one primary input with timestamp-sampled secondaries.
pub trait FusionModule: Send + 'static {
    /// The primary input; its arrivals drive `process` and define every
    /// output's timestamp.
    type Primary: Message;

    /// Secondary inputs, sampled from history at the primary's timestamp.
    type Secondaries: SecondaryInputs;

    /// Output tuple produced per invocation; `()` for a pure sink.
    type Outputs: OutputSet;

    /// Ids of the command types this module accepts.
    const COMMAND_IDS: &'static [u32] = &[];

    /// Frame bound over the accepted command types.
    const COMMAND_FRAME_LEN: usize = HEADER_LEN;

    /// Process one synchronized set of inputs.
    fn process(
        &mut self,
        primary: &Self::Primary,
        secondaries: <Self::Secondaries as SecondaryInputs>::Values,
        ctx: &ModuleContext,
    ) -> Self::Outputs;

    /// Called first inside `start`, before any mailbox opens.
    fn on_init(&mut self) {}

    /// Called once the module's mailboxes are open, before threads spawn.
    fn on_start(&mut self) {}

    /// Called first inside `stop`, while everything still runs.
    fn on_stop(&mut self) {}

    /// Called last inside `stop`, after all threads joined.
    fn on_cleanup(&mut self) {}

    /// Called from the command thread for each declared command received.
    fn on_command(&mut self, _cmd: &CommandFrame) {}
}

mod private {
    pub trait Sealed {}
}

/// One declared input or output flow.
#[derive(Debug, Copy, Clone)]
pub(crate) struct IoType {
    pub message_id: u32,
    pub max_frame_len: usize,
}

/// Runtime description of a module's I/O shape; what the facade pattern
/// matches on instead of generating six base implementations.
#[doc(hidden)]
#[derive(Debug)]
pub struct IoDescriptor {
    pub(crate) inputs: Vec<IoType>,
    pub(crate) outputs: Vec<IoType>,
    pub(crate) command_ids: &'static [u32],
    pub(crate) command_frame_len: usize,
}

impl IoDescriptor {
    /// The type id anchoring the module's identity base address: output 0
    /// for producers, the primary input for pure sinks.
    pub(crate) fn identity_type_id(&self) -> Option<u32> {
        self.outputs
            .first()
            .or_else(|| self.inputs.first())
            .map(|io| io.message_id)
    }
}

/// Internal glue binding a user trait to the module runtime. Implemented
/// only by [`Source`], [`Pipeline`] and [`Fusion`].
pub trait Behavior: private::Sealed + Send + 'static {
    /// The user's module type.
    type User: Send + 'static;

    #[doc(hidden)]
    fn descriptor() -> IoDescriptor;

    #[doc(hidden)]
    fn on_init(user: &mut Self::User);

    #[doc(hidden)]
    fn on_start(user: &mut Self::User);

    #[doc(hidden)]
    fn on_stop(user: &mut Self::User);

    #[doc(hidden)]
    fn on_cleanup(user: &mut Self::User);

    #[doc(hidden)]
    fn on_command(user: &mut Self::User, cmd: &CommandFrame);

    /// Spawn the driving data thread (first in the returned list) plus any
    /// secondary receive threads.
    #[doc(hidden)]
    fn spawn_data_threads(
        user: Arc<Mutex<Self::User>>,
        rt: DataRuntime,
    ) -> Result<Vec<JoinHandle<()>>, Error>;
}

/// Marker selecting the no-input behaviour for `M: SourceModule`.
pub struct Source<M>(PhantomData<M>);

/// Marker selecting the single-input behaviour for `M: PipelineModule`.
pub struct Pipeline<M>(PhantomData<M>);

/// Marker selecting the multi-input behaviour for `M: FusionModule`.
pub struct Fusion<M>(PhantomData<M>);

impl<M> private::Sealed for Source<M> {}
impl<M> private::Sealed for Pipeline<M> {}
impl<M> private::Sealed for Fusion<M> {}

fn spawn_driving_thread(
    thread_name: String,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, Error> {
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(body)
        .map_err(|_| Error::Lifecycle(LifecycleError::ThreadSpawn))
}

impl<M: SourceModule> Behavior for Source<M> {
    type User = M;

    fn descriptor() -> IoDescriptor {
        IoDescriptor {
            inputs: Vec::new(),
            outputs: output_types::<M::Outputs>(),
            command_ids: M::COMMAND_IDS,
            command_frame_len: M::COMMAND_FRAME_LEN,
        }
    }

    fn on_init(user: &mut M) {
        user.on_init();
    }

    fn on_start(user: &mut M) {
        user.on_start();
    }

    fn on_stop(user: &mut M) {
        user.on_stop();
    }

    fn on_cleanup(user: &mut M) {
        user.on_cleanup();
    }

    fn on_command(user: &mut M, cmd: &CommandFrame) {
        user.on_command(cmd);
    }

    fn spawn_data_threads(
        user: Arc<Mutex<M>>,
        rt: DataRuntime,
    ) -> Result<Vec<JoinHandle<()>>, Error> {
        let settings = rt.settings.clone();
        let name = rt.name.clone();
        let thread_name = format!("{}-data", rt.name);

        let handle = spawn_driving_thread(thread_name, move || {
            settings.apply(&name);

            loops::source_loop::<M>(user, rt);
        })?;

        Ok(vec![handle])
    }
}

impl<M: PipelineModule> Behavior for Pipeline<M> {
    type User = M;

    fn descriptor() -> IoDescriptor {
        IoDescriptor {
            inputs: vec![IoType {
                message_id: <M::Input as Message>::MESSAGE_ID,
                max_frame_len: <M::Input as Message>::MAX_FRAME_LEN,
            }],
            outputs: output_types::<M::Outputs>(),
            command_ids: M::COMMAND_IDS,
            command_frame_len: M::COMMAND_FRAME_LEN,
        }
    }

    fn on_init(user: &mut M) {
        user.on_init();
    }

    fn on_start(user: &mut M) {
        user.on_start();
    }

    fn on_stop(user: &mut M) {
        user.on_stop();
    }

    fn on_cleanup(user: &mut M) {
        user.on_cleanup();
    }

    fn on_command(user: &mut M, cmd: &CommandFrame) {
        user.on_command(cmd);
    }

    fn spawn_data_threads(
        user: Arc<Mutex<M>>,
        rt: DataRuntime,
    ) -> Result<Vec<JoinHandle<()>>, Error> {
        let settings = rt.settings.clone();
        let name = rt.name.clone();
        let thread_name = format!("{}-data", rt.name);

        let handle = spawn_driving_thread(thread_name, move || {
            settings.apply(&name);

            loops::pipeline_loop::<M>(user, rt);
        })?;

        Ok(vec![handle])
    }
}

impl<M: FusionModule> Behavior for Fusion<M> {
    type User = M;

    fn descriptor() -> IoDescriptor {
        let mut inputs = vec![IoType {
            message_id: <M::Primary as Message>::MESSAGE_ID,
            max_frame_len: <M::Primary as Message>::MAX_FRAME_LEN,
        }];

        let ids = <M::Secondaries as SecondaryInputs>::TYPE_IDS;
        let lens = <M::Secondaries as SecondaryInputs>::FRAME_LENS;

        inputs.extend(ids.iter().zip(lens).map(|(&message_id, &max_frame_len)| {
            IoType {
                message_id,
                max_frame_len,
            }
        }));

        IoDescriptor {
            inputs,
            outputs: output_types::<M::Outputs>(),
            command_ids: M::COMMAND_IDS,
            command_frame_len: M::COMMAND_FRAME_LEN,
        }
    }

    fn on_init(user: &mut M) {
        user.on_init();
    }

    fn on_start(user: &mut M) {
        user.on_start();
    }

    fn on_stop(user: &mut M) {
        user.on_stop();
    }

    fn on_cleanup(user: &mut M) {
        user.on_cleanup();
    }

    fn on_command(user: &mut M, cmd: &CommandFrame) {
        user.on_command(cmd);
    }

    fn spawn_data_threads(
        user: Arc<Mutex<M>>,
        rt: DataRuntime,
    ) -> Result<Vec<JoinHandle<()>>, Error> {
        let histories = Arc::new(<M::Secondaries as SecondaryInputs>::make_histories(
            rt.config.history_capacity,
        ));

        let secondary_handles = <M::Secondaries as SecondaryInputs>::spawn_receivers(
            &rt.name,
            &histories,
            &rt.data_mailboxes,
            &rt.running,
            &rt.settings,
        )?;

        let settings = rt.settings.clone();
        let name = rt.name.clone();
        let thread_name = format!("{}-data", rt.name);

        let driving = spawn_driving_thread(thread_name, move || {
            settings.apply(&name);

            loops::fusion_loop::<M>(user, rt, histories);
        })?;

        // Driving thread first: stop joins it before the secondaries.
        let mut handles = vec![driving];
        handles.extend(secondary_handles);

        Ok(handles)
    }
}

fn output_types<O: OutputSet>() -> Vec<IoType> {
    O::TYPE_IDS
        .iter()
        .zip(O::FRAME_LENS)
        .map(|(&message_id, &max_frame_len)| IoType {
            message_id,
            max_frame_len,
        })
        .collect()
}
