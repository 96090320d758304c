//! The module facade: lifecycle, thread orchestration, and wiring.

pub mod behavior;
pub mod command;
pub(crate) mod loops;
pub(crate) mod mailbox_set;
pub mod metadata;
#[doc(hidden)]
pub mod publish;
pub mod sets;
pub mod subscription;
pub(crate) mod work;

pub use behavior::{
    Behavior, Fusion, FusionModule, Pipeline, PipelineModule, Source, SourceModule,
};
pub use command::CommandFrame;
pub use metadata::{InputMetadata, ModuleContext};
pub use sets::{OutputSet, SecondaryInputs};
pub use subscription::SubscriptionState;

use crate::address::{Address, MailboxKind};
use crate::config::ModuleConfig;
use crate::error::{ConfigError, Error, LifecycleError};
use crate::mailbox::{Mailbox, MailboxConfig};
use crate::module::behavior::IoDescriptor;
use crate::module::mailbox_set::MailboxSet;
use crate::module::publish::{Publisher, SubscriberLists};
use crate::module::subscription::Subscriptions;
use crate::module::work::WorkThread;
use crate::transport::OverflowPolicy;
use atomic_enum::atomic_enum;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Settle time between thread spawning and the first subscription send, so
/// freshly spawned receive loops are parked in their mailboxes.
const THREAD_SETTLE: Duration = Duration::from_millis(10);

/// Lifecycle states of a module.
#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum ModuleState {
    /// Built, nothing opened yet.
    Constructed,
    /// Mailboxes open, threads not yet live (transient inside `start`).
    Initialized,
    /// Fully running.
    Started,
    /// Stopped; `start` runs the module again from scratch.
    Stopped,
}

/// Scheduling applied to every thread a module spawns.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct ThreadSettings {
    pub(crate) priority: u8,
    pub(crate) realtime: bool,
}

impl ThreadSettings {
    pub(crate) fn apply(&self, name: &str) {
        if !self.realtime {
            return;
        }

        let Ok(value) = thread_priority::ThreadPriorityValue::try_from(self.priority) else {
            log::warn!("[{name}] thread priority {} out of range", self.priority);
            return;
        };

        if thread_priority::set_current_thread_priority(
            thread_priority::ThreadPriority::Crossplatform(value),
        )
        .is_err()
        {
            log::warn!(
                "[{name}] failed to apply realtime priority {}",
                self.priority
            );
        }
    }
}

/// Everything a driving data thread needs, bundled for [`Behavior`].
#[doc(hidden)]
pub struct DataRuntime {
    pub(crate) name: String,
    pub(crate) config: ModuleConfig,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) publisher: Publisher,
    pub(crate) data_mailboxes: Vec<Mailbox>,
    pub(crate) settings: ThreadSettings,
}

/// Threads spawned by `start`, in join order: work, command, data.
type SpawnedThreads = (
    Vec<JoinHandle<()>>,
    Option<JoinHandle<()>>,
    Vec<JoinHandle<()>>,
);

/// Either the spawned threads, or the error plus whatever already spawned
/// and must be joined during rollback.
type SpawnResult = Result<SpawnedThreads, (Error, Vec<JoinHandle<()>>, Option<JoinHandle<()>>, Vec<JoinHandle<()>>)>;

struct Runtime {
    sets: Vec<MailboxSet>,
    data_mailboxes: Vec<Mailbox>,
    data_threads: Vec<JoinHandle<()>>,
    work_threads: Vec<JoinHandle<()>>,
    command_thread: Option<JoinHandle<()>>,
}

/// A fully wired module instance.
///
/// Construct with [`Module::source`], [`Module::pipeline`] or
/// [`Module::fusion`], then drive it through [`start`](Self::start) and
/// [`stop`](Self::stop). `start` after `stop` runs the module again from
/// scratch: every mailbox is re-bound and every thread respawned.
pub struct Module<B: Behavior> {
    config: ModuleConfig,
    descriptor: IoDescriptor,
    identity_base: Address,
    output_bases: Vec<Address>,
    user: Arc<Mutex<B::User>>,
    state: AtomicModuleState,
    running: Arc<AtomicBool>,
    lists: Arc<SubscriberLists>,
    subscriptions: Arc<Subscriptions>,
    runtime: Option<Runtime>,
}

impl<B: Behavior> std::fmt::Debug for Module<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("config", &self.config)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<M: SourceModule> Module<Source<M>> {
    /// Wrap a [`SourceModule`]: no data inputs, periodic or free-running.
    pub fn source(user: M, config: ModuleConfig) -> Result<Self, Error> {
        Self::build(user, config)
    }
}

impl<M: PipelineModule> Module<Pipeline<M>> {
    /// Wrap a [`PipelineModule`]: one continuous input drives `process`.
    pub fn pipeline(user: M, config: ModuleConfig) -> Result<Self, Error> {
        Self::build(user, config)
    }
}

impl<M: FusionModule> Module<Fusion<M>> {
    /// Wrap a [`FusionModule`]: a primary input drives `process`,
    /// secondaries are sampled from history.
    pub fn fusion(user: M, config: ModuleConfig) -> Result<Self, Error> {
        Self::build(user, config)
    }
}

impl<B: Behavior> Module<B> {
    fn build(user: B::User, config: ModuleConfig) -> Result<Self, Error> {
        let descriptor = B::descriptor();

        config.validate(descriptor.inputs.len(), descriptor.outputs.len())?;

        let identity_type_id = descriptor
            .identity_type_id()
            .ok_or(Error::Config(ConfigError::MissingField("outputs")))?;

        // Every output's base must be distinct; two outputs of the same
        // type need per-output (system_id, instance_id) overrides.
        let mut output_bases = Vec::with_capacity(descriptor.outputs.len());

        for (index, output) in descriptor.outputs.iter().enumerate() {
            let (system_id, instance_id) = config.output_identity(index);

            let base = Address::base(
                (output.message_id & 0xffff) as u16,
                system_id,
                instance_id,
            )?;

            if let Some(first) = output_bases.iter().position(|b| *b == base) {
                return Err(ConfigError::DuplicateOutputAddress {
                    first,
                    second: index,
                }
                .into());
            }

            output_bases.push(base);
        }

        let identity_base = match output_bases.first() {
            Some(base) => *base,
            None => Address::base(
                (identity_type_id & 0xffff) as u16,
                config.system_id,
                config.instance_id,
            )?,
        };

        let num_outputs = descriptor.outputs.len();

        Ok(Self {
            config,
            descriptor,
            identity_base,
            output_bases,
            user: Arc::new(Mutex::new(user)),
            state: AtomicModuleState::new(ModuleState::Constructed),
            running: Arc::new(AtomicBool::new(false)),
            lists: Arc::new(SubscriberLists::new(num_outputs)),
            subscriptions: Arc::new(Subscriptions::default()),
            runtime: None,
        })
    }

    /// Module name from the configuration.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The configuration the module was built with.
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        self.state.load(Ordering::SeqCst)
    }

    /// Whether the module is started.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The identity base address anchoring this module's mailboxes.
    pub fn identity_base(&self) -> Address {
        self.identity_base
    }

    /// Address of the CMD mailbox commands should be sent to.
    pub fn command_address(&self) -> Address {
        self.identity_base
    }

    /// Current subscriber count per output.
    pub fn subscriber_counts(&self) -> Vec<usize> {
        self.lists.counts()
    }

    /// Consumer-side subscription state per configured source.
    pub fn subscription_states(&self) -> Vec<SubscriptionState> {
        self.subscriptions.snapshot()
    }

    fn with_user(&self, f: impl FnOnce(&mut B::User)) {
        let mut user = self.user.lock().unwrap_or_else(PoisonError::into_inner);

        f(&mut user);
    }

    fn settings(&self) -> ThreadSettings {
        ThreadSettings {
            priority: self.config.priority,
            realtime: self.config.realtime,
        }
    }

    /// Start the module: open mailboxes, spawn threads, subscribe to
    /// sources. On failure nothing stays half-open and the module remains
    /// in `Constructed`.
    pub fn start(&mut self) -> Result<(), Error> {
        let from_constructed = self.state.compare_exchange(
            ModuleState::Constructed,
            ModuleState::Initialized,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        if from_constructed.is_err()
            && self
                .state
                .compare_exchange(
                    ModuleState::Stopped,
                    ModuleState::Initialized,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_err()
        {
            return Err(LifecycleError::AlreadyStarted.into());
        }

        match self.start_inner() {
            Ok(()) => {
                self.state.store(ModuleState::Started, Ordering::SeqCst);

                log::info!("[{}] started at base {}", self.config.name, self.identity_base);

                Ok(())
            }
            Err(e) => {
                self.state.store(ModuleState::Constructed, Ordering::SeqCst);

                log::error!("[{}] start failed: {e}", self.config.name);

                Err(e)
            }
        }
    }

    fn start_inner(&mut self) -> Result<(), Error> {
        let name = self.config.name.clone();

        self.with_user(B::on_init);

        // Open every mailbox set, rolling back whatever opened on failure.
        let sets = self.initialize_sets()?;

        for (index, set) in sets.iter().enumerate() {
            if let Err(e) = set.start() {
                for opened in &sets[..index] {
                    opened.stop();
                }

                return Err(e);
            }
        }

        // DATA mailboxes, one per declared input, at the identity base.
        let mut data_mailboxes = Vec::with_capacity(self.descriptor.inputs.len());

        for (index, input) in self.descriptor.inputs.iter().enumerate() {
            let result = self
                .identity_base
                .with_kind(MailboxKind::Data(index as u8))
                .map_err(Error::from)
                .and_then(|id| {
                    let mailbox = Mailbox::new(MailboxConfig {
                        id,
                        capacity_slots: self.config.message_slots,
                        max_frame_bytes: input.max_frame_len,
                        priority: self.config.priority,
                        realtime: self.config.realtime,
                        overflow: OverflowPolicy::DropOldest,
                        name: format!("{name}_data{index}"),
                    });

                    mailbox.start().map(|()| mailbox)
                });

            match result {
                Ok(mailbox) => data_mailboxes.push(mailbox),
                Err(e) => {
                    for set in &sets {
                        set.stop();
                    }

                    for mailbox in &data_mailboxes {
                        mailbox.stop();
                    }

                    return Err(e);
                }
            }
        }

        self.lists.clear();
        self.running.store(true, Ordering::Release);
        self.with_user(B::on_start);

        match self.spawn_threads(&sets, &data_mailboxes) {
            Ok((work_threads, command_thread, data_threads)) => {
                crate::time::sleep(THREAD_SETTLE);

                let input_type_ids: Vec<u32> = self
                    .descriptor
                    .inputs
                    .iter()
                    .map(|io| io.message_id)
                    .collect();

                subscription::subscribe_to_sources(
                    &self.config,
                    &sets[0].work,
                    self.identity_base,
                    &input_type_ids,
                    &self.subscriptions,
                );

                self.runtime = Some(Runtime {
                    sets,
                    data_mailboxes,
                    data_threads,
                    work_threads,
                    command_thread,
                });

                Ok(())
            }
            Err((e, work_threads, command_thread, data_threads)) => {
                self.running.store(false, Ordering::Release);

                for set in &sets {
                    set.stop();
                }

                for mailbox in &data_mailboxes {
                    mailbox.stop();
                }

                for handle in data_threads
                    .into_iter()
                    .chain(work_threads)
                    .chain(command_thread)
                {
                    if handle.join().is_err() {
                        log::error!("[{name}] thread panicked during aborted start");
                    }
                }

                Err(e)
            }
        }
    }

    fn initialize_sets(&self) -> Result<Vec<MailboxSet>, Error> {
        let mut sets = Vec::new();

        if self.descriptor.outputs.is_empty() {
            // Pure sink: one CMD+WORK set at the identity base so commands
            // and subscription replies can reach the module.
            sets.push(MailboxSet::initialize(
                &self.config,
                self.identity_base,
                self.descriptor.command_frame_len,
                None,
                "main",
            )?);
        } else {
            for (index, output) in self.descriptor.outputs.iter().enumerate() {
                sets.push(MailboxSet::initialize(
                    &self.config,
                    self.output_bases[index],
                    self.descriptor.command_frame_len,
                    Some(output.max_frame_len),
                    &format!("out{index}"),
                )?);
            }
        }

        Ok(sets)
    }

    fn spawn_threads(
        &self,
        sets: &[MailboxSet],
        data_mailboxes: &[Mailbox],
    ) -> SpawnResult {
        let name = self.config.name.clone();
        let settings = self.settings();
        let mut work_threads = Vec::new();

        for (index, set) in sets.iter().enumerate() {
            let worker = WorkThread {
                name: name.clone(),
                output_index: index,
                work: set.work.clone(),
                lists: Arc::clone(&self.lists),
                subscriptions: Arc::clone(&self.subscriptions),
                running: Arc::clone(&self.running),
                period_ms: self.config.period_ms(),
            };

            let thread_settings = settings.clone();
            let thread_label = name.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("{name}-work{index}"))
                .spawn(move || {
                    thread_settings.apply(&thread_label);

                    worker.run();
                });

            match spawned {
                Ok(handle) => work_threads.push(handle),
                Err(_) => {
                    return Err((
                        LifecycleError::ThreadSpawn.into(),
                        work_threads,
                        None,
                        Vec::new(),
                    ))
                }
            }
        }

        let user = Arc::clone(&self.user);
        let handler: Arc<dyn Fn(&CommandFrame) + Send + Sync> = Arc::new(move |cmd| {
            let mut user = user.lock().unwrap_or_else(PoisonError::into_inner);

            B::on_command(&mut user, cmd);
        });

        let command = command::CommandThread {
            name: name.clone(),
            cmd: sets[0].cmd.clone(),
            command_ids: self.descriptor.command_ids,
            running: Arc::clone(&self.running),
            handler,
        };

        let thread_settings = settings.clone();
        let thread_label = name.clone();

        let command_thread = match std::thread::Builder::new()
            .name(format!("{name}-cmd"))
            .spawn(move || {
                thread_settings.apply(&thread_label);

                command.run();
            }) {
            Ok(handle) => Some(handle),
            Err(_) => {
                return Err((
                    LifecycleError::ThreadSpawn.into(),
                    work_threads,
                    None,
                    Vec::new(),
                ))
            }
        };

        let publisher = Publisher::new(
            name.clone(),
            sets.iter()
                .filter_map(|set| set.publish.clone())
                .collect(),
            Arc::clone(&self.lists),
        );

        let rt = DataRuntime {
            name: name.clone(),
            config: self.config.clone(),
            running: Arc::clone(&self.running),
            publisher,
            data_mailboxes: data_mailboxes.to_vec(),
            settings,
        };

        match B::spawn_data_threads(Arc::clone(&self.user), rt) {
            Ok(data_threads) => Ok((work_threads, command_thread, data_threads)),
            Err(e) => Err((e, work_threads, command_thread, Vec::new())),
        }
    }

    /// Stop the module: unsubscribe, wake and join every thread, close
    /// every mailbox. Completes in bounded time provided `process` returns.
    /// A second `stop` is a no-op; `stop` before any `start` is an error.
    pub fn stop(&mut self) -> Result<(), Error> {
        if let Err(current) = self.state.compare_exchange(
            ModuleState::Started,
            ModuleState::Stopped,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            return match current {
                ModuleState::Stopped => Ok(()),
                _ => Err(LifecycleError::NotStarted.into()),
            };
        }

        let name = self.config.name.clone();

        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };

        self.with_user(B::on_stop);

        let input_type_ids: Vec<u32> = self
            .descriptor
            .inputs
            .iter()
            .map(|io| io.message_id)
            .collect();

        subscription::unsubscribe_from_sources(
            &self.config,
            &runtime.sets[0].work,
            self.identity_base,
            &input_type_ids,
        );

        self.running.store(false, Ordering::Release);

        // Closing wakes every blocked receive; the joins below then
        // complete within one transport wakeup.
        for set in &runtime.sets {
            set.stop();
        }

        for mailbox in &runtime.data_mailboxes {
            mailbox.stop();
        }

        for handle in runtime
            .data_threads
            .into_iter()
            .chain(runtime.work_threads)
            .chain(runtime.command_thread)
        {
            if handle.join().is_err() {
                log::error!("[{name}] module thread panicked");
            }
        }

        self.with_user(B::on_cleanup);

        log::info!("[{name}] stopped");

        Ok(())
    }
}

impl<B: Behavior> Drop for Module<B> {
    fn drop(&mut self) {
        if self.state() == ModuleState::Started {
            let _ = self.stop();
        }
    }
}

/// Type-erased handle used by the process entry helpers.
pub trait ModuleHandle {
    /// Module name.
    fn name(&self) -> &str;

    /// Start the module.
    fn start(&mut self) -> Result<(), Error>;

    /// Stop the module.
    fn stop(&mut self) -> Result<(), Error>;
}

impl<B: Behavior> ModuleHandle for Module<B> {
    fn name(&self) -> &str {
        Module::name(self)
    }

    fn start(&mut self) -> Result<(), Error> {
        Module::start(self)
    }

    fn stop(&mut self) -> Result<(), Error> {
        Module::stop(self)
    }
}
