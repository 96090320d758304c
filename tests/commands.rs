//! User command dispatch through the CMD mailbox, and the process entry
//! helpers.

use commrat::{
    entry, max_frame_len, CommandFrame, Mailbox, MailboxConfig, Message, Module, ModuleConfig,
    ModuleContext, SourceModule,
};
use commrat_wire::CommratWire;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct RateMsg {
    hz: u32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct SetOffsetCmd {
    offset: i32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct UnrelatedCmd {
    ignored: u8,
}

commrat::message_registry! {
    pub struct CommandMessages {
        data RateMsg,
        command SetOffsetCmd,
        command UnrelatedCmd,
    }
}

#[derive(Default)]
struct RateSource {
    offset: Arc<AtomicI32>,
    commands_seen: Arc<AtomicU32>,
}

impl SourceModule for RateSource {
    type Outputs = (RateMsg,);

    const COMMAND_IDS: &'static [u32] = &[SetOffsetCmd::MESSAGE_ID];

    const COMMAND_FRAME_LEN: usize = max_frame_len!(SetOffsetCmd);

    fn process(&mut self, _ctx: &ModuleContext) -> Self::Outputs {
        (RateMsg {
            hz: (100 + self.offset.load(Ordering::SeqCst)) as u32,
        },)
    }

    fn on_command(&mut self, cmd: &CommandFrame) {
        if let Ok(set) = cmd.decode::<SetOffsetCmd>() {
            self.offset.store(set.offset, Ordering::SeqCst);
            self.commands_seen.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn declared_commands_dispatch_to_on_command() {
    let _ = env_logger::builder().is_test(true).try_init();

    let source = RateSource::default();
    let offset = Arc::clone(&source.offset);
    let seen = Arc::clone(&source.commands_seen);

    let config = ModuleConfig::new("rate-source", 10, 0).with_period(Duration::from_millis(50));

    let mut module = Module::source(source, config).unwrap();

    module.start().unwrap();

    // A free-standing mailbox plays the operator console.
    let console = Mailbox::new(MailboxConfig {
        id: commrat::Address::from_raw(0xfff0_0100),
        capacity_slots: 4,
        max_frame_bytes: max_frame_len!(SetOffsetCmd, UnrelatedCmd),
        priority: 0,
        realtime: false,
        overflow: commrat::transport::OverflowPolicy::DropOldest,
        name: "console".to_string(),
    });

    console.start().unwrap();

    console
        .send(&SetOffsetCmd { offset: 42 }, 0, module.command_address())
        .unwrap();

    // Undeclared command types are silently dropped.
    console
        .send(&UnrelatedCmd { ignored: 7 }, 0, module.command_address())
        .unwrap();

    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(offset.load(Ordering::SeqCst), 42);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    console.stop();
    module.stop().unwrap();
}

#[test]
fn entry_run_returns_zero_on_requested_shutdown() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = ModuleConfig::new("entry-source", 11, 0).with_period(Duration::from_millis(50));

    let mut module = Module::source(RateSource::default(), config).unwrap();

    let requester = std::thread::spawn(|| {
        std::thread::sleep(Duration::from_millis(300));

        entry::request_shutdown();
    });

    let code = entry::run(&mut module);

    requester.join().unwrap();

    assert_eq!(code, 0);
}
