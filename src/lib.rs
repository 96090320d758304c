//! A real-time message-passing framework for modular applications.
//!
//! CommRaT wires independently scheduled *modules* together over logical
//! *mailboxes*: bounded FIFOs addressed by a 32-bit id. Modules declare
//! their inputs and outputs statically; the framework opens their
//! mailboxes, runs their threads, establishes subscriptions, and carries a
//! header timestamp end-to-end so consumers can align streams of differing
//! rates.
//!
//! A module is one of three shapes:
//!
//! - [`SourceModule`] — no data inputs; runs periodically (configured
//!   period) or free-running.
//! - [`PipelineModule`] — one continuous input whose arrivals drive
//!   `process`.
//! - [`FusionModule`] — a primary input drives `process`; secondary inputs
//!   are buffered by timestamp and sampled at the primary's time.
//!
//! Outputs are tuples of message types; each output has its own subscriber
//! list, so a consumer attaches to exactly the flow it wants.
//!
//! ```no_run
//! use commrat::{Module, ModuleConfig, ModuleContext, SourceModule};
//! use commrat_wire::CommratWire;
//! use std::time::Duration;
//!
//! #[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
//! struct CounterMsg {
//!     count: u32,
//! }
//!
//! commrat::message_registry! {
//!     pub struct AppMessages {
//!         data CounterMsg,
//!     }
//! }
//!
//! struct Counter {
//!     count: u32,
//! }
//!
//! impl SourceModule for Counter {
//!     type Outputs = (CounterMsg,);
//!
//!     fn process(&mut self, _ctx: &ModuleContext) -> Self::Outputs {
//!         let out = CounterMsg { count: self.count };
//!         self.count += 1;
//!         (out,)
//!     }
//! }
//!
//! let config = ModuleConfig::new("counter", 1, 0).with_period(Duration::from_millis(100));
//! let mut module = Module::source(Counter { count: 0 }, config).unwrap();
//!
//! module.start().unwrap();
//! // ...
//! module.stop().unwrap();
//! ```

#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

pub mod address;
pub mod config;
pub mod entry;
pub mod error;
pub mod header;
pub mod mailbox;
pub mod message;
pub mod module;
pub mod ring;
pub mod system_messages;
pub mod time;
pub mod transport;

pub use address::{Address, AddressError, MailboxKind};
pub use config::{InputSource, ModuleConfig, OutputAddress};
pub use error::Error;
pub use header::{Header, HeaderFlags};
pub use mailbox::{Mailbox, MailboxConfig};
pub use message::{Frame, Message, Registry};
pub use module::{
    CommandFrame, FusionModule, InputMetadata, Module, ModuleContext, ModuleHandle, ModuleState,
    OutputSet, PipelineModule, SecondaryInputs, SourceModule, SubscriptionState,
};
pub use ring::{Entry, InterpolationMode, TimestampedRingBuffer};
pub use system_messages::{
    SubscribeReply, SubscribeRequest, UnsubscribeReply, UnsubscribeRequest,
};
pub use time::{TimeSource, Timestamp};
