//! A periodic counter producer and a logging consumer in one process.
//!
//! Run with:
//!
//! ```bash
//! RUST_LOG=info cargo run --example counter
//! ```
//!
//! An optional argument loads the producer's configuration from a JSON
//! file; `--help` prints the accepted fields. Stop with Ctrl+C.

use commrat::{entry, Module, ModuleConfig, ModuleContext, PipelineModule, SourceModule};
use commrat_wire::CommratWire;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct CounterMsg {
    count: u32,
}

commrat::message_registry! {
    pub struct CounterMessages {
        data CounterMsg,
    }
}

struct CounterProducer {
    count: u32,
}

impl SourceModule for CounterProducer {
    type Outputs = (CounterMsg,);

    fn process(&mut self, _ctx: &ModuleContext) -> Self::Outputs {
        let out = CounterMsg { count: self.count };

        self.count += 1;

        (out,)
    }
}

struct CounterLogger;

impl PipelineModule for CounterLogger {
    type Input = CounterMsg;
    type Outputs = ();

    fn process(&mut self, input: &CounterMsg, ctx: &ModuleContext) -> Self::Outputs {
        log::info!(
            "count {} at t={}ns",
            input.count,
            ctx.input_timestamp(0).unwrap_or(0)
        );
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let consumer_config = ModuleConfig::new("counter-logger", 1, 1).with_input(1, 0, 0);

    let mut consumer = match Module::pipeline(CounterLogger, consumer_config) {
        Ok(consumer) => consumer,
        Err(e) => {
            eprintln!("ERROR: {e}");

            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = consumer.start() {
        eprintln!("ERROR: {e}");

        return ExitCode::FAILURE;
    }

    let default_config =
        ModuleConfig::new("counter-producer", 1, 0).with_period(Duration::from_millis(100));

    let code = entry::module_main(default_config, |config| {
        Module::source(CounterProducer { count: 0 }, config)
    });

    let _ = consumer.stop();

    code
}
