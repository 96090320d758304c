//! Multi-output fan-out: two consumers each attach to exactly one output of
//! a two-output producer.

use commrat::{Module, ModuleConfig, ModuleContext, PipelineModule, SourceModule};
use commrat_wire::CommratWire;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct TemperatureData {
    millideg_c: i32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct PressureData {
    decipascal: u32,
}

commrat::message_registry! {
    pub struct FanoutMessages {
        data TemperatureData,
        data PressureData,
    }
}

struct EnvironmentSensor {
    tick: i32,
}

impl SourceModule for EnvironmentSensor {
    type Outputs = (TemperatureData, PressureData);

    fn process(&mut self, _ctx: &ModuleContext) -> Self::Outputs {
        self.tick += 1;

        (
            TemperatureData {
                millideg_c: 21_000 + self.tick,
            },
            PressureData {
                decipascal: 1_013_250 + self.tick as u32,
            },
        )
    }
}

#[derive(Default)]
struct TemperatureSink {
    seen: Arc<AtomicU32>,
}

impl PipelineModule for TemperatureSink {
    type Input = TemperatureData;
    type Outputs = ();

    fn process(&mut self, input: &TemperatureData, _ctx: &ModuleContext) -> Self::Outputs {
        assert!(input.millideg_c > 21_000);

        self.seen.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct PressureSink {
    seen: Arc<AtomicU32>,
}

impl PipelineModule for PressureSink {
    type Input = PressureData;
    type Outputs = ();

    fn process(&mut self, input: &PressureData, _ctx: &ModuleContext) -> Self::Outputs {
        assert!(input.decipascal > 1_013_250);

        self.seen.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn each_consumer_gets_only_its_output() {
    let _ = env_logger::builder().is_test(true).try_init();

    let producer_config =
        ModuleConfig::new("env-sensor", 6, 0).with_period(Duration::from_millis(50));

    let mut producer = Module::source(EnvironmentSensor { tick: 0 }, producer_config).unwrap();

    let temp_sink = TemperatureSink::default();
    let temp_seen = Arc::clone(&temp_sink.seen);

    let mut temp_consumer = Module::pipeline(
        temp_sink,
        ModuleConfig::new("temp-sink", 6, 1).with_input(6, 0, 0),
    )
    .unwrap();

    let pressure_sink = PressureSink::default();
    let pressure_seen = Arc::clone(&pressure_sink.seen);

    let mut pressure_consumer = Module::pipeline(
        pressure_sink,
        ModuleConfig::new("pressure-sink", 6, 2).with_input(6, 0, 0),
    )
    .unwrap();

    producer.start().unwrap();
    temp_consumer.start().unwrap();
    pressure_consumer.start().unwrap();

    std::thread::sleep(Duration::from_millis(700));

    // One subscriber on each independent output list.
    assert_eq!(producer.subscriber_counts(), vec![1, 1]);

    temp_consumer.stop().unwrap();
    pressure_consumer.stop().unwrap();
    producer.stop().unwrap();

    let temps = temp_seen.load(Ordering::SeqCst);
    let pressures = pressure_seen.load(Ordering::SeqCst);

    // ~14 periods elapsed; allow for the subscription race at the front.
    assert!((5..=20).contains(&temps), "temperature messages: {temps}");
    assert!(
        (5..=20).contains(&pressures),
        "pressure messages: {pressures}"
    );
}

#[test]
fn duplicate_output_bases_rejected() {
    // Two outputs of distinct types never collide, but per-output overrides
    // pointing both at the same (system, instance) with equal type ids do.
    // Here the types differ, so overriding both onto one identity is fine;
    // the duplicate check triggers on identical types instead.
    #[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
    struct Twin {
        v: u8,
    }

    commrat::message_registry! {
        pub struct TwinMessages {
            data Twin,
        }
    }

    struct TwinSource;

    impl SourceModule for TwinSource {
        type Outputs = (Twin, Twin);

        fn process(&mut self, _ctx: &ModuleContext) -> Self::Outputs {
            (Twin { v: 0 }, Twin { v: 1 })
        }
    }

    // Without per-output overrides both outputs land on the same base.
    let err = Module::source(TwinSource, ModuleConfig::new("twin", 7, 0)).unwrap_err();

    assert!(matches!(
        err,
        commrat::Error::Config(commrat::error::ConfigError::DuplicateOutputAddress { .. })
    ));

    // Distinct per-output instance ids resolve the collision.
    let mut config = ModuleConfig::new("twin", 7, 0);

    config.outputs.push(commrat::OutputAddress {
        system_id: 7,
        instance_id: 0,
    });
    config.outputs.push(commrat::OutputAddress {
        system_id: 7,
        instance_id: 1,
    });

    let mut module = Module::source(TwinSource, config).unwrap();

    module.start().unwrap();
    module.stop().unwrap();
}
