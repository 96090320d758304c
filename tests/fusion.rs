//! Multi-input synchronization: a fast primary fused with two slower
//! secondaries sampled by timestamp, with the primary's time propagated to
//! the fused output.

use commrat::{
    FusionModule, Module, ModuleConfig, ModuleContext, PipelineModule, SourceModule,
};
use commrat_wire::CommratWire;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct ImuData {
    sample: u32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct GpsData {
    microdeg_lat: i32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct LidarData {
    millimetres: u32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct FusedState {
    imu_sample: u32,
    microdeg_lat: i32,
    millimetres: u32,
}

commrat::message_registry! {
    pub struct FusionMessages {
        data ImuData,
        data GpsData,
        data LidarData,
        data FusedState,
    }
}

struct Imu {
    sample: u32,
}

impl SourceModule for Imu {
    type Outputs = (ImuData,);

    fn process(&mut self, _ctx: &ModuleContext) -> Self::Outputs {
        self.sample += 1;

        (ImuData {
            sample: self.sample,
        },)
    }
}

struct Gps;

impl SourceModule for Gps {
    type Outputs = (GpsData,);

    fn process(&mut self, _ctx: &ModuleContext) -> Self::Outputs {
        (GpsData {
            microdeg_lat: 52_520_008,
        },)
    }
}

struct Lidar;

impl SourceModule for Lidar {
    type Outputs = (LidarData,);

    fn process(&mut self, _ctx: &ModuleContext) -> Self::Outputs {
        (LidarData { millimetres: 1_500 },)
    }
}

#[derive(Default)]
struct Fuser {
    fused: Arc<AtomicU32>,
    primary_timestamps: Arc<Mutex<HashSet<u64>>>,
}

impl FusionModule for Fuser {
    type Primary = ImuData;
    type Secondaries = (GpsData, LidarData);
    type Outputs = (FusedState,);

    fn process(
        &mut self,
        primary: &ImuData,
        (gps, lidar): (GpsData, LidarData),
        ctx: &ModuleContext,
    ) -> Self::Outputs {
        // Every slot was refreshed for this invocation.
        assert!(ctx.is_input_valid(0));
        assert!(ctx.is_input_valid(1));
        assert!(ctx.is_input_valid(2));

        // Secondary samples sit within the sync window of the primary.
        let primary_ts = ctx.input_timestamp(0).unwrap();
        let tolerance = Duration::from_millis(100).as_nanos() as u64;

        assert!(ctx.input_timestamp(1).unwrap().abs_diff(primary_ts) <= tolerance);
        assert!(ctx.input_timestamp(2).unwrap().abs_diff(primary_ts) <= tolerance);

        self.fused.fetch_add(1, Ordering::SeqCst);
        self.primary_timestamps.lock().unwrap().insert(primary_ts);

        (FusedState {
            imu_sample: primary.sample,
            microdeg_lat: gps.microdeg_lat,
            millimetres: lidar.millimetres,
        },)
    }
}

#[derive(Default)]
struct FusedSink {
    received: Arc<AtomicU32>,
    header_timestamps: Arc<Mutex<Vec<u64>>>,
}

impl PipelineModule for FusedSink {
    type Input = FusedState;
    type Outputs = ();

    fn process(&mut self, input: &FusedState, ctx: &ModuleContext) -> Self::Outputs {
        assert!(input.imu_sample > 0);

        self.received.fetch_add(1, Ordering::SeqCst);

        if let Some(ts) = ctx.input_timestamp(0) {
            self.header_timestamps.lock().unwrap().push(ts);
        }
    }
}

#[test]
fn primary_driven_fusion() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut imu = Module::source(
        Imu { sample: 0 },
        ModuleConfig::new("imu", 8, 0).with_period(Duration::from_millis(10)),
    )
    .unwrap();

    let mut gps = Module::source(
        Gps,
        ModuleConfig::new("gps", 8, 1).with_period(Duration::from_millis(100)),
    )
    .unwrap();

    let mut lidar = Module::source(
        Lidar,
        ModuleConfig::new("lidar", 8, 2).with_period(Duration::from_millis(50)),
    )
    .unwrap();

    let fuser_state = Fuser::default();
    let fused_count = Arc::clone(&fuser_state.fused);
    let primary_timestamps = Arc::clone(&fuser_state.primary_timestamps);

    let fuser_config = ModuleConfig::new("fuser", 8, 3)
        .with_input(8, 0, 0)
        .with_input(8, 1, 1)
        .with_input(8, 2, 2)
        .with_sync_tolerance(Duration::from_millis(100));

    let mut fuser = Module::fusion(fuser_state, fuser_config).unwrap();

    let sink_state = FusedSink::default();
    let sink_count = Arc::clone(&sink_state.received);
    let sink_timestamps = Arc::clone(&sink_state.header_timestamps);

    let mut sink = Module::pipeline(
        sink_state,
        ModuleConfig::new("fused-sink", 8, 4).with_input(8, 3, 0),
    )
    .unwrap();

    gps.start().unwrap();
    lidar.start().unwrap();
    imu.start().unwrap();
    fuser.start().unwrap();
    sink.start().unwrap();

    std::thread::sleep(Duration::from_millis(1_200));

    sink.stop().unwrap();
    fuser.stop().unwrap();
    imu.stop().unwrap();
    lidar.stop().unwrap();
    gps.stop().unwrap();

    // Fusion runs at the primary's rate once every history has a sample:
    // ~120 primary arrivals, minus warmup before the first GPS fix.
    let fused = fused_count.load(Ordering::SeqCst);

    assert!(fused >= 40, "only {fused} fused iterations");

    // Every fused output the sink saw carries a primary timestamp.
    let sink_seen = sink_count.load(Ordering::SeqCst);

    assert!(sink_seen > 0, "no fused outputs reached the sink");

    let primaries = primary_timestamps.lock().unwrap();

    for ts in sink_timestamps.lock().unwrap().iter() {
        assert!(
            primaries.contains(ts),
            "fused output timestamp {ts} is not a primary timestamp"
        );
    }
}

#[test]
fn sync_miss_skips_iterations() {
    let _ = env_logger::builder().is_test(true).try_init();

    // No GPS or Lidar producers at all: every primary arrival misses.
    let mut imu = Module::source(
        Imu { sample: 0 },
        ModuleConfig::new("imu-lonely", 9, 0).with_period(Duration::from_millis(10)),
    )
    .unwrap();

    let fuser_state = Fuser::default();
    let fused_count = Arc::clone(&fuser_state.fused);

    let fuser_config = ModuleConfig::new("fuser-lonely", 9, 3)
        .with_input(9, 0, 0)
        .with_sync_tolerance(Duration::from_millis(50));

    let mut fuser = Module::fusion(fuser_state, fuser_config).unwrap();

    imu.start().unwrap();
    fuser.start().unwrap();

    std::thread::sleep(Duration::from_millis(400));

    fuser.stop().unwrap();
    imu.stop().unwrap();

    assert_eq!(fused_count.load(Ordering::SeqCst), 0);
}
