//! Three producers of differing rates fused by a primary-driven consumer.
//!
//! Run with:
//!
//! ```bash
//! RUST_LOG=info cargo run --example fusion
//! ```

use commrat::{entry, FusionModule, Module, ModuleConfig, ModuleContext, SourceModule};
use commrat_wire::CommratWire;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct ImuData {
    accel_mm_s2: i32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct GpsData {
    microdeg_lat: i32,
    microdeg_lon: i32,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, CommratWire)]
struct PoseEstimate {
    microdeg_lat: i32,
    microdeg_lon: i32,
    accel_mm_s2: i32,
}

commrat::message_registry! {
    pub struct FusionDemoMessages {
        data ImuData,
        data GpsData,
        data PoseEstimate,
    }
}

struct Imu {
    tick: i32,
}

impl SourceModule for Imu {
    type Outputs = (ImuData,);

    fn process(&mut self, _ctx: &ModuleContext) -> Self::Outputs {
        self.tick += 1;

        (ImuData {
            accel_mm_s2: 9_810 + (self.tick % 7),
        },)
    }
}

struct Gps;

impl SourceModule for Gps {
    type Outputs = (GpsData,);

    fn process(&mut self, _ctx: &ModuleContext) -> Self::Outputs {
        (GpsData {
            microdeg_lat: 52_520_008,
            microdeg_lon: 13_404_954,
        },)
    }
}

struct PoseFuser;

impl FusionModule for PoseFuser {
    type Primary = ImuData;
    type Secondaries = (GpsData,);
    type Outputs = (PoseEstimate,);

    fn process(
        &mut self,
        primary: &ImuData,
        (gps,): (GpsData,),
        ctx: &ModuleContext,
    ) -> Self::Outputs {
        log::info!(
            "pose at t={}ns (gps age {}ns)",
            ctx.input_timestamp(0).unwrap_or(0),
            ctx.input_timestamp(0)
                .unwrap_or(0)
                .abs_diff(ctx.input_timestamp(1).unwrap_or(0)),
        );

        (PoseEstimate {
            microdeg_lat: gps.microdeg_lat,
            microdeg_lon: gps.microdeg_lon,
            accel_mm_s2: primary.accel_mm_s2,
        },)
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let mut imu = match Module::source(
        Imu { tick: 0 },
        ModuleConfig::new("imu", 2, 0).with_period(Duration::from_millis(10)),
    ) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("ERROR: {e}");

            return ExitCode::FAILURE;
        }
    };

    let mut gps = match Module::source(
        Gps,
        ModuleConfig::new("gps", 2, 1).with_period(Duration::from_millis(100)),
    ) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("ERROR: {e}");

            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = imu.start().and_then(|()| gps.start()) {
        eprintln!("ERROR: {e}");

        return ExitCode::FAILURE;
    }

    let fuser_config = ModuleConfig::new("pose-fuser", 2, 2)
        .with_input(2, 0, 0)
        .with_input(2, 1, 1)
        .with_sync_tolerance(Duration::from_millis(150));

    let code = entry::module_main(fuser_config, |config| Module::fusion(PoseFuser, config));

    let _ = gps.stop();
    let _ = imu.stop();

    code
}
