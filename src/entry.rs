//! Process-level wrapper: signals, config loading, run loop.
//!
//! A module binary's `main` reduces to building a [`Module`] from a
//! [`ModuleConfig`](crate::ModuleConfig) and handing it to
//! [`module_main`]; signal handling, the shutdown poll loop and exit codes
//! are handled here.
//!
//! [`Module`]: crate::Module

use crate::config::ModuleConfig;
use crate::error::Error;
use crate::module::ModuleHandle;
use crate::time;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Once;
use std::time::Duration;

/// How often the run loop polls the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const SHUTDOWN_NONE: u8 = 0;
const SHUTDOWN_REQUESTED: u8 = 1;
const SHUTDOWN_SIGNALLED: u8 = 2;

static SHUTDOWN: AtomicU8 = AtomicU8::new(SHUTDOWN_NONE);

static INSTALL_HANDLER: Once = Once::new();

/// Request a clean shutdown of [`run`] from anywhere in the process. The
/// module stops and the process exits 0.
pub fn request_shutdown() {
    let _ = SHUTDOWN.compare_exchange(
        SHUTDOWN_NONE,
        SHUTDOWN_REQUESTED,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
}

fn install_signal_handler() {
    INSTALL_HANDLER.call_once(|| {
        let result = ctrlc::set_handler(|| {
            let _ = SHUTDOWN.compare_exchange(
                SHUTDOWN_NONE,
                SHUTDOWN_SIGNALLED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        });

        if let Err(e) = result {
            log::warn!("could not install signal handler: {e}");
        }
    });
}

/// Start `module`, sleep-poll the shutdown flag, stop it on shutdown.
///
/// Returns the process exit code: 130 when a signal interrupted the run, 0
/// after [`request_shutdown`], 1 when `start` or `stop` failed.
pub fn run(module: &mut dyn ModuleHandle) -> u8 {
    install_signal_handler();

    SHUTDOWN.store(SHUTDOWN_NONE, Ordering::SeqCst);

    log::info!("starting {}", module.name());

    if let Err(e) = module.start() {
        log::error!("{} failed to start: {e}", module.name());

        return 1;
    }

    log::info!("{} running (Ctrl+C to stop)", module.name());

    while SHUTDOWN.load(Ordering::SeqCst) == SHUTDOWN_NONE {
        time::sleep(POLL_INTERVAL);
    }

    log::info!("stopping {}", module.name());

    let reason = SHUTDOWN.load(Ordering::SeqCst);

    if let Err(e) = module.stop() {
        log::error!("{} failed to stop: {e}", module.name());

        return 1;
    }

    log::info!("{} stopped", module.name());

    if reason == SHUTDOWN_SIGNALLED {
        130
    } else {
        0
    }
}

/// Resolve the configuration for a module binary from its command line.
///
/// No argument: `default_config`. One argument: a JSON config file.
/// `--help`: prints the field listing and returns `None`.
pub fn resolve_config(
    default_config: ModuleConfig,
) -> Result<Option<ModuleConfig>, Error> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [] => Ok(Some(default_config)),
        [flag] if flag == "--help" || flag == "-h" => {
            println!("{}", ModuleConfig::help_text());

            Ok(None)
        }
        [path] => ModuleConfig::from_json_file(path).map(Some),
        _ => Err(crate::error::ConfigError::File(
            "usage: <executable> [config.json]".to_string(),
        )
        .into()),
    }
}

/// Complete `main` body for a module binary: resolve the configuration,
/// build the module, run it until shutdown.
pub fn module_main<H: ModuleHandle>(
    default_config: ModuleConfig,
    build: impl FnOnce(ModuleConfig) -> Result<H, Error>,
) -> ExitCode {
    let config = match resolve_config(default_config) {
        Ok(Some(config)) => config,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");

            return ExitCode::FAILURE;
        }
    };

    let mut module = match build(config) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("ERROR: {e}");

            return ExitCode::FAILURE;
        }
    };

    ExitCode::from(run(&mut module))
}
