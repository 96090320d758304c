//! The driving data loops, one flavour per input mode.
//!
//! Timestamp rules: a loop with no data input stamps outputs with the
//! generation time; a loop driven by an input propagates that input's
//! header timestamp. Users never set timestamps.

use crate::error::{Error, TransportError};
use crate::module::behavior::{FusionModule, PipelineModule, SourceModule};
use crate::module::metadata::ModuleContext;
use crate::module::sets::{OutputSet, SecondaryInputs};
use crate::module::DataRuntime;
use crate::time;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

/// Iterations that get a progress log line while a freshly started loop
/// warms up.
const WARMUP_ITERATIONS: u64 = 3;

/// Time-driven or free-running generation for modules without data inputs.
///
/// Periodic mode sleeps exactly the configured period after each iteration;
/// `process` overruns shift subsequent iterations rather than being caught
/// up. Free-running mode emits as fast as `process` produces.
pub(crate) fn source_loop<M: SourceModule>(user: Arc<Mutex<M>>, rt: DataRuntime) {
    let ctx = ModuleContext::new(0);
    let period = rt.config.period();

    match period {
        Some(period) => log::info!(
            "[{}] periodic loop started, period {period:?}",
            rt.name
        ),
        None => log::info!("[{}] free-running loop started", rt.name),
    }

    let mut iteration = 0u64;

    while rt.running.load(Ordering::Acquire) {
        let generation_ts = time::now();

        let outputs = {
            let mut user = user.lock().unwrap_or_else(PoisonError::into_inner);

            user.process(&ctx)
        };

        outputs.publish_all(&rt.publisher, generation_ts);

        if iteration < WARMUP_ITERATIONS {
            log::info!("[{}] data loop iteration {iteration}", rt.name);
        }

        iteration += 1;

        if let Some(period) = period {
            time::sleep(period);
        }
    }

    log::info!("[{}] data loop ended after {iteration} iterations", rt.name);
}

/// Event-driven processing of a single continuous input.
pub(crate) fn pipeline_loop<M: PipelineModule>(user: Arc<Mutex<M>>, rt: DataRuntime) {
    let Some(data) = rt.data_mailboxes.first().cloned() else {
        log::error!("[{}] no data mailbox for continuous input", rt.name);
        return;
    };

    log::info!("[{}] continuous loop started, waiting for data", rt.name);

    let mut ctx = ModuleContext::new(1);
    let mut iteration = 0u64;

    while rt.running.load(Ordering::Acquire) {
        let frame = match data.receive::<M::Input>(None) {
            Ok(frame) => frame,
            Err(Error::Transport(TransportError::Closed)) => break,
            Err(e) => {
                // The frame that would have fed this iteration is gone;
                // skip it and keep consuming.
                log::warn!("[{}] data receive failed: {e}", rt.name);
                continue;
            }
        };

        ctx.record(0, &frame.header, true);

        let outputs = {
            let mut user = user.lock().unwrap_or_else(PoisonError::into_inner);

            user.process(&frame.payload, &ctx)
        };

        // Propagate the input's validity time, not the processing time.
        outputs.publish_all(&rt.publisher, frame.header.timestamp_ns);

        if iteration < WARMUP_ITERATIONS {
            log::info!("[{}] data loop iteration {iteration}", rt.name);
        }

        iteration += 1;
    }

    log::info!("[{}] continuous loop ended after {iteration} iterations", rt.name);
}

/// Primary-driven multi-input processing: block on the primary, sample every
/// secondary's history at the primary timestamp, skip the iteration when a
/// secondary misses its window.
pub(crate) fn fusion_loop<M: FusionModule>(
    user: Arc<Mutex<M>>,
    rt: DataRuntime,
    histories: Arc<<M::Secondaries as SecondaryInputs>::Histories>,
) {
    let Some(primary) = rt.data_mailboxes.first().cloned() else {
        log::error!("[{}] no data mailbox for primary input", rt.name);
        return;
    };

    let num_inputs = 1 + <M::Secondaries as SecondaryInputs>::COUNT;
    let tolerance = rt.config.sync_tolerance();

    log::info!(
        "[{}] multi-input loop started ({num_inputs} inputs, tolerance {tolerance:?})",
        rt.name
    );

    let mut ctx = ModuleContext::new(num_inputs);
    let mut iteration = 0u64;
    let mut missed = 0u64;

    while rt.running.load(Ordering::Acquire) {
        let frame = match primary.receive::<M::Primary>(None) {
            Ok(frame) => frame,
            Err(Error::Transport(TransportError::Closed)) => break,
            Err(e) => {
                log::warn!("[{}] primary receive failed: {e}", rt.name);
                continue;
            }
        };

        ctx.record(0, &frame.header, true);

        let primary_ts = frame.header.timestamp_ns;

        let Some(secondaries) =
            <M::Secondaries as SecondaryInputs>::gather(&histories, primary_ts, tolerance, &mut ctx)
        else {
            missed += 1;

            if missed <= WARMUP_ITERATIONS {
                log::info!(
                    "[{}] sync miss at primary ts {primary_ts} ({missed} so far)",
                    rt.name
                );
            }

            continue;
        };

        let outputs = {
            let mut user = user.lock().unwrap_or_else(PoisonError::into_inner);

            user.process(&frame.payload, secondaries, &ctx)
        };

        // Primary time is the synchronization point for everything
        // published from this invocation.
        outputs.publish_all(&rt.publisher, primary_ts);

        if iteration < WARMUP_ITERATIONS {
            log::info!("[{}] fused iteration {iteration}", rt.name);
        }

        iteration += 1;
    }

    log::info!(
        "[{}] multi-input loop ended after {iteration} iterations ({missed} sync misses)",
        rt.name
    );
}
