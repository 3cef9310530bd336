//! Accumulation-length control
//!
//! Changing the integration length mid-stream can leave engines split
//! across the old and new boundary, so every change is followed by a
//! scheduled restart of all accumulators and a fresh timing announcement.

use lockstep_core::{LockstepError, LockstepResult};

use crate::commit::{restart_accumulators, TargetTime};
use crate::Controller;

/// Program the accumulation length in spectra. Rounds down to whole
/// hardware batches; returns the count actually applied.
pub(crate) async fn set_count(ctrl: &Controller, n_spectra: Option<u32>) -> LockstepResult<u32> {
    let config = ctrl.config();
    let requested = n_spectra.unwrap_or(config.accumulation.default_count);
    let batch = config.accumulation.batch_length;

    let batches = requested / batch;
    if batches == 0 {
        return Err(LockstepError::AccumulationTooShort { requested, batch });
    }
    let applied = batches * batch;
    if applied != requested {
        tracing::warn!(requested, applied, "accumulation count rounded to whole batches");
    }

    ctrl.registry()
        .map_accumulators(move |n| n.set_accumulation_length(batches))
        .await
        .into_result()?;
    ctrl.store_accumulation_count(applied);
    tracing::info!(
        spectra = applied,
        seconds = config.integration_time(applied),
        "accumulation length programmed"
    );

    restart_accumulators(ctrl, TargetTime::Asap).await?;
    ctrl.announce_timing()?;
    Ok(applied)
}

/// Program an approximate integration time in seconds; returns the time
/// actually achieved after quantization to whole batches.
pub(crate) async fn set_integration_time(ctrl: &Controller, seconds: f64) -> LockstepResult<f64> {
    let n_spectra = (seconds * ctrl.config().spectrum_rate()) as u32;
    let applied = set_count(ctrl, Some(n_spectra)).await?;
    Ok(ctrl.config().integration_time(applied))
}
