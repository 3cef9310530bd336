//! The check battery
//!
//! Each check is independent and composable: it samples node state through
//! the registry, never mutates anything, and reports per-node diagnostics.
//! Channel failures propagate as errors; only genuine health findings are
//! reported through [`HealthCheck`].

use std::sync::Arc;
use std::time::Duration;

use lockstep_core::{ArrayConfig, LockstepResult};
use lockstep_registry::NodeRegistry;
use lockstep_time::Clock;

use crate::{check_agreement, HealthCheck, HealthReport};

/// Gap between the two samples of an activity check.
const ACTIVITY_SAMPLE_GAP: Duration = Duration::from_millis(10);
/// Gap between the two tick-counter samples of the clock-rate estimate.
const CLOCK_SAMPLE_GAP: Duration = Duration::from_millis(100);

/// Agreement tolerance on sync-tick observations, in ticks.
const SYNC_TICK_TOLERANCE: f64 = 4.0;
/// Agreement tolerance on pulse counts, in pulses.
const PULSE_COUNT_TOLERANCE: f64 = 1.0;
/// Agreement tolerance on ticks-between-pulses.
const PULSE_INTERVAL_TOLERANCE: f64 = 2.0;

/// Below this estimated rate the sampling clock is considered absent.
const MIN_DETECTABLE_CLOCK_HZ: f64 = 100e6;
/// Allowed deviation of the estimated clock rate from the configured one.
const CLOCK_RATE_TOLERANCE_HZ: f64 = 1e6;
/// Allowed deviation of the measured pulse rate from the configured one.
const PULSE_RATE_TOLERANCE_HZ: f64 = 1e-3;

/// Runs verification checks against the registry.
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    config: Arc<ArrayConfig>,
    clock: Arc<dyn Clock>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        config: Arc<ArrayConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        HealthMonitor {
            registry,
            config,
            clock,
        }
    }

    /// Any engine dropping or reordering producer frames?
    pub async fn frame_reorder_check(&self) -> LockstepResult<HealthCheck> {
        let mut check = HealthCheck::pass("frame-reorder");
        for engine in 0..self.config.engines_per_accumulator {
            let errors = self
                .registry
                .map_accumulators(move |n| n.reorder_err(engine))
                .await
                .into_result()?;
            let counts = self
                .registry
                .map_accumulators(move |n| n.reorder_count(engine))
                .await
                .into_result()?;
            for ((node, error), (_, count)) in errors.iter().zip(&counts) {
                if *error != 0 || *count == 0 {
                    check.flag(node, format!("missing spectrum data on engine {engine}"));
                }
            }
        }
        Ok(check)
    }

    /// Any accumulator erroring, or never producing an integration?
    pub async fn accumulation_check(&self) -> LockstepResult<HealthCheck> {
        let mut check = HealthCheck::pass("accumulation");
        for engine in 0..self.config.engines_per_accumulator {
            let errors = self
                .registry
                .map_accumulators(move |n| n.accum_err(engine))
                .await
                .into_result()?;
            let counts = self
                .registry
                .map_accumulators(move |n| n.accum_count(engine))
                .await
                .into_result()?;
            for (node, error) in &errors {
                if *error != 0 {
                    check.flag(node, format!("accumulation errors on engine {engine}"));
                }
            }
            for (node, count) in &counts {
                if *count == 0 {
                    check.flag(node, format!("no accumulations from engine {engine}"));
                }
            }
        }
        Ok(check)
    }

    /// Is producer data arriving intact on every ingest link?
    pub async fn link_check(&self) -> LockstepResult<HealthCheck> {
        let mut check = HealthCheck::pass("ingest-link");
        for link in 0..self.config.links_per_accumulator {
            let counts = self
                .registry
                .map_accumulators(move |n| n.link_count(link))
                .await
                .into_result()?;
            let errors = self
                .registry
                .map_accumulators(move |n| n.link_err(link))
                .await
                .into_result()?;
            for (node, count) in &counts {
                if *count == 0 {
                    check.flag(node, format!("no producer data on link {link}"));
                }
            }
            for (node, error) in &errors {
                if *error != 0 {
                    check.flag(node, format!("corrupt producer data on link {link}"));
                }
            }
        }
        Ok(check)
    }

    /// Are the exchange cores still transmitting?
    pub async fn transmit_activity_check(&self) -> LockstepResult<HealthCheck> {
        self.link_activity_check("transmit-activity", "transmit", |n, l| n.tx_count(l))
            .await
    }

    /// Are the exchange cores still receiving?
    pub async fn receive_activity_check(&self) -> LockstepResult<HealthCheck> {
        self.link_activity_check("receive-activity", "receive", |n, l| n.rx_count(l))
            .await
    }

    async fn link_activity_check<F>(
        &self,
        name: &'static str,
        what: &str,
        read: F,
    ) -> LockstepResult<HealthCheck>
    where
        F: Fn(&lockstep_registry::AccumulatorNode, u32) -> lockstep_channel::ChannelResult<u32>
            + Copy
            + Send
            + Sync
            + 'static,
    {
        let mut check = HealthCheck::pass(name);
        for link in 0..self.config.links_per_accumulator {
            let first = self
                .registry
                .map_accumulators(move |n| read(n, link))
                .await
                .into_result()?;
            self.clock.sleep(ACTIVITY_SAMPLE_GAP).await;
            let second = self
                .registry
                .map_accumulators(move |n| read(n, link))
                .await
                .into_result()?;
            for ((node, before), (_, after)) in first.iter().zip(&second) {
                if *after == 0 {
                    check.flag(node, format!("{what} idle on link {link}"));
                } else if after == before {
                    check.flag(node, format!("{what} stalled on link {link}"));
                }
            }
        }
        Ok(check)
    }

    /// Is the loopback mux still advancing, and within one exchange round
    /// of its ingest side?
    pub async fn loopback_alignment_check(&self) -> LockstepResult<HealthCheck> {
        let mut check = HealthCheck::pass("loopback-alignment");
        let divergence_limit = i32::try_from(self.config.n_accum_engines).unwrap_or(i32::MAX);
        for link in 0..self.config.links_per_accumulator {
            let first = self
                .registry
                .map_accumulators(move |n| n.loopback_ticks(link))
                .await
                .into_result()?;
            self.clock.sleep(ACTIVITY_SAMPLE_GAP).await;
            let second = self
                .registry
                .map_accumulators(move |n| n.loopback_ticks(link))
                .await
                .into_result()?;
            for ((node, (loop1, ingest1)), (_, (loop2, ingest2))) in first.iter().zip(&second) {
                let divergence = (i32::from(*loop2) - i32::from(*ingest2)).abs();
                if divergence > divergence_limit {
                    check.flag(
                        node,
                        format!("loopback mux out of sync on link {link} by {divergence} frames"),
                    );
                }
                if loop2 == loop1 {
                    check.flag(node, format!("loopback stalled on link {link}"));
                }
                if ingest2 == ingest1 {
                    check.flag(node, format!("ingest stalled on link {link}"));
                }
            }
        }
        Ok(check)
    }

    /// Any producer input flagging link or overrange trouble?
    pub async fn input_status_check(&self) -> LockstepResult<HealthCheck> {
        let mut check = HealthCheck::pass("producer-inputs");
        for input in 0..self.config.inputs_per_producer {
            let statuses = self
                .registry
                .map_producers(move |n| n.input_status(input))
                .await
                .into_result()?;
            for (node, status) in &statuses {
                if status.link_down {
                    check.flag(node, format!("link down on input {input}"));
                }
                if status.link_overflow {
                    check.flag(node, format!("link overflowing on input {input}"));
                }
                if status.reorder_error {
                    check.flag(node, format!("reorder errors on input {input}"));
                }
            }
        }
        Ok(check)
    }

    /// Is every producer's sampling clock present, at the configured rate,
    /// and disciplined by the shared timing pulse?
    ///
    /// Requires an armed system: pulse counts only advance once triggered.
    pub async fn reference_clock_check(&self) -> LockstepResult<HealthCheck> {
        let mut check = HealthCheck::pass("reference-clock");

        // Estimate each board's clock from two tick-counter samples.
        let first = self
            .registry
            .map_producers(|n| n.tick_counter())
            .await
            .into_result()?;
        self.clock.sleep(CLOCK_SAMPLE_GAP).await;
        let second = self
            .registry
            .map_producers(|n| n.tick_counter())
            .await
            .into_result()?;
        let expected = self.config.timing.tick_rate;
        for ((node, before), (_, after)) in first.iter().zip(&second) {
            let rate = after.saturating_sub(*before) as f64 / CLOCK_SAMPLE_GAP.as_secs_f64();
            if rate < MIN_DETECTABLE_CLOCK_HZ {
                check.flag(node, "no sampling clock detected");
            } else if (rate - expected).abs() > CLOCK_RATE_TOLERANCE_HZ {
                check.flag(
                    node,
                    format!(
                        "sampling clock at {:.0} MHz, expected {:.0} MHz",
                        rate / 1e6,
                        expected / 1e6
                    ),
                );
            }
        }

        // Every board should have seen the same number of pulses since arm.
        let statuses = self
            .registry
            .map_producers(|n| n.pulse_status())
            .await
            .into_result()?;
        let pulse_counts: Vec<u64> = statuses.iter().map(|(_, s)| u64::from(s.pulses)).collect();
        for (node, status) in &statuses {
            if status.pulses == 0 {
                check.flag(node, "no timing pulse detected");
            }
        }
        let pulse_agreement = check_agreement(&pulse_counts, PULSE_COUNT_TOLERANCE)?;
        for (index, value) in pulse_agreement.outliers {
            check.flag(
                &statuses[index].0,
                format!(
                    "uptime of {value} pulses, where the modal mean is {:.1}",
                    pulse_agreement.modal_mean
                ),
            );
        }

        // Ticks between pulses must agree across boards and imply the
        // configured pulse rate.
        let intervals = self
            .registry
            .map_producers(|n| n.pulse_interval())
            .await
            .into_result()?;
        let interval_values: Vec<u64> = intervals.iter().map(|(_, v)| u64::from(*v)).collect();
        for (node, interval) in &intervals {
            if *interval == 0 {
                check.flag(node, "no ticks counted between timing pulses");
            }
        }
        let interval_agreement = check_agreement(&interval_values, PULSE_INTERVAL_TOLERANCE)?;
        for (index, value) in interval_agreement.outliers {
            check.flag(
                &intervals[index].0,
                format!(
                    "{value} ticks between pulses, where the modal mean is {:.1}",
                    interval_agreement.modal_mean
                ),
            );
        }
        let measured_pulse_rate = expected / interval_agreement.modal_mean;
        if (measured_pulse_rate - self.config.timing.pulse_rate).abs() > PULSE_RATE_TOLERANCE_HZ {
            check.note(format!(
                "timing pulse at {measured_pulse_rate:.3} Hz, expected {:.3} Hz",
                self.config.timing.pulse_rate
            ));
        }

        Ok(check)
    }

    /// Were all producers reset between the same pair of pulse edges?
    ///
    /// Compares the tick counts each accumulator observed at sync across
    /// its ingest links. Passing does not guarantee full synchronization,
    /// only that no producer armed a pulse late.
    pub async fn sync_agreement_check(&self) -> LockstepResult<HealthCheck> {
        let mut check = HealthCheck::pass("sync-agreement");
        let links = self.config.links_per_accumulator;
        let samples = self
            .registry
            .map_accumulators(move |n| {
                (0..links).map(|l| n.sync_tick(l)).collect::<Result<Vec<_>, _>>()
            })
            .await
            .into_result()?;

        let mut labels = Vec::new();
        let mut values = Vec::new();
        for (node, ticks) in &samples {
            for (link, tick) in ticks.iter().enumerate() {
                labels.push((node.clone(), link));
                values.push(u64::from(*tick));
            }
        }

        let agreement = check_agreement(&values, SYNC_TICK_TOLERANCE)?;
        for (index, value) in agreement.outliers {
            let (node, link) = &labels[index];
            check.flag(
                node,
                format!(
                    "sync tick {value} on link {link} deviates from the modal mean {:.1}",
                    agreement.modal_mean
                ),
            );
        }
        Ok(check)
    }

    /// The gate for the resynchronization controller: frame reorder,
    /// accumulation, loopback alignment, and ingest links must all pass.
    pub async fn composite_check(&self) -> LockstepResult<HealthReport> {
        let mut report = HealthReport::default();
        report.push(self.frame_reorder_check().await?);
        report.push(self.accumulation_check().await?);
        report.push(self.loopback_alignment_check().await?);
        report.push(self.link_check().await?);

        for check in report.failing() {
            for diagnostic in &check.details {
                tracing::debug!(check = check.name, node = %diagnostic.node, "{}", diagnostic.detail);
            }
        }
        Ok(report)
    }

    /// Everything at once, for operator diagnostics.
    pub async fn full_report(&self) -> LockstepResult<HealthReport> {
        let mut report = self.composite_check().await?;
        report.push(self.transmit_activity_check().await?);
        report.push(self.receive_activity_check().await?);
        report.push(self.input_status_check().await?);
        report.push(self.reference_clock_check().await?);
        report.push(self.sync_agreement_check().await?);
        Ok(report)
    }
}
