//! End-to-end controller tests over mock channels
//!
//! Each test stands up a small array (two producers, two accumulators) on
//! in-memory channels, drives the real protocols against it, and asserts
//! on the recorded register traffic and announcements.

use std::sync::Arc;
use std::time::Duration;

use lockstep_channel::{Call, MockChannel};
use lockstep_core::{
    AccumulationConfig, Announcement, ArrayConfig, LockstepError, NodeId, Polarization,
    RecordingAnnouncer, TimingConfig,
};
use lockstep_registry::{AccumulatorNode, NodeRegistry, ProducerNode};
use lockstep_runtime::{CoefficientRequest, Controller, ResyncOutcome, RetryBudget, TargetTime};
use lockstep_time::ManualClock;

const TRIGGER_ARM: u32 = 1 << 2;
const TARGET_PENDING: u32 = 1 << 31;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn test_config() -> ArrayConfig {
    ArrayConfig {
        n_antennas: 8,
        n_polarizations: 2,
        n_channels: 2048,
        n_accum_engines: 4,
        engines_per_accumulator: 2,
        inputs_per_producer: 8,
        antennas_per_link: 2,
        links_per_producer: 2,
        links_per_accumulator: 2,
        timing: TimingConfig {
            tick_rate: 800_000_000.0,
            packet_rate: 1_600_000.0,
            bandwidth: 400_000_000.0,
            pulse_rate: 1.0,
            arm_settle: Duration::from_millis(2100),
            coefficient_margin: Duration::from_millis(100),
            restart_margin: Duration::from_millis(500),
            latency_allowance: Duration::from_millis(200),
            batch_timeout: Duration::from_secs(5),
            resync_settle: Duration::from_secs(4),
            post_clear_settle: Duration::from_secs(2),
        },
        accumulation: AccumulationConfig {
            batch_length: 128,
            default_count: 1024,
        },
    }
}

struct Fleet {
    producers: Vec<Arc<MockChannel>>,
    accumulators: Vec<Arc<MockChannel>>,
    clock: Arc<ManualClock>,
    announcer: Arc<RecordingAnnouncer>,
}

impl Fleet {
    /// Two producers and two accumulators, seeded to look healthy and
    /// un-armed, with the reference producer 0.1 s of ticks past sync.
    fn new() -> Self {
        init_logging();
        let config = test_config();
        let producers: Vec<_> = (0..2).map(|_| Arc::new(MockChannel::new())).collect();
        for chan in &producers {
            chan.set_register("sync_ctrl", 0);
            chan.set_register("pulse_count", 42);
            chan.set_register("pulse_interval", 800_000_000);
            chan.set_register("tick_msw", 0);
            chan.set_register("tick_lsw", 80_000_000);
            for input in 0..config.inputs_per_producer {
                chan.set_register(&format!("input_status{input}"), 0);
                chan.set_register(&format!("load_status{input}"), 0x0001_0001);
            }
        }

        let accumulators: Vec<_> = (0..2).map(|_| Arc::new(MockChannel::new())).collect();
        for chan in &accumulators {
            chan.set_register("accum_ctrl", 0);
            for engine in 0..config.engines_per_accumulator {
                chan.set_register(&format!("restart_status{engine}"), 0x0001_0001);
                chan.set_register(&format!("reorder_err{engine}"), 0);
                chan.set_register(&format!("reorder_count{engine}"), 100);
                chan.set_register(&format!("accum_err{engine}"), 0);
                chan.set_register(&format!("accum_count{engine}"), 20);
            }
            for link in 0..config.links_per_accumulator {
                chan.set_register(&format!("link_count{link}"), 500);
                chan.set_register(&format!("link_err{link}"), 0);
                chan.script_reads(&format!("loopback_tick{link}"), &[0x0010_0011, 0x0020_0021]);
                chan.set_register(&format!("sync_tick{link}"), 7000);
            }
        }

        Fleet {
            producers,
            accumulators,
            clock: Arc::new(ManualClock::new(1000.2)),
            announcer: Arc::new(RecordingAnnouncer::new()),
        }
    }

    async fn connect(&self) -> Result<Controller, LockstepError> {
        let producers = self
            .producers
            .iter()
            .enumerate()
            .map(|(i, c)| ProducerNode::new(NodeId::new(format!("spec-{i}")), c.clone() as _))
            .collect();
        let accumulators = self
            .accumulators
            .iter()
            .enumerate()
            .map(|(i, c)| AccumulatorNode::new(NodeId::new(format!("acc-{i}")), c.clone() as _))
            .collect();
        let registry = Arc::new(NodeRegistry::new(
            producers,
            accumulators,
            Duration::from_secs(5),
        ));
        Controller::connect(
            Arc::new(test_config()),
            registry,
            self.clock.clone(),
            self.announcer.clone(),
        )
        .await
    }

    async fn controller(&self) -> Controller {
        self.connect().await.expect("fleet connects")
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_validates_every_node() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    assert_eq!(ctrl.registry().producers().len(), 2);
    assert!(fleet.producers[0].calls().contains(&Call::Ping));
    assert!(fleet.accumulators[1].calls().contains(&Call::Ping));
}

#[tokio::test]
async fn connect_aborts_when_a_node_stays_unreachable() {
    let fleet = Fleet::new();
    fleet.accumulators[0].fail_pings(2);

    let err = fleet.connect().await.unwrap_err();
    assert!(matches!(err, LockstepError::Connectivity { .. }));
    assert!(err.to_string().contains("acc-0"));
}

#[tokio::test]
async fn connect_tolerates_one_lost_ping() {
    let fleet = Fleet::new();
    fleet.producers[1].fail_pings(1);
    assert!(fleet.connect().await.is_ok());
}

// ---------------------------------------------------------------------------
// Arming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn arming_triggers_on_the_next_whole_second() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;

    // Clock starts at 1000.2: the phase boundary is 1000.5 and the trigger
    // lands on the next whole second at least 1 s out.
    let sync_time = ctrl.arm().await.unwrap();
    assert_eq!(sync_time, 1002.0);

    let epoch = ctrl.epoch().unwrap();
    assert_eq!(epoch.sync_time(), 1002.0);
    assert_eq!(epoch.tick_rate(), 800_000_000.0);
}

#[tokio::test]
async fn arming_pulses_deassert_assert_deassert_on_every_producer() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    for chan in &fleet.producers {
        assert_eq!(chan.writes_to("sync_ctrl"), vec![0, TRIGGER_ARM, 0]);
    }
}

#[tokio::test]
async fn arming_announces_the_new_timing() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    let log = fleet.announcer.recorded();
    match &log[0] {
        Announcement::Timing(timing) => {
            assert_eq!(timing.sync_time, 1002.0);
            assert_eq!(timing.accumulation_count, 1024);
        }
        other => panic!("expected a timing announcement, got {other:?}"),
    }
}

#[tokio::test]
async fn arming_names_the_producer_that_failed_to_trigger() {
    let fleet = Fleet::new();
    // Producer 1 still shows its armed flag after the settle window.
    fleet.producers[1].set_register("pulse_count", (1 << 31) | 3);

    let ctrl = fleet.controller().await;
    let err = ctrl.arm().await.unwrap_err();
    match err {
        LockstepError::Arming { node } => assert_eq!(node, NodeId::new("spec-1")),
        other => panic!("expected Arming, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Coefficient loads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_schedule_issues_no_writes() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    let writes_before = fleet.producers[0].write_count();
    let mut req = CoefficientRequest::new(0, Polarization::X);
    req.delay = 1e-9;
    req.load_at = TargetTime::At(1001.0);

    let err = ctrl.load_coefficients(req).await.unwrap_err();
    assert!(matches!(err, LockstepError::SchedulingRejected { .. }));
    assert_eq!(fleet.producers[0].write_count(), writes_before);
}

#[tokio::test]
async fn unrepresentable_delay_reports_range_error_without_writes() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    let writes_before = fleet.producers[0].write_count();
    let mut req = CoefficientRequest::new(0, Polarization::X);
    req.delay = 1e-14;

    let err = ctrl.load_coefficients(req).await.unwrap_err();
    assert!(matches!(err, LockstepError::Range { .. }));
    assert!(err.to_string().contains("1e-14"), "{err}");
    assert_eq!(fleet.producers[0].write_count(), writes_before);
}

#[tokio::test]
async fn coefficient_load_commits_with_the_pending_protocol() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    // The load fires: accept and fire counters both advance.
    fleet.producers[0].script_reads("load_status0", &[0x0001_0001, 0x0002_0002]);

    let mut req = CoefficientRequest::new(0, Polarization::X);
    req.delay = 1e-9;
    let applied = ctrl.load_coefficients(req).await.unwrap();

    // 0.1 s of ticks current + 0.1 s margin.
    assert_eq!(applied.target, 160_000_000);
    assert!((applied.delay - 1e-9).abs() < 1e-13);

    let chan = &fleet.producers[0];
    assert_eq!(chan.writes_to("coarse_delay0"), vec![0]);
    assert_eq!(chan.writes_to("load_target_lsw0"), vec![160_000_000]);
    // Pending strictly before cleared, as two separate calls.
    assert_eq!(chan.writes_to("load_target_msw0"), vec![TARGET_PENDING, 0]);

    // The achieved values go out to metadata consumers.
    assert!(fleet
        .announcer
        .recorded()
        .iter()
        .any(|a| matches!(a, Announcement::Coefficients(_))));
}

#[tokio::test]
async fn coefficient_load_addresses_the_right_board_and_input() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    // Antenna 5, pol Y lives on producer board 1, input 3.
    fleet.producers[1].script_reads("load_status3", &[0x0001_0001, 0x0002_0002]);

    let mut req = CoefficientRequest::new(5, Polarization::Y);
    req.delay = 2.6e-9;
    ctrl.load_coefficients(req).await.unwrap();

    assert_eq!(fleet.producers[1].writes_to("coarse_delay3"), vec![2]);
    assert!(fleet.producers[0].writes_to("coarse_delay3").is_empty());
}

#[tokio::test]
async fn missed_window_reports_measured_lateness() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    // Accepted but never fired, and by verification time the counter is
    // 10 M ticks past the 160 M target.
    fleet.producers[0].script_reads("load_status0", &[0x0001_0001, 0x0002_0001]);
    fleet.producers[0].script_reads("tick_lsw", &[80_000_000, 170_000_000]);

    let mut req = CoefficientRequest::new(0, Polarization::X);
    req.delay = 1e-9;
    let err = ctrl.load_coefficients(req).await.unwrap_err();
    match err {
        LockstepError::MissedWindow { node, late_ms } => {
            assert_eq!(node, NodeId::new("spec-0"));
            assert!((late_ms - 12.5).abs() < 1e-9, "late_ms = {late_ms}");
        }
        other => panic!("expected MissedWindow, got {other:?}"),
    }
}

#[tokio::test]
async fn held_in_reset_is_distinguished_from_a_plain_reject() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    fleet.producers[0].set_register("load_status0", 0);
    let mut req = CoefficientRequest::new(0, Polarization::X);
    req.delay = 1e-9;
    assert!(matches!(
        ctrl.load_coefficients(req).await.unwrap_err(),
        LockstepError::HeldInReset { .. }
    ));
}

// ---------------------------------------------------------------------------
// Accumulator restarts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restart_lands_on_a_channel_boundary_with_margin() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    for chan in &fleet.accumulators {
        chan.script_reads("restart_status0", &[0x0001_0001, 0x0002_0002]);
        chan.script_reads("restart_status1", &[0x0001_0001, 0x0002_0002]);
    }

    let target = ctrl.restart_accumulators(TargetTime::Asap).await.unwrap();
    // 160 k packets now + 800 k packets margin, rounded up to 2048.
    assert_eq!(target, 960_512);
    assert_eq!(target % 2048, 0);

    for chan in &fleet.accumulators {
        assert_eq!(chan.writes_to("restart_target_lsw"), vec![960_512]);
        assert_eq!(
            chan.writes_to("restart_target_msw"),
            vec![TARGET_PENDING, 0]
        );
    }
}

#[tokio::test]
async fn restart_failure_names_the_node_that_did_not_fire() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    fleet.accumulators[0].script_reads("restart_status0", &[0x0001_0001, 0x0002_0002]);
    fleet.accumulators[0].script_reads("restart_status1", &[0x0001_0001, 0x0002_0002]);
    // acc-1, engine 1 accepts but never fires.
    fleet.accumulators[1].script_reads("restart_status0", &[0x0001_0001, 0x0002_0002]);
    fleet.accumulators[1].script_reads("restart_status1", &[0x0001_0001, 0x0002_0001]);

    let err = ctrl
        .restart_accumulators(TargetTime::Asap)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("acc-1"), "{err}");
}

// ---------------------------------------------------------------------------
// Accumulation length
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accumulation_count_rounds_to_whole_batches_and_reannounces() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    for chan in &fleet.accumulators {
        chan.script_reads("restart_status0", &[0x0001_0001, 0x0002_0002]);
        chan.script_reads("restart_status1", &[0x0001_0001, 0x0002_0002]);
    }

    let applied = ctrl.set_accumulation_count(Some(1000)).await.unwrap();
    assert_eq!(applied, 896);
    assert_eq!(ctrl.accumulation_count(), 896);

    for chan in &fleet.accumulators {
        assert_eq!(chan.writes_to("accum_length"), vec![7]);
    }

    // One timing announcement from arming, one from the length change.
    assert_eq!(fleet.announcer.timing_count(), 2);
}

#[tokio::test]
async fn too_short_accumulation_is_rejected() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.arm().await.unwrap();

    let err = ctrl.set_accumulation_count(Some(100)).await.unwrap_err();
    assert!(matches!(err, LockstepError::AccumulationTooShort { .. }));
}

// ---------------------------------------------------------------------------
// Resynchronization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resync_returns_immediately_when_healthy() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;

    let outcome = ctrl.resynchronize(RetryBudget::Bounded(3)).await.unwrap();
    assert_eq!(
        outcome,
        ResyncOutcome {
            healthy: true,
            rearm_attempts: 0
        }
    );
    // No re-arm happened.
    for chan in &fleet.producers {
        assert!(!chan.writes_to("sync_ctrl").contains(&TRIGGER_ARM));
    }
}

#[tokio::test]
async fn resync_spends_exactly_the_bounded_budget() {
    let fleet = Fleet::new();
    // A persistent fault the re-arm cycle cannot clear.
    fleet.accumulators[0].set_register("reorder_err0", 9);

    let ctrl = fleet.controller().await;
    let outcome = ctrl.resynchronize(RetryBudget::Bounded(3)).await.unwrap();
    assert_eq!(
        outcome,
        ResyncOutcome {
            healthy: false,
            rearm_attempts: 3
        }
    );

    // Exactly three trigger-arm pulses went out.
    for chan in &fleet.producers {
        let arms = chan
            .writes_to("sync_ctrl")
            .into_iter()
            .filter(|v| *v == TRIGGER_ARM)
            .count();
        assert_eq!(arms, 3);
    }
    // Error counters were cleared after each re-arm.
    let clears = fleet.accumulators[0]
        .writes_to("accum_ctrl")
        .into_iter()
        .filter(|v| *v == 1 << 8)
        .count();
    assert_eq!(clears, 3);
}

// ---------------------------------------------------------------------------
// Announcements and indices
// ---------------------------------------------------------------------------

#[tokio::test]
async fn geometry_and_stream_descriptors_cover_every_engine() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;

    ctrl.announce_geometry();
    ctrl.announce_stream_descriptors();

    let log = fleet.announcer.recorded();
    match &log[0] {
        Announcement::Geometry(geom) => {
            assert_eq!(geom.n_channels, 2048);
            assert_eq!(geom.n_accum_engines, 4);
        }
        other => panic!("expected geometry, got {other:?}"),
    }
    match &log[1] {
        Announcement::StreamDescriptors(streams) => {
            assert_eq!(streams.len(), 4);
            assert_eq!(streams[3].engine, 3);
            assert_eq!(streams[3].n_channels, 512);
        }
        other => panic!("expected stream descriptors, got {other:?}"),
    }
}

#[tokio::test]
async fn output_enable_and_accumulator_reset_drive_the_control_register() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;

    ctrl.set_output_enabled(true).await.unwrap();
    ctrl.reset_accumulators().await.unwrap();

    for chan in &fleet.accumulators {
        // One plain enable write, then a deassert-assert-deassert reset.
        assert_eq!(chan.writes_to("accum_ctrl"), vec![1 << 16, 0, 1, 0]);
    }
}

#[tokio::test]
async fn board_and_engine_indices_interleave_across_nodes() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    ctrl.assign_board_indices().await.unwrap();

    assert_eq!(fleet.producers[0].register("board_index"), Some(0));
    assert_eq!(fleet.producers[1].register("board_index"), Some(1));

    // Engine e on node p carries global index e * n_nodes + p.
    assert_eq!(fleet.accumulators[0].register("engine_index0"), Some(0));
    assert_eq!(fleet.accumulators[1].register("engine_index0"), Some(1));
    assert_eq!(fleet.accumulators[0].register("engine_index1"), Some(2));
    assert_eq!(fleet.accumulators[1].register("engine_index1"), Some(3));
}

#[tokio::test]
async fn counters_require_an_epoch() {
    let fleet = Fleet::new();
    let ctrl = fleet.controller().await;
    assert!(matches!(
        ctrl.current_packets().await.unwrap_err(),
        LockstepError::NoEpoch
    ));

    ctrl.arm().await.unwrap();
    // 80 M ticks scaled to the packet domain.
    assert_eq!(ctrl.current_packets().await.unwrap(), 160_000);
}
