//! Edge case and boundary condition tests for the decoder, pools and
//! feedback channel

use rs_ddl::decoder::mfx::{MfxOutcome, LINE_CAPACITY};
use rs_ddl::decoder::{DecodeEvent, PulseClass, GAP_US, SHORT_US};
use rs_ddl::hal::MockPulseSource;
use rs_ddl::{
    BusPools, DccPacket, FeedbackChannel, FeedbackError, FeedbackReport, FeedbackSource,
    FrameSelector, MotorolaPacket, PacketPool, PoolError, Protocol, Pulse, PulseDecoder,
    PulseError,
};

/// Small deterministic generator so garbage input is reproducible.
struct Lcg(u64);

impl Lcg {
    fn step(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

// ============================================================================
// Pulse Boundaries
// ============================================================================

#[test]
fn pulse_class_thresholds() {
    assert_eq!(PulseClass::of(GAP_US), PulseClass::Long);
    assert_eq!(PulseClass::of(GAP_US + 1), PulseClass::Gap);
    assert_eq!(PulseClass::of(SHORT_US - 1), PulseClass::Short);
    assert_eq!(PulseClass::of(SHORT_US), PulseClass::Long);
}

#[test]
fn invalid_pulses_are_rejected() {
    let mut decoder = PulseDecoder::new();
    assert_eq!(
        decoder.process_pulse(0, 0),
        Err(PulseError::NonPositiveDuration(0))
    );
    assert_eq!(
        decoder.process_pulse(-1, 58),
        Err(PulseError::NegativeStart(-1))
    );
    assert!(decoder.process_pulse(0, 58).is_ok());
}

#[test]
fn empty_capture_reports_nothing() {
    let mut decoder = PulseDecoder::new();
    assert!(decoder.finish().is_empty());
}

#[test]
fn lone_gaps_report_nothing() {
    let mut decoder = PulseDecoder::new();
    for start in 0..5 {
        assert!(decoder.feed(Pulse::new(start, 2_000).unwrap()).is_empty());
    }
    assert!(decoder.finish().is_empty());
}

#[test]
fn short_segment_is_unrecognized() {
    let mut source = MockPulseSource::new();
    source.push_gap();
    for _ in 0..10 {
        source.push_pulse(200);
    }
    source.push_gap();

    let mut decoder = PulseDecoder::new();
    let events: Vec<DecodeEvent> = source.pulses().flat_map(|p| decoder.feed(p)).collect();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        DecodeEvent::Unrecognized { transitions: 11, .. }
    ));
}

#[test]
fn truncated_motorola_frame_is_not_a_frame() {
    let mut full = MockPulseSource::new();
    full.push_motorola(&MotorolaPacket::mm1(24, false, 5));
    let mut cut = MockPulseSource::new();
    for pulse in full.pulses().take(30) {
        cut.push_pulse(pulse.duration_us());
    }
    cut.push_gap();

    let mut decoder = PulseDecoder::new();
    let events: Vec<DecodeEvent> = cut.pulses().flat_map(|p| decoder.feed(p)).collect();
    assert!(events
        .iter()
        .all(|e| !matches!(e, DecodeEvent::Motorola(_))));
}

#[test]
fn short_dcc_preamble_is_ignored() {
    let mut source = MockPulseSource::new();
    source.push_dcc(DccPacket::idle().bytes(), 9);
    let mut decoder = PulseDecoder::new();
    let mut events: Vec<DecodeEvent> = source.pulses().flat_map(|p| decoder.feed(p)).collect();
    events.extend(decoder.finish());
    assert!(events.is_empty());
}

#[test]
fn overlong_mfx_segment_is_malformed() {
    let mut source = MockPulseSource::new();
    source
        .push_mfx_bits((0..LINE_CAPACITY + 50).map(|_| false))
        .finish();

    let mut decoder = PulseDecoder::new();
    let mut events: Vec<DecodeEvent> = source.pulses().flat_map(|p| decoder.feed(p)).collect();
    events.extend(decoder.finish());
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        DecodeEvent::Mfx(frame) if frame.outcome == MfxOutcome::Malformed
    ));
}

#[test]
fn garbage_input_never_panics() {
    let mut rng = Lcg(0x5EED);
    let mut decoder = PulseDecoder::new();
    let mut start = 0i64;
    let mut last_event_ms = 0i64;
    for _ in 0..50_000 {
        let duration = 1 + (rng.step() % 1_200) as i64;
        start += duration / 1_000;
        for event in decoder.feed(Pulse::new(start, duration).unwrap()) {
            assert!(event.start_ms() <= start);
            last_event_ms = event.start_ms();
            let _ = event.to_string();
        }
    }
    decoder.finish();
    assert!(last_event_ms <= start);
}

// ============================================================================
// Pool Boundaries
// ============================================================================

#[test]
fn highest_motorola_address() {
    let pools = BusPools::default();
    let max = Protocol::Motorola.max_address() as u32;
    let packet = MotorolaPacket::mm1(80, false, 0);
    assert_eq!(pools.motorola.update(max, packet, 0), Ok(()));
    assert!(matches!(
        pools.motorola.update(max + 1, packet, 0),
        Err(PoolError::AddressOutOfRange { address, .. }) if address == max + 1
    ));
}

#[test]
fn highest_dcc_pool_index() {
    let pools = BusPools::default();
    let max = Protocol::Dcc.max_address() as u32;
    assert_eq!(pools.dcc.update(max, DccPacket::idle(), 0), Ok(()));
    assert!(matches!(
        pools.dcc.update(max + 1, DccPacket::idle(), 0),
        Err(PoolError::AddressOutOfRange { .. })
    ));
    assert_eq!(pools.dcc.len(), 1);
}

#[test]
fn unknown_address_lookup() {
    let pool: PacketPool<DccPacket> = PacketPool::new(4);
    assert_eq!(
        pool.get(3, FrameSelector::Command),
        Err(PoolError::NotFound {
            protocol: Protocol::Dcc,
            address: 3
        })
    );
    assert!(pool.refresh_packets(3, 0).is_none());
    assert_eq!(pool.next_after(None, None), None);
}

#[test]
fn zero_capacity_pool_rejects_everything() {
    let pool: PacketPool<MotorolaPacket> = PacketPool::new(0);
    assert!(matches!(
        pool.update(1, MotorolaPacket::mm1(1, false, 0), 0),
        Err(PoolError::CapacityExceeded { capacity: 0, .. })
    ));
    assert!(pool.is_empty());
    assert!(pool.is_consistent());
}

#[test]
fn function_slot_out_of_range() {
    let pool: PacketPool<MotorolaPacket> = PacketPool::new(4);
    pool.update(5, MotorolaPacket::mm1(5, false, 0), 0).unwrap();
    assert!(pool
        .update_function(5, 4, MotorolaPacket::mm2(5, 0, 0, 11), 0)
        .is_err());
    assert!(pool.entry(5).unwrap().functions.iter().all(Option::is_none));
}

// ============================================================================
// Feedback Boundaries
// ============================================================================

#[test]
fn bus_payload_limit() {
    let channel = FeedbackChannel::new();
    assert!(channel.publish_bus(1, &[0; 6], false).is_ok());
    assert!(channel.poll_bus().is_some());
    assert!(matches!(
        channel.publish_bus(1, &[0; 7], false),
        Err(FeedbackError::PayloadTooLong { .. })
    ));
    assert!(!channel.is_pending(FeedbackSource::Bus));
}

#[test]
fn booster_uid_keeps_all_32_bits() {
    let channel = FeedbackChannel::new();
    channel.publish_bus(0x4D43_5301, &[1, 2], false).unwrap();
    channel.publish_local([0; 6]).unwrap();
    match channel.poll() {
        Some(FeedbackReport::Bus(report)) => {
            assert_eq!(report.booster, 0x4D43_5301);
            assert_eq!(report.payload.as_slice(), &[1, 2]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn unconsumed_report_blocks_the_slot() {
    let channel = FeedbackChannel::new();
    channel.publish_local([1; 6]).unwrap();
    assert!(matches!(
        channel.publish_local([2; 6]),
        Err(FeedbackError::Busy(FeedbackSource::Local))
    ));
    assert_eq!(channel.poll_local().map(|r| r.payload), Some([1; 6]));
    assert!(channel.publish_local([2; 6]).is_ok());
}
