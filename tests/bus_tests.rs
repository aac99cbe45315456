//! Bus integration tests: decoded packets flow into the pools and come back
//! out through the refresh runner

use std::sync::Arc;
use std::thread;

use rs_ddl::hal::{MockClock, MockPulseSource, MockSink};
use rs_ddl::packet::PacketKind;
use rs_ddl::refresh::Rotation;
use rs_ddl::{
    BusConfig, DccPacket, DecodeRunner, EnabledProtocols, FeedbackReport, FrameSelector,
    MfxPacket, MotorolaPacket, Protocol, RefreshRunner, SharedBus,
};

fn bus_with_clock() -> (MockClock, Arc<SharedBus>) {
    let clock = MockClock::new();
    let config = BusConfig::default().with_refresh_spacing_ms(0);
    let bus = Arc::new(SharedBus::new(0, config).with_clock(clock.clone()));
    (clock, bus)
}

fn mixed_capture() -> MockPulseSource {
    let mut source = MockPulseSource::new();
    source
        .push_motorola(&MotorolaPacket::mm1(24, false, 5))
        .push_motorola(&MotorolaPacket::mm1(24, false, 5))
        .push_dcc(DccPacket::with_checksum(&[3, 0x76]).unwrap().bytes(), 14)
        .push_mfx(&MfxPacket::drive(5, true, 100).unwrap())
        .finish();
    source
}

// ============================================================================
// Decode Into Pools
// ============================================================================

#[test]
fn mixed_capture_fills_all_pools() {
    let (_, bus) = bus_with_clock();
    let mut runner = DecodeRunner::new(Arc::clone(&bus), mixed_capture());
    let stats = runner.run(|_| {}).unwrap();

    assert_eq!(stats.events, 4);
    assert_eq!(stats.stored, 3);
    assert_eq!(stats.rejected, 0);
    assert_eq!(bus.pools().motorola.known_addresses(), vec![24]);
    assert_eq!(bus.pools().dcc.known_addresses(), vec![3]);
    assert_eq!(bus.pools().mfx.known_addresses(), vec![5]);
    assert_eq!(
        bus.pools().mfx.get(5, FrameSelector::Command).unwrap(),
        MfxPacket::drive(5, true, 100).unwrap()
    );
}

#[test]
fn later_packet_replaces_earlier() {
    let (clock, bus) = bus_with_clock();
    let mut source = MockPulseSource::new();
    source
        .push_motorola(&MotorolaPacket::mm1(24, false, 5))
        .push_motorola(&MotorolaPacket::mm1(24, false, 9))
        .finish();

    clock.set(1_000);
    DecodeRunner::new(Arc::clone(&bus), source)
        .run(|_| {})
        .unwrap();

    let entry = bus.pools().motorola.entry(24).unwrap();
    assert_eq!(entry.packet, MotorolaPacket::mm1(24, false, 9));
    assert_eq!(entry.last_update_ms, 1_000);
    assert_eq!(bus.pools().motorola.len(), 1);
}

#[test]
fn mm2_function_frame_lands_in_function_slot() {
    let (_, bus) = bus_with_clock();
    let mut source = MockPulseSource::new();
    source
        .push_motorola(&MotorolaPacket::mm2(10, 0, 7, 2))
        .push_motorola(&MotorolaPacket::mm2(10, 0, 7, 11))
        .finish();

    DecodeRunner::new(Arc::clone(&bus), source)
        .run(|_| {})
        .unwrap();

    let entry = bus.pools().motorola.entry(10).unwrap();
    assert_eq!(entry.packet, MotorolaPacket::mm2(10, 0, 7, 2));
    assert_eq!(entry.functions[0], Some(MotorolaPacket::mm2(10, 0, 7, 11)));
}

#[test]
fn full_pool_rejects_without_stopping() {
    let clock = MockClock::new();
    let config = BusConfig::default().with_capacity(Protocol::Motorola, 1);
    let bus = Arc::new(SharedBus::new(0, config).with_clock(clock));
    let mut source = MockPulseSource::new();
    source
        .push_motorola(&MotorolaPacket::mm1(24, false, 5))
        .push_motorola(&MotorolaPacket::mm1(30, false, 5))
        .push_dcc(DccPacket::with_checksum(&[3, 0x76]).unwrap().bytes(), 14);

    let stats = DecodeRunner::new(Arc::clone(&bus), source)
        .run(|_| {})
        .unwrap();

    assert_eq!(stats.rejected, 1);
    assert_eq!(bus.pools().motorola.known_addresses(), vec![24]);
    assert!(bus.pools().dcc.contains(3));
}

// ============================================================================
// Refresh From Pools
// ============================================================================

#[test]
fn refresh_rotates_through_protocols() {
    let (clock, bus) = bus_with_clock();
    DecodeRunner::new(Arc::clone(&bus), mixed_capture())
        .run(|_| {})
        .unwrap();

    // outside the fast window every tick is a normal refresh
    clock.set(1_000_000);
    let mut runner = RefreshRunner::new(Arc::clone(&bus), MockSink::new());
    let mut served = Vec::new();
    for _ in 0..6 {
        let now = bus.now_ms();
        let batch = runner.tick(now).unwrap().unwrap();
        assert_eq!(batch.rotation, Rotation::Normal);
        served.push((batch.protocol, batch.address));
    }
    assert_eq!(
        served,
        vec![
            (Protocol::Motorola, 24),
            (Protocol::Dcc, 3),
            (Protocol::Mfx, 5),
            (Protocol::Motorola, 24),
            (Protocol::Dcc, 3),
            (Protocol::Mfx, 5),
        ]
    );

    let kinds: Vec<PacketKind> = runner.sink().sent.iter().map(|p| p.kind).collect();
    assert_eq!(
        &kinds[..3],
        &[PacketKind::M1Loco, PacketKind::NmraLoco, PacketKind::Mfx]
    );
    assert_eq!(runner.info().passes(Protocol::Dcc), 2);
}

#[test]
fn refresh_sends_configured_repeats() {
    let (_, bus) = bus_with_clock();
    DecodeRunner::new(Arc::clone(&bus), mixed_capture())
        .run(|_| {})
        .unwrap();

    let mut runner = RefreshRunner::new(Arc::clone(&bus), MockSink::new());
    while runner.sink().sent.len() < 6 {
        runner.poll().unwrap();
    }
    for sent in &runner.sink().sent {
        let expected = match sent.kind {
            PacketKind::M1Loco => 2,
            _ => 1,
        };
        assert_eq!(sent.retransmits, expected, "{:?}", sent.kind);
    }
}

#[test]
fn refresh_skips_disabled_protocol() {
    let clock = MockClock::new();
    let config = BusConfig::default()
        .with_refresh_spacing_ms(0)
        .with_enabled_protocols(EnabledProtocols::NONE.with(Protocol::Dcc));
    let bus = Arc::new(SharedBus::new(0, config).with_clock(clock));
    DecodeRunner::new(Arc::clone(&bus), mixed_capture())
        .run(|_| {})
        .unwrap();

    let mut runner = RefreshRunner::new(Arc::clone(&bus), MockSink::new());
    for _ in 0..4 {
        runner.poll().unwrap();
    }
    assert!(runner
        .sink()
        .sent
        .iter()
        .all(|p| p.kind == PacketKind::NmraLoco));
    assert_eq!(runner.sink().sent.len(), 4);
}

#[test]
fn fresh_address_is_refreshed_more_often() {
    let (clock, bus) = bus_with_clock();
    for address in [1u32, 2, 3, 4] {
        bus.update_dcc(address, DccPacket::with_checksum(&[address as u8, 0x60]).unwrap())
            .unwrap();
    }
    clock.set(200_000);
    bus.update_dcc(2, DccPacket::with_checksum(&[2, 0x76]).unwrap())
        .unwrap();

    let mut runner = RefreshRunner::new(Arc::clone(&bus), MockSink::new());
    let mut counts = [0usize; 5];
    for _ in 0..8 {
        let batch = runner.tick(bus.now_ms()).unwrap().unwrap();
        counts[batch.address as usize] += 1;
    }
    assert_eq!(counts[2], 5);
    assert_eq!(counts[1] + counts[3] + counts[4], 3);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn decode_and_refresh_on_separate_threads() {
    let (_, bus) = bus_with_clock();

    let decoder_bus = Arc::clone(&bus);
    let decoder = thread::spawn(move || {
        let mut source = MockPulseSource::new();
        for address in 1..=20u8 {
            source.push_motorola(&MotorolaPacket::mm1(address, false, 3));
        }
        source.finish();
        DecodeRunner::new(decoder_bus, source).run(|_| {}).unwrap()
    });

    let mut runner = RefreshRunner::new(Arc::clone(&bus), MockSink::new());
    for _ in 0..200 {
        runner.poll().unwrap();
    }
    let stats = decoder.join().unwrap();

    assert_eq!(stats.stored, 20);
    assert_eq!(bus.pools().motorola.len(), 20);
    assert!(bus.pools().motorola.is_consistent());
    for sent in &runner.sink().sent {
        assert_eq!(sent.bytes.len(), 18);
    }
}

#[test]
fn feedback_reaches_the_bus_consumer() {
    let (_, bus) = bus_with_clock();
    let producer_bus = Arc::clone(&bus);
    thread::spawn(move || {
        producer_bus
            .feedback()
            .publish_local([1, 2, 3, 4, 5, 6])
            .unwrap();
    })
    .join()
    .unwrap();

    match bus.feedback().poll() {
        Some(FeedbackReport::Local(local)) => assert_eq!(local.payload, [1, 2, 3, 4, 5, 6]),
        other => panic!("unexpected {:?}", other),
    }
    assert!(bus.feedback().poll().is_none());
}
