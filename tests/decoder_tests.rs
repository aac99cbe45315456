//! End-to-end decoder tests: packets are synthesised as track pulses and
//! decoded again

use rs_ddl::address::DccAddress;
use rs_ddl::decoder::dcc::{DccAccessory, DccInstruction, DccOutcome};
use rs_ddl::decoder::mfx::{MfxField, MfxOutcome};
use rs_ddl::decoder::motorola::{Mm2Detail, MotorolaCommand};
use rs_ddl::hal::MockPulseSource;
use rs_ddl::{DccPacket, DecodeEvent, Direction, MfxPacket, MotorolaPacket, PulseDecoder};

fn decode_with(decoder: &mut PulseDecoder, source: &MockPulseSource) -> Vec<DecodeEvent> {
    let mut events: Vec<DecodeEvent> = source.pulses().flat_map(|p| decoder.feed(p)).collect();
    events.extend(decoder.finish());
    events
}

fn decode(source: &MockPulseSource) -> Vec<DecodeEvent> {
    decode_with(&mut PulseDecoder::new(), source)
}

// ============================================================================
// Motorola
// ============================================================================

#[test]
fn mm1_frame_decodes() {
    let mut source = MockPulseSource::new();
    source.push_motorola(&MotorolaPacket::mm1(24, false, 5)).finish();

    let events = decode(&source);
    assert_eq!(events.len(), 1);
    let DecodeEvent::Motorola(frame) = &events[0] else {
        panic!("expected Motorola frame, got {:?}", events[0]);
    };
    assert!(!frame.repeat);
    assert!(!frame.raw.frequency2);
    assert_eq!(
        frame.command,
        MotorolaCommand::Mm1 {
            address: 24,
            function: 0,
            data: 5
        }
    );
    assert_eq!(events[0].to_string(), "     0 ms: MM1 A= 24, F=0, D= 5");
}

#[test]
fn identical_frame_is_flagged_as_repeat() {
    let packet = MotorolaPacket::mm1(24, false, 5);
    let mut source = MockPulseSource::new();
    source.push_motorola(&packet).push_motorola(&packet).finish();

    let events = decode(&source);
    let repeats: Vec<bool> = events
        .iter()
        .map(|e| match e {
            DecodeEvent::Motorola(frame) => frame.repeat,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(repeats, vec![false, true]);
    assert!(events[1].to_string().ends_with("MM <REP>"));
}

#[test]
fn different_address_is_not_a_repeat() {
    let mut source = MockPulseSource::new();
    source
        .push_motorola(&MotorolaPacket::mm1(24, false, 5))
        .push_motorola(&MotorolaPacket::mm1(25, false, 5))
        .finish();

    let events = decode(&source);
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| matches!(e, DecodeEvent::Motorola(frame) if !frame.repeat)));
}

#[test]
fn dcc_packet_clears_repeat_memory() {
    let packet = MotorolaPacket::mm1(24, true, 5);
    let mut source = MockPulseSource::new();
    source
        .push_motorola(&packet)
        .push_dcc(DccPacket::idle().bytes(), 14)
        .push_motorola(&packet)
        .finish();

    let events = decode(&source);
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[1], DecodeEvent::Dcc(_)));
    assert!(matches!(&events[2], DecodeEvent::Motorola(frame) if !frame.repeat));
}

#[test]
fn mm2_function_frame() {
    // extended nibble 11 switches F1 on
    let mut source = MockPulseSource::new();
    source
        .push_motorola(&MotorolaPacket::mm2(10, 0, 7, 11))
        .finish();

    let events = decode(&source);
    let DecodeEvent::Motorola(frame) = &events[0] else {
        panic!("expected Motorola frame");
    };
    assert_eq!(
        frame.command,
        MotorolaCommand::Mm2 {
            address: 10,
            function: 0,
            data: 7,
            extended: 11,
            half_step: false,
            detail: Some(Mm2Detail::Function { number: 1, on: true }),
        }
    );
}

#[test]
fn mm2_direction_frame() {
    // extended nibble 5 with a speed below 8 reuses the speed nibble
    let mut source = MockPulseSource::new();
    source.push_motorola(&MotorolaPacket::mm2(3, 3, 2, 5)).finish();

    let events = decode(&source);
    assert!(matches!(
        &events[0],
        DecodeEvent::Motorola(frame) if matches!(
            frame.command,
            MotorolaCommand::Mm2 { detail: Some(Mm2Detail::Direction(Direction::Forward)), .. }
        )
    ));
}

#[test]
fn frequency2_solenoid_frame() {
    let packet = MotorolaPacket {
        address: 5,
        function: 0,
        data: 0b1001,
        extended: 0b1001,
        frequency2: true,
    };
    let mut source = MockPulseSource::new();
    source.push_motorola(&packet).finish();

    let events = decode(&source);
    let DecodeEvent::Motorola(frame) = &events[0] else {
        panic!("expected Motorola frame");
    };
    assert!(frame.raw.frequency2);
    assert_eq!(
        frame.command,
        MotorolaCommand::Accessory {
            base: 5,
            number: 21,
            port: 1,
            on: true
        }
    );
    assert_eq!(frame.command.packet(&frame.raw), None);
}

// ============================================================================
// DCC
// ============================================================================

#[test]
fn dcc_idle_packet() {
    let mut source = MockPulseSource::new();
    source.push_dcc(DccPacket::idle().bytes(), 14);

    let events = decode(&source);
    assert_eq!(events.len(), 1);
    let DecodeEvent::Dcc(frame) = &events[0] else {
        panic!("expected DCC frame");
    };
    assert_eq!(frame.outcome, DccOutcome::Idle);
    assert_eq!(frame.bytes.as_slice(), &[0xFF, 0x00, 0xFF]);
    assert!(frame.packet().is_none());
}

#[test]
fn dcc_short_address_speed_packet() {
    let packet = DccPacket::with_checksum(&[3, 0x76]).unwrap();
    let mut source = MockPulseSource::new();
    source.push_dcc(packet.bytes(), 16);

    let events = decode(&source);
    let DecodeEvent::Dcc(frame) = &events[0] else {
        panic!("expected DCC frame");
    };
    match &frame.outcome {
        DccOutcome::Locomotive {
            address,
            instructions,
        } => {
            assert_eq!(*address, DccAddress::Short(3));
            assert_eq!(
                instructions.as_slice(),
                &[DccInstruction::Speed {
                    direction: Direction::Forward,
                    step: 6,
                    c_bit: true
                }]
            );
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(frame.packet(), Some(packet));
}

#[test]
fn dcc_long_address_packet() {
    let packet = DccPacket::with_checksum(&[0xC4, 0xD2, 0x76]).unwrap();
    let mut source = MockPulseSource::new();
    source.push_dcc(packet.bytes(), 14);

    let events = decode(&source);
    assert!(matches!(
        &events[0],
        DecodeEvent::Dcc(frame) if matches!(
            frame.outcome,
            DccOutcome::Locomotive { address: DccAddress::Long(1234), .. }
        )
    ));
}

#[test]
fn dcc_checksum_error() {
    let mut bytes = DccPacket::with_checksum(&[3, 0x76]).unwrap().bytes().to_vec();
    let computed = bytes[2];
    bytes[2] ^= 0x10;
    let mut source = MockPulseSource::new();
    source.push_dcc(&bytes, 14);

    let events = decode(&source);
    let DecodeEvent::Dcc(frame) = &events[0] else {
        panic!("expected DCC frame");
    };
    assert_eq!(
        frame.outcome,
        DccOutcome::ChecksumError {
            computed,
            received: computed ^ 0x10
        }
    );
    assert!(frame.packet().is_none());
}

#[test]
fn dcc_accessory_uses_configured_offset() {
    let packet = DccPacket::with_checksum(&[0x81, 0xF9]).unwrap();
    let mut source = MockPulseSource::new();
    source.push_dcc(packet.bytes(), 14);

    let accessory = |decoder: &mut PulseDecoder| match decode_with(decoder, &source).first() {
        Some(DecodeEvent::Dcc(frame)) => match frame.outcome {
            DccOutcome::Accessory(acc) => acc,
            ref other => panic!("unexpected outcome {:?}", other),
        },
        other => panic!("unexpected event {:?}", other),
    };

    assert_eq!(
        accessory(&mut PulseDecoder::new()),
        DccAccessory::Basic {
            address: 5,
            port: 1,
            active: true
        }
    );
    assert_eq!(
        accessory(&mut PulseDecoder::new().with_accessory_offset(0)).address(),
        4
    );
}

#[test]
fn back_to_back_dcc_packets() {
    let speed = DccPacket::with_checksum(&[3, 0x76]).unwrap();
    let mut source = MockPulseSource::new();
    source
        .push_dcc(DccPacket::idle().bytes(), 14)
        .push_dcc(speed.bytes(), 14)
        .push_dcc(DccPacket::idle().bytes(), 14);

    let events = decode(&source);
    let outcomes: Vec<bool> = events
        .iter()
        .map(|e| matches!(e, DecodeEvent::Dcc(frame) if frame.outcome == DccOutcome::Idle))
        .collect();
    assert_eq!(outcomes, vec![true, false, true]);
}

// ============================================================================
// MFX
// ============================================================================

#[test]
fn mfx_drive_packet() {
    let packet = MfxPacket::drive(5, true, 100).unwrap();
    let mut source = MockPulseSource::new();
    source.push_mfx(&packet).finish();

    let events = decode(&source);
    assert_eq!(events.len(), 1);
    let DecodeEvent::Mfx(frame) = &events[0] else {
        panic!("expected MFX frame, got {:?}", events[0]);
    };
    assert_eq!(
        frame.fields(),
        Some(
            &[
                MfxField::address(5),
                MfxField::Speed {
                    forward: true,
                    fine: true,
                    value: 100
                }
            ][..]
        )
    );
    assert_eq!(frame.packet(), Some((5, packet)));
}

#[test]
fn mfx_crc_error_reports_no_fields() {
    let packet = MfxPacket::drive(5, true, 100).unwrap();
    let flipped = packet.bits().enumerate().map(|(i, b)| if i == 4 { !b } else { b });
    let mut source = MockPulseSource::new();
    source.push_mfx_bits(flipped).finish();

    let events = decode(&source);
    assert_eq!(events.len(), 1);
    let DecodeEvent::Mfx(frame) = &events[0] else {
        panic!("expected MFX frame");
    };
    assert!(matches!(frame.outcome, MfxOutcome::CrcError { .. }));
    assert!(frame.fields().is_none());
    assert!(frame.packet().is_none());
}

#[test]
fn mfx_between_motorola_frames() {
    let mm = MotorolaPacket::mm1(24, false, 5);
    let mut source = MockPulseSource::new();
    source
        .push_motorola(&mm)
        .push_mfx(&MfxPacket::drive(12, false, 3).unwrap())
        .push_motorola(&mm)
        .finish();

    let events = decode(&source);
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], DecodeEvent::Motorola(_)));
    assert!(matches!(&events[1], DecodeEvent::Mfx(frame) if frame.packet().is_some()));
    assert!(matches!(&events[2], DecodeEvent::Motorola(_)));
}
