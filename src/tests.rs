use crate::codec::{Decoded, FrameDecoder, decode_frame};
use crate::command::{Ack, Command, CommandWord, Gate, Parameter, Reply, Threshold};
use crate::frame::Frame;
use crate::reading::Reading;
use crate::report::{Detection, Report, decode_report};
use bytes::Bytes;

fn hex_frame(hex_data: &str) -> Frame {
    let bytes = hex::decode(hex_data).expect("Failed to decode hex");
    decode_frame(&bytes).expect("Failed to parse frame")
}

#[test]
fn test_parse_enable_config_ack() {
    let frame = hex_frame("fdfcfbfa0800ff0100000100400004030201");
    assert!(frame.is_ack());
    assert_eq!(frame.command_word(), Some(CommandWord::EnableConfig));

    let ack = Ack::from_frame(&frame).expect("Failed to parse ack");
    assert!(ack.is_success());
    assert_eq!(
        Reply::parse(&Command::EnterConfig, &ack).unwrap(),
        Reply::ConfigOpened {
            protocol_version: 1,
            buffer_size: 0x40
        }
    );
}

#[test]
fn test_parse_firmware_ack() {
    let frame = hex_frame("fdfcfbfa0c0000010000060076332e332e3504030201");
    let ack = Ack::from_frame(&frame).unwrap();
    assert_eq!(ack.command, CommandWord::ReadFirmwareVersion);
    assert_eq!(
        Reply::parse(&Command::QueryFirmwareVersion, &ack).unwrap(),
        Reply::FirmwareVersion("v3.3.5".to_string())
    );
}

#[test]
fn test_parse_calibration_progress_ack() {
    let frame = hex_frame("fdfcfbfa06000a010000320004030201");
    let ack = Ack::from_frame(&frame).unwrap();
    assert_eq!(
        Reply::parse(&Command::QueryCalibrationProgress, &ack).unwrap(),
        Reply::CalibrationProgress(50)
    );
}

#[test]
fn test_parse_read_parameter_ack() {
    let frame = hex_frame("fdfcfbfa0800080100003200000004030201");
    let ack = Ack::from_frame(&frame).unwrap();
    assert_eq!(ack.command, CommandWord::ReadParameter);
    assert_eq!(
        Reply::parse(&Command::ReadParameter(Parameter::MaxDistance), &ack).unwrap(),
        Reply::Parameter {
            parameter: Parameter::MaxDistance,
            value: 50
        }
    );
}

#[test]
fn test_parse_data_frame() {
    let frame = hex_frame("f4f3f2f10b00019600e803000064000000f8f7f6f5");
    assert_eq!(
        Report::parse(&frame).unwrap(),
        Report::Data {
            detection: Detection::Movement,
            distance_cm: 150,
            motion_energy: vec![1000, 100],
            micro_energy: vec![],
        }
    );

    let mut prior = Reading::default();
    prior.gate_energy[2] = 77;
    let reading = decode_report(&frame, &prior).unwrap();
    assert!(reading.presence && reading.movement && !reading.micromovement);
    assert_eq!(reading.distance_mm, 1500);
    assert_eq!(&reading.gate_energy[..3], &[1000, 100, 77]);
    assert!((reading.gate_energy_db(Gate::new(0).unwrap()) - 30.0).abs() < 1e-4);
}

#[test]
fn test_decode_mixed_stream() {
    let mut stream = Vec::new();
    stream.extend_from_slice(b"distance:87\r\n");
    stream.extend(hex::decode("fdfcfbfa0400fe01000004030201").unwrap());
    stream.extend_from_slice(b"OFF\r\n");

    let mut decoder = FrameDecoder::new();
    decoder.push(&stream);
    assert_eq!(decoder.decode(), Decoded::Frame(Frame::Text("distance:87".to_string())));
    match decoder.decode() {
        Decoded::Frame(frame) => assert_eq!(
            Ack::from_frame(&frame).map(|ack| ack.command),
            Some(CommandWord::DisableConfig)
        ),
        other => panic!("expected exit configuration ack, got {:?}", other),
    }
    assert_eq!(decoder.decode(), Decoded::Frame(Frame::Text("OFF".to_string())));
    assert_eq!(decoder.decode(), Decoded::NeedMoreBytes);
}

#[test]
fn test_threshold_command_bytes() {
    let command = Command::SetGateMotionThreshold {
        gate: Gate::new(5).unwrap(),
        threshold: Threshold::from_db(30.0).unwrap(),
    };
    // parameter 0x0015 = 1000
    assert_eq!(
        hex::encode(command.encode().unwrap()),
        "fdfcfbfa080007001500e803000004030201"
    );
}

#[test]
fn test_nack_status() {
    let ack = Ack {
        command: CommandWord::SaveParameters,
        status: 1,
        payload: Bytes::new(),
    };
    let frame = hex_frame(&hex::encode(ack.to_frame().encode().unwrap()));
    assert_eq!(hex::encode(ack.to_frame().encode().unwrap()), "fdfcfbfa0400fd01010004030201");
    let parsed = Ack::from_frame(&frame).unwrap();
    assert!(!parsed.is_success());
    assert_eq!(parsed.status, 1);
}
