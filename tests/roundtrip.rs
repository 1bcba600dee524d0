mod common;
use common::*;

fn every_command() -> Vec<Command> {
    let gate = Gate::new(13).unwrap();
    vec![
        Command::EnterConfig,
        Command::ExitConfig,
        Command::SetMaxDistance(MaxDistance::from_meters(0.7).unwrap()),
        Command::SetMaxDistance(MaxDistance::from_meters(10.0).unwrap()),
        Command::SetTimeout(0),
        Command::SetTimeout(u16::MAX),
        Command::SetGateMotionThreshold {
            gate,
            threshold: Threshold::from_db(95.0).unwrap(),
        },
        Command::SetGateMicromotionThreshold {
            gate: Gate::new(0).unwrap(),
            threshold: Threshold::from_db(0.0).unwrap(),
        },
        Command::StartCalibration(CalibrationFactors::new(1.0, 20.0, 3.5).unwrap()),
        Command::QueryCalibrationProgress,
        Command::EnableAutoGain,
        Command::SaveConfig,
        Command::SetWorkMode(WorkMode::Normal),
        Command::SetWorkMode(WorkMode::Engineering),
        Command::QueryFirmwareVersion,
        Command::ReadParameter(Parameter::DisappearDelay),
        Command::ReadParameter(Parameter::MicromotionThreshold(gate)),
    ]
}

#[test]
fn test_commands_survive_the_wire() {
    for command in every_command() {
        let bytes = command.encode().expect("Failed to encode command");
        let frame = decode_frame(&bytes).unwrap_or_else(|| panic!("{} did not decode", command));
        assert_eq!(Command::from_frame(&frame), Some(command), "{}", command);
        assert_eq!(frame.encode().unwrap(), bytes, "{} re-encodes differently", command);
    }
}

#[test]
fn test_acks_survive_the_wire() {
    for command in every_command() {
        let ack = SimulatedRadar::default()
            .reply(&command)
            .expect("simulator acknowledges everything by default");
        let frame = decode_frame(&ack).expect("Failed to decode ack");
        assert!(frame.is_ack());
        assert!(Command::from_frame(&frame).is_none());
        let parsed = Ack::from_frame(&frame).unwrap();
        assert_eq!(parsed.command, command.word());
        assert!(Reply::parse(&command, &parsed).is_ok(), "{}", command);
    }
}

#[test]
fn test_reports_survive_the_wire() {
    let reports = [
        Report::NoTarget,
        Report::Distance { distance_mm: 0 },
        Report::Distance { distance_mm: 9990 },
        Report::Distance { distance_mm: 876 },
        Report::Data {
            detection: Detection::NoTarget,
            distance_cm: 0,
            motion_energy: vec![],
            micro_energy: vec![],
        },
        Report::Data {
            detection: Detection::Movement,
            distance_cm: 640,
            motion_energy: (0..14).map(|g| g << 20).collect(),
            micro_energy: (0..14).map(|g| u32::MAX - g).collect(),
        },
    ];
    for report in reports {
        let bytes = report.to_frame().encode().unwrap();
        let frame = decode_frame(&bytes).unwrap();
        assert_eq!(Report::parse(&frame), Ok(report));
    }
}
