// Protocol constants for HLK-LD2402

/// Header of command and acknowledgment frames
pub const CMD_HEADER: [u8; 4] = [0xFD, 0xFC, 0xFB, 0xFA];

/// Footer of command and acknowledgment frames
pub const CMD_FOOTER: [u8; 4] = [0x04, 0x03, 0x02, 0x01];

/// Header of data (report) frames
pub const REPORT_HEADER: [u8; 4] = [0xF4, 0xF3, 0xF2, 0xF1];

/// Footer of data (report) frames
pub const REPORT_FOOTER: [u8; 4] = [0xF8, 0xF7, 0xF6, 0xF5];

/// Size of a frame marker (header or footer)
pub const MARKER_SIZE: usize = 4;

/// Size of the little-endian length field following the header
pub const LENGTH_SIZE: usize = 2;

/// Bytes around the body: header, length and footer
pub const FRAME_OVERHEAD: usize = MARKER_SIZE + LENGTH_SIZE + MARKER_SIZE;

/// Largest body length accepted from the wire
pub const MAX_BODY_LEN: usize = 256;

/// Longest ASCII report line (without terminator)
pub const MAX_LINE_LEN: usize = 64;

/// Number of distance gates
pub const GATE_COUNT: usize = 14;

/// Highest valid gate index
pub const MAX_GATE: u8 = (GATE_COUNT - 1) as u8;

/// Bit set in the command word of every acknowledgment
pub const ACK_FLAG: u16 = 0x0100;

/// ACK status meaning success
pub const STATUS_OK: u16 = 0x0000;

/// Payload of the enter-configuration command
pub const ENABLE_CONFIG_VALUE: u16 = 0x0001;

/// Size of a report header: detection byte plus distance
pub const REPORT_HEADER_SIZE: usize = 3;

/// Size of one gate energy value
pub const ENERGY_SIZE: usize = 4;

/// Threshold range in dB
pub const MIN_THRESHOLD_DB: f32 = 0.0;
pub const MAX_THRESHOLD_DB: f32 = 95.0;

/// Max distance range in meters
pub const MIN_MAX_DISTANCE_M: f32 = 0.7;
pub const MAX_MAX_DISTANCE_M: f32 = 10.0;

/// Calibration coefficient range
pub const MIN_CALIBRATION_FACTOR: f32 = 1.0;
pub const MAX_CALIBRATION_FACTOR: f32 = 20.0;

/// Default calibration coefficient (sent as 30)
pub const DEFAULT_CALIBRATION_FACTOR: f32 = 3.0;

/// Prefix of the normal-mode distance line
pub const DISTANCE_LINE_PREFIX: &str = "distance:";

/// Normal-mode line sent when the target leaves
pub const NO_TARGET_LINE: &str = "OFF";

/// Upper bound for every configured timeout and interval
pub const MAX_CONFIG_DURATION: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);
