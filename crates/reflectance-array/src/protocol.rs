//! Wire-level constants of the reflectance array protocol.

use serde::{Deserialize, Serialize};

/// Number of phototransistors on every board.
pub const SENSOR_COUNT: usize = 9;

/// Upper bound on attached boards, fixed by the CAN ID table.
pub const MAX_BOARDS: usize = 8;

/// Error code recorded when a frame carries a command this driver cannot decode.
pub const UNKNOWN_COMMAND_ERROR_CODE: u16 = 201;

/// `(to device, from device)` standard IDs for each board slot.
pub const CAN_IDS: [(u16, u16); MAX_BOARDS] = [
    (0x160, 0x161),
    (0x162, 0x163),
    (0x164, 0x165),
    (0x166, 0x167),
    (0x168, 0x169),
    (0x16A, 0x16B),
    (0x16C, 0x16D),
    (0x16E, 0x16F),
];

/// Commands shared by every board of the family. The parent board framework
/// owns their meaning; this driver only emits or recognizes them.
pub mod common {
    pub const MEASURE_CONTINUOUS: u8 = 0x10;
    pub const PNP_ENABLE: u8 = 0x28;
    pub const PNP_DISABLE: u8 = 0x29;
    pub const FPS_SENDING: u8 = 0x31;
    pub const NOTIFICATION: u8 = 0x41;
    pub const ERROR: u8 = 0xEE;
    pub const REPORT_ALIVE: u8 = 0xFF;
}

/// Reflectance-array specific command bytes (payload byte 0).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    MeasureOnceCenter = 0x04,
    MeasureContinuousCenter = 0x05,
    Sensors1To3 = 0x06,
    Sensors4To6 = 0x07,
    Sensors7To9 = 0x08,
    Calibrate = 0x09,
    CalibrationDark1To3 = 0x0A,
    CalibrationDark4To6 = 0x0B,
    CalibrationDark7To9 = 0x0C,
    CalibrationDataRequest = 0x0D,
    SensorsCenter = 0x0E,
    CalibrationBright1To3 = 0x0F,
    CalibrationBright4To6 = 0x50,
    CalibrationBright7To9 = 0x51,
    ReportAliveQueueless = 0x53,
    RecordPeak = 0x54,
    RefreshMs = 0x55,
}

/// Display names, in wire order. Built once, read-only.
static COMMAND_NAMES: [(Command, &str); 17] = [
    (Command::MeasureOnceCenter, "Meas once"),
    (Command::MeasureContinuousCenter, "Meas cont"),
    (Command::Sensors1To3, "Send 1-3"),
    (Command::Sensors4To6, "Send 4-6"),
    (Command::Sensors7To9, "Send 7-9"),
    (Command::Calibrate, "Calibrate"),
    (Command::CalibrationDark1To3, "Ca dd 1-3"),
    (Command::CalibrationDark4To6, "Ca dd 4-6"),
    (Command::CalibrationDark7To9, "Ca dd 7-9"),
    (Command::CalibrationDataRequest, "Cal d req"),
    (Command::SensorsCenter, "Send s ce"),
    (Command::CalibrationBright1To3, "Ca db 1-3"),
    (Command::CalibrationBright4To6, "Ca db 4-6"),
    (Command::CalibrationBright7To9, "Ca db 7-9"),
    (Command::ReportAliveQueueless, "Re ali ql"),
    (Command::RecordPeak, "Rec peak"),
    (Command::RefreshMs, "Refres ms"),
];

impl Command {
    pub fn all() -> impl Iterator<Item = Command> {
        COMMAND_NAMES.iter().map(|(c, _)| *c)
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        COMMAND_NAMES
            .iter()
            .map(|(c, _)| *c)
            .find(|c| c.byte() == b)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        COMMAND_NAMES
            .iter()
            .find(|(c, _)| *c == self)
            .map(|(_, n)| *n)
            .unwrap_or("?")
    }
}

/// Name of any command byte, for diagnostics.
pub fn command_name(b: u8) -> &'static str {
    match Command::from_byte(b) {
        Some(c) => c.name(),
        None => match b {
            common::MEASURE_CONTINUOUS => "Meas cont (common)",
            common::PNP_ENABLE => "PnP on",
            common::PNP_DISABLE => "PnP off",
            common::FPS_SENDING => "FPS",
            common::NOTIFICATION => "Notific",
            common::ERROR => "Error",
            common::REPORT_ALIVE => "Alive",
            _ => "unknown",
        },
    }
}

/// IDs assigned to the board registered at `slot`.
pub fn ids_for_slot(slot: usize) -> Option<(u16, u16)> {
    CAN_IDS.get(slot).copied()
}
