//! Telemetry frame decoding into a [`DeviceSlot`].

use crate::freshness::Freshness;
use crate::protocol::{Command, SENSOR_COUNT};
use crate::slot::DeviceSlot;
use tracing::trace;

/// What a frame changed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decoded {
    Readings { start: usize },
    CalibrationDark { start: usize },
    CalibrationBright { start: usize },
    Center { center: u16 },
    Unknown { command: u8 },
}

/// Three big-endian values at bytes 1..7.
fn triple(data: &[u8; 8]) -> [u16; 3] {
    [
        u16::from_be_bytes([data[1], data[2]]),
        u16::from_be_bytes([data[3], data[4]]),
        u16::from_be_bytes([data[5], data[6]]),
    ]
}

fn write_triple(buf: &mut [u16; SENSOR_COUNT], start: usize, values: [u16; 3]) {
    for (slot, v) in buf.iter_mut().skip(start).zip(values) {
        *slot = v;
    }
}

/// Apply one board-specific payload. Never touches `slot.mode`; stamps
/// `last_reading_ms` only for frames that complete a reading cycle.
pub fn decode_payload(slot: &mut DeviceSlot, data: &[u8; 8], now_ms: u64) -> Decoded {
    let Some(command) = Command::from_byte(data[0]) else {
        return Decoded::Unknown { command: data[0] };
    };
    trace!(command = command.name(), "decoding");
    match command {
        Command::Sensors1To3 | Command::Sensors4To6 | Command::Sensors7To9 => {
            let (start, bit) = match command {
                Command::Sensors1To3 => (0, Freshness::READINGS_1_TO_3),
                Command::Sensors4To6 => (3, Freshness::READINGS_4_TO_6),
                _ => (6, Freshness::READINGS_7_TO_9),
            };
            slot.readings.set_analog(start, triple(data));
            slot.freshness.mark(bit);
            if start == 6 {
                slot.last_reading_ms = Some(now_ms);
            }
            Decoded::Readings { start }
        }
        Command::CalibrationDark1To3
        | Command::CalibrationDark4To6
        | Command::CalibrationDark7To9 => {
            // Only the last dark fragment has room in the freshness byte.
            let (start, bit) = match command {
                Command::CalibrationDark1To3 => (0, 0),
                Command::CalibrationDark4To6 => (3, 0),
                _ => (6, Freshness::DARK_7_TO_9),
            };
            write_triple(&mut slot.calibration_dark, start, triple(data));
            slot.freshness.mark(bit);
            Decoded::CalibrationDark { start }
        }
        Command::CalibrationBright1To3
        | Command::CalibrationBright4To6
        | Command::CalibrationBright7To9 => {
            let (start, bit) = match command {
                Command::CalibrationBright1To3 => (0, Freshness::BRIGHT_1_TO_3),
                Command::CalibrationBright4To6 => (3, Freshness::BRIGHT_4_TO_6),
                _ => (6, Freshness::BRIGHT_7_TO_9),
            };
            write_triple(&mut slot.calibration_bright, start, triple(data));
            slot.freshness.mark(bit);
            Decoded::CalibrationBright { start }
        }
        Command::SensorsCenter => {
            let center = u16::from_le_bytes([data[1], data[2]]);
            let mut levels = [0u8; SENSOR_COUNT];
            for (i, level) in levels.iter_mut().take(8).enumerate() {
                *level = (data[3] >> (7 - i)) & 1;
            }
            // The ninth transistor arrives as a whole byte.
            levels[8] = data[4];
            slot.center = center;
            slot.readings.set_digital(levels);
            slot.freshness.mark(Freshness::READINGS);
            slot.last_reading_ms = Some(now_ms);
            Decoded::Center { center }
        }
        Command::MeasureOnceCenter
        | Command::MeasureContinuousCenter
        | Command::Calibrate
        | Command::CalibrationDataRequest
        | Command::ReportAliveQueueless
        | Command::RecordPeak
        | Command::RefreshMs => Decoded::Unknown { command: data[0] },
    }
}
