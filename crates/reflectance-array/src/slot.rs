use crate::freshness::Freshness;
use crate::mode::{Mode, Readings};
use crate::protocol::SENSOR_COUNT;
use serde::{Deserialize, Serialize};

/// Decoded state of one board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSlot {
    /// Set only by a successful negotiation.
    pub mode: Option<Mode>,
    pub transistor_count: u8,
    /// Stamp of the last frame that completes a reading cycle.
    pub last_reading_ms: Option<u64>,
    pub freshness: Freshness,
    pub readings: Readings,
    pub calibration_dark: [u16; SENSOR_COUNT],
    pub calibration_bright: [u16; SENSOR_COUNT],
    /// Centroid in board units, 1000 under transistor 1 up to 9000.
    pub center: u16,
}

impl Default for DeviceSlot {
    fn default() -> Self {
        Self {
            mode: None,
            transistor_count: SENSOR_COUNT as u8,
            last_reading_ms: None,
            freshness: Freshness::fresh(),
            readings: Readings::default(),
            calibration_dark: [0; SENSOR_COUNT],
            calibration_bright: [0; SENSOR_COUNT],
            center: 0,
        }
    }
}

impl DeviceSlot {
    /// Transistors worth reading, never more than the buffer holds.
    pub fn active_transistors(&self) -> usize {
        usize::from(self.transistor_count).min(SENSOR_COUNT)
    }

    /// Midpoint between the stored dark and bright levels of one transistor.
    pub fn threshold(&self, transistor: usize) -> Option<u16> {
        let dark = u32::from(*self.calibration_dark.get(transistor)?);
        let bright = u32::from(*self.calibration_bright.get(transistor)?);
        Some(((dark + bright) / 2) as u16)
    }
}
