use serde::{Deserialize, Serialize};

/// Which telemetry fragments arrived since the last reset, one bit each.
///
/// Bits 7..5 belong to the reading fragments (1-3, 4-6, 7-9), bits 4..2 to the
/// bright calibration fragments. Only the 7-9 dark calibration fragment is
/// tracked, using the two remaining low bits.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Freshness(pub u8);

impl Freshness {
    pub const READINGS_1_TO_3: u8 = 0b1000_0000;
    pub const READINGS_4_TO_6: u8 = 0b0100_0000;
    pub const READINGS_7_TO_9: u8 = 0b0010_0000;
    pub const BRIGHT_1_TO_3: u8 = 0b0001_0000;
    pub const BRIGHT_4_TO_6: u8 = 0b0000_1000;
    pub const BRIGHT_7_TO_9: u8 = 0b0000_0100;
    pub const DARK_7_TO_9: u8 = 0b0000_0011;

    pub const READINGS: u8 = 0b1110_0000;
    pub const CALIBRATION: u8 = 0b0001_1100;
    /// Bits owned by calibration data: bright fragments plus the dark tail.
    pub const CALIBRATION_ALL: u8 = Self::CALIBRATION | Self::DARK_7_TO_9;

    pub fn fresh() -> Self {
        Freshness(0xFF)
    }

    pub fn mark(&mut self, bits: u8) {
        self.0 |= bits;
    }

    pub fn readings_set(&mut self, fresh: bool) {
        self.apply(Self::READINGS, fresh);
    }

    pub fn calibration_set(&mut self, fresh: bool) {
        self.apply(Self::CALIBRATION_ALL, fresh);
    }

    /// Bright fragments only; the dark tail does not gate waiting.
    pub fn calibration_fresh(self) -> bool {
        self.0 & Self::CALIBRATION == Self::CALIBRATION
    }

    pub fn all_fresh(self) -> bool {
        self.0 == 0xFF
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    fn apply(&mut self, mask: u8, fresh: bool) {
        if fresh {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

impl Default for Freshness {
    fn default() -> Self {
        Self::fresh()
    }
}
