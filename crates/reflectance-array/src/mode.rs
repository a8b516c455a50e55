use crate::protocol::SENSOR_COUNT;
use serde::{Deserialize, Serialize};

/// Streaming mode a board is negotiated into. Only one is active at a time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Raw analog intensity for every transistor.
    Analog,
    /// Dark/bright bits plus the centroid of bright transistors.
    DigitalBrightCenter,
    /// Dark/bright bits plus the centroid of dark transistors.
    DigitalDarkCenter,
}

impl Mode {
    /// Argument of the common start-streaming command.
    pub fn start_code(self) -> u8 {
        match self {
            Mode::Analog => 0,
            Mode::DigitalDarkCenter => 1,
            Mode::DigitalBrightCenter => 2,
        }
    }

    pub fn center(of_dark: bool) -> Self {
        if of_dark {
            Mode::DigitalDarkCenter
        } else {
            Mode::DigitalBrightCenter
        }
    }

    pub fn is_digital(self) -> bool {
        !matches!(self, Mode::Analog)
    }
}

/// Peak recording between refreshes, sent with the record-peak command.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakMode {
    #[default]
    None,
    Max,
    Min,
}

impl PeakMode {
    pub fn code(self) -> u8 {
        match self {
            PeakMode::None => 0,
            PeakMode::Max => 1,
            PeakMode::Min => 2,
        }
    }
}

/// Last decoded per-transistor values.
///
/// The variant follows the kind of frame that filled the buffer: reading
/// fragments produce `Analog`, the combined center frame produces `Digital`.
/// In `Digital`, entries 0..8 are single bits (1 means the transistor's state
/// matches the active center mode) while entry 8 is the raw byte the board sent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readings {
    Analog([u16; SENSOR_COUNT]),
    Digital([u8; SENSOR_COUNT]),
}

impl Default for Readings {
    fn default() -> Self {
        Readings::Analog([0; SENSOR_COUNT])
    }
}

impl Readings {
    /// Write three analog values starting at `start`. A digital buffer is
    /// widened first, so untouched entries keep their previous numbers.
    pub fn set_analog(&mut self, start: usize, values: [u16; 3]) {
        if let Readings::Digital(bits) = *self {
            *self = Readings::Analog(bits.map(u16::from));
        }
        if let Readings::Analog(buf) = self {
            for (slot, v) in buf.iter_mut().skip(start).zip(values) {
                *slot = v;
            }
        }
    }

    pub fn set_digital(&mut self, levels: [u8; SENSOR_COUNT]) {
        *self = Readings::Digital(levels);
    }

    pub fn analog(&self) -> Option<&[u16; SENSOR_COUNT]> {
        match self {
            Readings::Analog(v) => Some(v),
            Readings::Digital(_) => None,
        }
    }

    pub fn digital(&self) -> Option<&[u8; SENSOR_COUNT]> {
        match self {
            Readings::Digital(v) => Some(v),
            Readings::Analog(_) => None,
        }
    }
}
