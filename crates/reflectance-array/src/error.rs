use can_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = DriverError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("too many reflectance arrays: {requested} (max {max})")]
    TooManyBoards { requested: usize, max: usize },
    #[error("reflectance array {device} doesn't exist")]
    NoSuchDevice { device: usize },
    #[error("transistor {transistor} doesn't exist")]
    NoSuchTransistor { transistor: usize },
    #[error("reflectance array {device} dead")]
    DeviceDead { device: usize },
    #[error("unknown command 0x{command:02X} from reflectance array {device}")]
    UnknownCommand { device: usize, command: u8 },
    #[error("calibration of reflectance array {device} timed out")]
    CalibrationTimeout { device: usize },
    #[error("calibration data timeout for reflectance array {device}")]
    CalibrationDataTimeout { device: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("metrics init error: {0}")]
    Metrics(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DriverError {
    /// Numeric code kept in the sticky error field, where one is defined.
    pub fn code(&self) -> Option<u16> {
        match self {
            DriverError::UnknownCommand { .. } => {
                Some(crate::protocol::UNKNOWN_COMMAND_ERROR_CODE)
            }
            _ => None,
        }
    }

    pub fn device(&self) -> Option<usize> {
        match self {
            DriverError::NoSuchDevice { device }
            | DriverError::DeviceDead { device }
            | DriverError::UnknownCommand { device, .. }
            | DriverError::CalibrationTimeout { device }
            | DriverError::CalibrationDataTimeout { device } => Some(*device),
            _ => None,
        }
    }
}
