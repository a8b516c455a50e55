//! reflectance-array: driver for CAN-attached infrared reflectance sensor arrays
//!
//! Each board carries nine phototransistors and streams either raw analog
//! intensities or dark/bright bits with a computed line center. The driver
//! tracks up to eight boards, negotiates their streaming mode, reassembles
//! fragmented telemetry and answers line-following queries on top of it.

mod protocol;
pub use protocol::{command_name, common, ids_for_slot, Command, CAN_IDS, MAX_BOARDS, SENSOR_COUNT};

mod error;
pub use error::{DriverError, Result};

mod config;
pub use config::{load_config_file, ArrayConfig};

mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

mod mode;
pub use mode::{Mode, PeakMode, Readings};

mod freshness;
pub use freshness::Freshness;

mod slot;
pub use slot::DeviceSlot;

mod registry;
pub use registry::{BoardEntry, BoardRegistry};

pub mod negotiate;

mod decode;
pub use decode::{decode_payload, Decoded};

mod driver;
pub use driver::{DeviceSnapshot, ReflectanceArray, Target};

mod metrics;
pub use metrics::{ArrayMetrics, MetricsHub};

pub mod sim;
