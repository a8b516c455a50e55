use crate::error::{DriverError, Result};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct ArrayMetrics {
    pub frames_decoded: IntCounter,
    pub frames_unclaimed: IntCounter,
    pub unknown_commands: IntCounter,
    pub start_commands: IntCounter,
    pub negotiation_failures: IntCounter,
    pub boards_registered: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub array: ArrayMetrics,
}

fn counter(name: &str, help: &str) -> Result<IntCounter> {
    IntCounter::new(name, help).map_err(|e| DriverError::Metrics(e.to_string()))
}

impl MetricsHub {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let array = ArrayMetrics {
            frames_decoded: counter("refl_frames_decoded", "Frames decoded for a registered array")?,
            frames_unclaimed: counter(
                "refl_frames_unclaimed",
                "Frames received that belong to no registered array",
            )?,
            unknown_commands: counter(
                "refl_unknown_commands",
                "Frames with a command the driver cannot decode",
            )?,
            start_commands: counter("refl_start_commands", "Start-streaming commands sent")?,
            negotiation_failures: counter(
                "refl_negotiation_failures",
                "Mode negotiations that exhausted every attempt",
            )?,
            boards_registered: IntGauge::new(
                "refl_boards_registered",
                "Number of reflectance arrays registered",
            )
            .map_err(|e| DriverError::Metrics(e.to_string()))?,
        };
        let _ = registry.register(Box::new(array.frames_decoded.clone()));
        let _ = registry.register(Box::new(array.frames_unclaimed.clone()));
        let _ = registry.register(Box::new(array.unknown_commands.clone()));
        let _ = registry.register(Box::new(array.start_commands.clone()));
        let _ = registry.register(Box::new(array.negotiation_failures.clone()));
        let _ = registry.register(Box::new(array.boards_registered.clone()));
        Ok(Self { registry, array })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
