//! The reflectance array driver.
//!
//! Everything runs on the caller's thread. Blocking operations (mode
//! negotiation, calibration, calibration data requests) repeatedly call
//! [`ReflectanceArray::service`], which drains the bus and feeds every frame
//! to the decoder; that is how a confirmation can arrive while a wait loop is
//! still spinning. Failures never escape as errors from the queries: they
//! return `0`/`false` and leave a sticky diagnostic behind.

use crate::clock::Clock;
use crate::config::ArrayConfig;
use crate::decode::{decode_payload, Decoded};
use crate::error::{DriverError, Result};
use crate::metrics::ArrayMetrics;
use crate::mode::{Mode, PeakMode};
use crate::negotiate::{Negotiation, NegotiationLimits, Step};
use crate::protocol::{command_name, common, Command, SENSOR_COUNT};
use crate::registry::BoardRegistry;
use crate::slot::DeviceSlot;
use can_transport::{CanBus, CanFrame, CanId, TransportError};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use tracing::{debug, info, warn};

const BOARDS_NAME: &str = "ReflArray";
const UNCLAIMED_CAPACITY: usize = 64;
const BROADCAST_SPACING_US: u64 = 800;

/// Which boards a command goes to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Target {
    All,
    Device(usize),
}

impl From<usize> for Target {
    fn from(device: usize) -> Self {
        Target::Device(device)
    }
}

/// Serializable view of one board.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub device: usize,
    pub name: String,
    pub id_in: u16,
    pub id_out: u16,
    pub alive: bool,
    #[serde(flatten)]
    pub slot: DeviceSlot,
}

pub struct ReflectanceArray<B: CanBus, C: Clock> {
    bus: B,
    clock: C,
    config: ArrayConfig,
    limits: NegotiationLimits,
    registry: BoardRegistry,
    slots: Vec<DeviceSlot>,
    metrics: Option<ArrayMetrics>,
    last_error: Option<DriverError>,
    error_code: Option<u16>,
    error_device: Option<usize>,
    unclaimed: VecDeque<CanFrame>,
    last_test_ms: Option<u64>,
    record_peak: PeakMode,
}

fn is_dark(mode: Option<Mode>, level: u8) -> bool {
    match mode {
        Some(Mode::DigitalDarkCenter) => level == 1,
        _ => level == 0,
    }
}

impl<B: CanBus, C: Clock> ReflectanceArray<B, C> {
    /// Build a driver and register the boards listed in `config`.
    pub fn new(bus: B, clock: C, config: ArrayConfig) -> Result<Self> {
        config.validate()?;
        let mut array = Self {
            bus,
            clock,
            limits: NegotiationLimits::from(&config),
            registry: BoardRegistry::new(BOARDS_NAME, config.max_boards),
            slots: Vec::new(),
            metrics: None,
            last_error: None,
            error_code: None,
            error_device: None,
            unclaimed: VecDeque::new(),
            last_test_ms: None,
            record_peak: PeakMode::None,
            config,
        };
        for name in array.config.devices.clone() {
            array.add(&name)?;
        }
        Ok(array)
    }

    pub fn with_metrics(mut self, metrics: ArrayMetrics) -> Self {
        metrics.boards_registered.set(self.slots.len() as i64);
        self.metrics = Some(metrics);
        self
    }

    /// Register a board. Slots follow registration order and are never released.
    pub fn add(&mut self, name: &str) -> Result<usize> {
        match self.registry.add(name) {
            Ok(device) => {
                self.slots.push(DeviceSlot::default());
                if let Some(m) = &self.metrics {
                    m.boards_registered.set(self.slots.len() as i64);
                }
                Ok(device)
            }
            Err(e) => {
                self.report(e.clone());
                Err(e)
            }
        }
    }

    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn config(&self) -> &ArrayConfig {
        &self.config
    }

    pub fn registry(&self) -> &BoardRegistry {
        &self.registry
    }

    pub fn slot(&self, device: usize) -> Option<&DeviceSlot> {
        self.slots.get(device)
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn record_peak(&self) -> PeakMode {
        self.record_peak
    }

    pub fn last_error(&self) -> Option<&DriverError> {
        self.last_error.as_ref()
    }

    /// Sticky code and device of the last coded error (unknown command).
    pub fn error_code(&self) -> Option<(u16, usize)> {
        self.error_code.zip(self.error_device)
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.error_code = None;
        self.error_device = None;
    }

    fn report(&mut self, err: DriverError) {
        warn!(error = %err, "{BOARDS_NAME} diagnostic");
        if let Some(code) = err.code() {
            self.error_code = Some(code);
            self.error_device = err.device();
        }
        self.last_error = Some(err);
    }

    fn check_device(&mut self, device: usize) -> bool {
        if device < self.slots.len() {
            true
        } else {
            self.report(DriverError::NoSuchDevice { device });
            false
        }
    }

    fn check_transistor(&mut self, device: usize, transistor: usize) -> bool {
        if !self.check_device(device) {
            return false;
        }
        if transistor < SENSOR_COUNT {
            true
        } else {
            self.report(DriverError::NoSuchTransistor { transistor });
            false
        }
    }

    fn targets(&mut self, target: Target) -> Vec<usize> {
        match target {
            Target::All => (0..self.slots.len()).collect(),
            Target::Device(d) if self.check_device(d) => vec![d],
            Target::Device(_) => Vec::new(),
        }
    }

    // ---- Frame path -------------------------------------------------------

    /// Offer one received frame. Returns false if no registered board sent it.
    pub fn message_decode(&mut self, can_id: u32, data: &[u8; 8], len: u8) -> bool {
        let Some(device) = self.registry.slot_for(can_id) else {
            return false;
        };
        if let Some(m) = &self.metrics {
            m.frames_decoded.inc();
        }
        if self.registry.decode_common(device, data) {
            return true;
        }
        let now = self.clock.now_ms();
        match decode_payload(&mut self.slots[device], data, now) {
            Decoded::Unknown { command } => {
                let dump = self
                    .registry
                    .get(device)
                    .and_then(|b| CanId::standard(b.id_out))
                    .map(|id| CanFrame::from_parts(id, *data, len).to_string())
                    .unwrap_or_default();
                warn!(device, command, frame = %dump, "Unknown command.");
                if let Some(m) = &self.metrics {
                    m.unknown_commands.inc();
                }
                self.report(DriverError::UnknownCommand { device, command });
            }
            decoded => debug!(device, ?decoded, "decoded"),
        }
        true
    }

    pub fn decode_frame(&mut self, frame: &CanFrame) -> bool {
        self.message_decode(frame.id.raw(), &frame.data, frame.len)
    }

    /// Drain every pending frame from the bus into the decoder. Frames for other
    /// boards are kept for the host, see [`Self::take_unclaimed`].
    pub fn service(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.bus.recv(Some(0)) {
                Ok(frame) => {
                    handled += 1;
                    if !self.decode_frame(&frame) {
                        if let Some(m) = &self.metrics {
                            m.frames_unclaimed.inc();
                        }
                        if self.unclaimed.len() == UNCLAIMED_CAPACITY {
                            self.unclaimed.pop_front();
                        }
                        self.unclaimed.push_back(frame);
                    }
                }
                Err(TransportError::Timeout) => break,
                Err(e) => {
                    self.report(e.into());
                    break;
                }
            }
        }
        handled
    }

    pub fn take_unclaimed(&mut self) -> Vec<CanFrame> {
        self.unclaimed.drain(..).collect()
    }

    /// One iteration of a wait loop.
    fn pause(&mut self) {
        self.clock.delay_ms(1);
        self.service();
    }

    fn send(&mut self, device: usize, data: &[u8]) -> bool {
        let Some(id) = self
            .registry
            .get(device)
            .and_then(|b| CanId::standard(b.id_in))
        else {
            self.report(DriverError::NoSuchDevice { device });
            return false;
        };
        let Some(frame) = CanFrame::new(id, data) else {
            self.report(TransportError::InvalidFrame("payload longer than 8 bytes").into());
            return false;
        };
        debug!(device, command = command_name(data[0]), "send");
        match self.bus.send(&frame) {
            Ok(()) => true,
            Err(e) => {
                self.report(e.into());
                false
            }
        }
    }

    /// Alive flag of a board. With `check_again`, a board not known to be alive
    /// is pinged and given `alive_timeout_ms` to answer.
    pub fn alive(&mut self, device: usize, check_again: bool) -> bool {
        if self.registry.alive(device) || !check_again || device >= self.slots.len() {
            return self.registry.alive(device);
        }
        if !self.send(device, &[common::REPORT_ALIVE]) {
            return false;
        }
        let start = self.clock.now_ms();
        loop {
            self.service();
            if self.registry.alive(device) {
                return true;
            }
            if self.clock.now_ms().saturating_sub(start) >= self.config.alive_timeout_ms {
                return false;
            }
            self.clock.delay_ms(1);
        }
    }

    // ---- Mode negotiation -------------------------------------------------

    /// Make sure `device` streams in `mode`. Without `start_if_not` this only
    /// reports whether it already does.
    pub fn ensure_mode(&mut self, device: usize, mode: Mode, start_if_not: bool) -> bool {
        let Some(slot) = self.slots.get(device) else {
            return false;
        };
        let now = self.clock.now_ms();
        if self
            .limits
            .mode_current(slot.mode, mode, slot.last_reading_ms, now)
        {
            return true;
        }
        if !start_if_not {
            return false;
        }
        self.slots[device].last_reading_ms = None;
        let mut negotiation = Negotiation::new(mode, self.limits);
        loop {
            let last = self.slots[device].last_reading_ms;
            match negotiation.poll(self.clock.now_ms(), last) {
                Step::Send(m) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.start_commands.inc();
                    }
                    self.send(device, &[common::MEASURE_CONTINUOUS, m.start_code()]);
                    self.service();
                }
                Step::Wait => self.pause(),
                Step::Confirmed(m) => {
                    debug!(device, mode = ?m, attempts = negotiation.attempts(), "mode confirmed");
                    self.slots[device].mode = Some(m);
                    return true;
                }
                Step::TimedOut { attempts } => {
                    debug!(device, mode = ?mode, attempts, "no confirmation");
                    if let Some(metrics) = &self.metrics {
                        metrics.negotiation_failures.inc();
                    }
                    self.report(DriverError::DeviceDead { device });
                    return false;
                }
            }
        }
    }

    fn digital_active(&mut self, device: usize) -> bool {
        self.ensure_mode(device, Mode::DigitalBrightCenter, false)
            || self.ensure_mode(device, Mode::DigitalDarkCenter, false)
    }

    /// Any digital mode will do; otherwise start the preferred center mode.
    fn ensure_digital(&mut self, device: usize, prefer_dark: bool) -> bool {
        self.digital_active(device) || self.ensure_mode(device, Mode::center(prefer_dark), true)
    }

    // ---- Readings ---------------------------------------------------------

    /// Analog reading of one transistor. `0` on any failure.
    ///
    /// Does not ping the board first; call [`Self::alive`] with `check_again`
    /// to wake a board that has never been heard from.
    pub fn reading(&mut self, transistor: usize, device: usize) -> u16 {
        if !self.check_transistor(device, transistor) {
            return 0;
        }
        if !self.ensure_mode(device, Mode::Analog, true) {
            return 0;
        }
        self.slots[device]
            .readings
            .analog()
            .map(|a| a[transistor])
            .unwrap_or(0)
    }

    /// Is the transistor over a dark surface? `from_analog` thresholds the analog
    /// value against the calibration midpoint; otherwise the board's own bit is used.
    /// Like [`Self::reading`], no ping is sent.
    pub fn dark(&mut self, transistor: usize, device: usize, from_analog: bool) -> bool {
        if !self.check_transistor(device, transistor) {
            return false;
        }
        if from_analog {
            if !self.ensure_mode(device, Mode::Analog, true) {
                return false;
            }
            let slot = &self.slots[device];
            match (slot.readings.analog(), slot.threshold(transistor)) {
                (Some(values), Some(threshold)) => values[transistor] < threshold,
                _ => false,
            }
        } else {
            if !self.ensure_digital(device, true) {
                return false;
            }
            let slot = &self.slots[device];
            slot.readings
                .digital()
                .map(|levels| is_dark(slot.mode, levels[transistor]))
                .unwrap_or(false)
        }
    }

    /// Any transistor in `first..last` dark (or bright, with `dark == false`)?
    /// `last` is capped at 8 and at the configured transistor count.
    pub fn any(&mut self, dark: bool, device: usize, first: usize, last: usize) -> bool {
        if !self.check_device(device) {
            return false;
        }
        if !self.ensure_digital(device, dark) {
            return false;
        }
        let slot = &self.slots[device];
        let mut last = last.min(SENSOR_COUNT - 1);
        let count = usize::from(slot.transistor_count);
        if count < last + 1 {
            last = count;
        }
        let Some(levels) = slot.readings.digital() else {
            return false;
        };
        levels
            .iter()
            .take(last)
            .skip(first)
            .any(|&level| is_dark(slot.mode, level) == dark)
    }

    /// Centroid of dark (or bright) transistors, 1000..=9000. `0` on failure.
    pub fn center(&mut self, device: usize, of_dark: bool) -> u16 {
        if !self.check_device(device) {
            return 0;
        }
        if self.ensure_mode(device, Mode::center(of_dark), true) {
            self.slots[device].center
        } else {
            0
        }
    }

    pub fn transistor_count_set(&mut self, count: u8, device: usize) -> bool {
        if !self.check_device(device) || count == 0 || usize::from(count) > SENSOR_COUNT {
            return false;
        }
        self.slots[device].transistor_count = count;
        true
    }

    // ---- Calibration ------------------------------------------------------

    /// Stored calibration level. Does not ask the board for new data.
    pub fn calibration_data_get(&mut self, transistor: usize, is_dark: bool, device: usize) -> u16 {
        if !self.check_transistor(device, transistor) {
            return 0;
        }
        let slot = &self.slots[device];
        if is_dark {
            slot.calibration_dark[transistor]
        } else {
            slot.calibration_bright[transistor]
        }
    }

    /// Start calibration and wait for the board to come back alive.
    /// Returns true if at least one board was calibrated and every targeted
    /// alive board finished in time.
    pub fn calibrate(&mut self, target: Target) -> bool {
        let mut ok = true;
        let mut calibrated = 0;
        for (i, device) in self.targets(target).into_iter().enumerate() {
            if i != 0 {
                self.clock.delay_us(BROADCAST_SPACING_US);
            }
            if self.registry.alive(device) {
                ok &= self.calibrate_one(device);
                calibrated += 1;
            }
        }
        if calibrated == 0 {
            debug!(?target, "no alive board to calibrate");
        }
        ok && calibrated > 0
    }

    fn calibrate_one(&mut self, device: usize) -> bool {
        self.registry.alive_set(false, device);
        info!(device, "Calibrating {}...", self.registry.name(device));
        if !self.send(device, &[Command::Calibrate.byte()]) {
            return false;
        }
        let start = self.clock.now_ms();
        while self.clock.now_ms().saturating_sub(start) < self.config.calibration_timeout_ms {
            self.pause();
            if self.registry.alive(device) {
                info!(device, "calibration OK");
                return true;
            }
        }
        self.report(DriverError::CalibrationTimeout { device });
        false
    }

    /// Ask boards to send their calibration data. With `wait_for_result`, block
    /// until the bright fragments have all landed or the timeout expires.
    pub fn calibration_data_request(&mut self, target: Target, wait_for_result: bool) -> bool {
        let mut ok = true;
        for device in self.targets(target) {
            if !self.registry.alive(device) {
                continue;
            }
            if wait_for_result {
                self.slots[device].freshness.calibration_set(false);
            }
            if !self.send(device, &[Command::CalibrationDataRequest.byte()]) {
                ok = false;
                continue;
            }
            if wait_for_result {
                ok &= self.wait_calibration_fresh(device);
            }
        }
        ok
    }

    fn wait_calibration_fresh(&mut self, device: usize) -> bool {
        let start = self.clock.now_ms();
        loop {
            self.service();
            if self.slots[device].freshness.calibration_fresh() {
                return true;
            }
            if self.clock.now_ms().saturating_sub(start) > self.config.calibration_data_timeout_ms
            {
                self.report(DriverError::CalibrationDataTimeout { device });
                return false;
            }
            self.clock.delay_ms(1);
        }
    }

    // ---- Board settings ---------------------------------------------------

    fn send_to_alive(&mut self, target: Target, data: &[u8]) -> usize {
        let mut sent = 0;
        for device in self.targets(target) {
            if self.registry.alive(device) {
                self.clock.delay_ms(1);
                if self.send(device, data) {
                    sent += 1;
                }
            }
        }
        sent
    }

    /// Record peaks between refreshes. Returns the number of boards commanded.
    pub fn peak_recording_set(&mut self, peak: PeakMode, target: Target) -> usize {
        self.record_peak = peak;
        self.send_to_alive(target, &[Command::RecordPeak.byte(), peak.code()])
    }

    pub fn pnp_set(&mut self, enable: bool, target: Target) -> usize {
        let command = if enable {
            common::PNP_ENABLE
        } else {
            common::PNP_DISABLE
        };
        self.send_to_alive(target, &[command, u8::from(enable)])
    }

    /// Board refresh period, sent little-endian.
    pub fn refresh_set(&mut self, ms: u16, target: Target) -> usize {
        let [lo, hi] = ms.to_le_bytes();
        self.send_to_alive(target, &[Command::RefreshMs.byte(), lo, hi])
    }

    // ---- Printing ---------------------------------------------------------

    pub fn calibration_print(&mut self) -> String {
        let mut out = String::new();
        for device in 0..self.slots.len() {
            if !self.registry.alive(device) {
                continue;
            }
            let _ = writeln!(out, "Calibration for {}.", self.registry.name(device));
            out.push_str("Dark: ");
            for t in 0..SENSOR_COUNT {
                let _ = write!(out, " {:3}", self.calibration_data_get(t, true, device));
            }
            out.push_str("\nBright: ");
            for t in 0..SENSOR_COUNT {
                let _ = write!(out, " {:3}", self.calibration_data_get(t, false, device));
            }
            out.push('\n');
        }
        info!("{out}");
        out
    }

    pub fn readings_print(&mut self) -> String {
        let mut out = String::from("Refl:");
        for device in 0..self.slots.len() {
            if !self.registry.alive(device) {
                continue;
            }
            for t in 0..self.slots[device].active_transistors() {
                let value = self.reading(t, device);
                let _ = write!(out, "{value:3} ");
            }
        }
        info!("{out}");
        out
    }

    /// One line of readings for every alive board, at most once per
    /// `test_period_ms`. Digital lines end with the centroid.
    pub fn test(&mut self, analog: bool) -> Option<String> {
        let now = self.clock.now_ms();
        if let Some(last) = self.last_test_ms {
            if now.saturating_sub(last) <= self.config.test_period_ms {
                return None;
            }
        }
        let mut line = String::new();
        let mut pass = 0;
        for device in 0..self.slots.len() {
            if !self.registry.alive(device) {
                continue;
            }
            if pass > 0 {
                line.push_str("| ");
            }
            pass += 1;
            for t in 0..self.slots[device].active_transistors() {
                if analog {
                    let value = self.reading(t, device);
                    let _ = write!(line, "{value:3} ");
                } else {
                    let dark = self.dark(t, device, false);
                    let _ = write!(line, "{}", u8::from(dark));
                }
            }
            if !analog {
                let of_dark = self.slots[device].mode == Some(Mode::DigitalDarkCenter);
                let _ = write!(line, " c:{}", self.center(device, of_dark));
            }
        }
        self.last_test_ms = Some(self.clock.now_ms());
        if pass == 0 {
            return None;
        }
        info!("{line}");
        Some(line)
    }

    pub fn snapshot(&self, device: usize) -> Option<DeviceSnapshot> {
        let board = self.registry.get(device)?;
        Some(DeviceSnapshot {
            device,
            name: board.name.clone(),
            id_in: board.id_in,
            id_out: board.id_out,
            alive: board.alive,
            slot: self.slots.get(device)?.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::freshness::Freshness;
    use crate::sim::{SimulatedArray, SimulatedBoard};
    use can_transport::MockBus;

    fn driver(boards: usize) -> (ReflectanceArray<MockBus, ManualClock>, MockBus) {
        let bus = MockBus::open("mock0").unwrap();
        let handle = bus.clone();
        let mut array =
            ReflectanceArray::new(bus, ManualClock::starting_at(1_000), ArrayConfig::default())
                .unwrap();
        for _ in 0..boards {
            array.add("").unwrap();
        }
        (array, handle)
    }

    #[test]
    fn test_frames_for_other_ids_are_not_claimed() {
        let (mut array, _) = driver(1);
        assert!(!array.message_decode(0x163, &[0x06, 0, 1, 0, 2, 0, 3, 0], 7));
        assert!(!array.message_decode(0x160, &[0x06, 0, 1, 0, 2, 0, 3, 0], 7));
        assert!(array.message_decode(0x161, &[0x06, 0, 1, 0, 2, 0, 3, 0], 7));
    }

    #[test]
    fn test_unknown_command_is_sticky_but_claimed() {
        let (mut array, _) = driver(2);
        assert!(array.message_decode(0x163, &[0x42, 1, 2, 3, 0, 0, 0, 0], 4));
        assert_eq!(array.error_code(), Some((201, 1)));
        assert!(matches!(
            array.last_error(),
            Some(DriverError::UnknownCommand {
                device: 1,
                command: 0x42
            })
        ));
        // Later frames still decode.
        assert!(array.message_decode(0x163, &[0x08, 0, 7, 0, 8, 0, 9, 0], 7));
        assert_eq!(array.slot(1).unwrap().last_reading_ms, Some(1_000));
        array.clear_error();
        assert_eq!(array.error_code(), None);
    }

    #[test]
    fn test_registration_overflow() {
        let (mut array, _) = driver(8);
        assert!(array.add("ninth").is_err());
        assert_eq!(array.count(), 8);
        assert!(matches!(
            array.last_error(),
            Some(DriverError::TooManyBoards { .. })
        ));
    }

    #[test]
    fn test_bounds_return_zero_without_bus_traffic() {
        let (mut array, bus) = driver(1);
        assert_eq!(array.reading(9, 0), 0);
        assert!(matches!(
            array.last_error(),
            Some(DriverError::NoSuchTransistor { transistor: 9 })
        ));
        assert_eq!(array.reading(0, 1), 0);
        assert!(matches!(
            array.last_error(),
            Some(DriverError::NoSuchDevice { device: 1 })
        ));
        assert_eq!(array.calibration_data_get(9, true, 0), 0);
        assert!(!array.dark(12, 0, true));
        assert!(bus.sent().unwrap().is_empty());
    }

    #[test]
    fn test_fast_path_sends_nothing() {
        let (mut array, bus) = driver(1);
        array.slots[0].mode = Some(Mode::Analog);
        array.message_decode(0x161, &[0x06, 0x00, 0x64, 0x00, 0xC8, 0x01, 0x2C, 0], 7);
        array.message_decode(0x161, &[0x08, 0, 7, 0, 8, 0, 9, 0], 7);
        assert_eq!(array.reading(0, 0), 100);
        assert_eq!(array.reading(8, 0), 9);
        assert!(bus.sent().unwrap().is_empty());
    }

    #[test]
    fn test_negotiation_timeout_sends_exactly_eight_starts() {
        let (mut array, bus) = driver(1);
        assert_eq!(array.reading(0, 0), 0);
        let sent = bus.sent().unwrap();
        assert_eq!(sent.len(), 8);
        assert!(sent
            .iter()
            .all(|f| f.payload() == [common::MEASURE_CONTINUOUS, 0]));
        assert!(matches!(
            array.last_error(),
            Some(DriverError::DeviceDead { device: 0 })
        ));
        assert_eq!(array.clock().now_ms(), 1_000 + 8 * 50);
        assert_eq!(array.slot(0).unwrap().mode, None);
    }

    #[test]
    fn test_stale_mode_is_renegotiated() {
        let (mut array, bus) = driver(1);
        array.slots[0].mode = Some(Mode::Analog);
        array.message_decode(0x161, &[0x08, 0, 7, 0, 8, 0, 9, 0], 7);
        array.clock.advance(10_001);
        assert_eq!(array.reading(6, 0), 0);
        assert_eq!(bus.sent().unwrap().len(), 8);
        assert_eq!(array.slot(0).unwrap().last_reading_ms, None);
    }

    #[test]
    fn test_dark_from_analog_uses_calibration_midpoint() {
        let (mut array, _) = driver(1);
        array.slots[0].mode = Some(Mode::Analog);
        array.message_decode(0x161, &[0x0A, 0x00, 0x64, 0, 0, 0, 0, 0], 7);
        array.message_decode(0x161, &[0x0F, 0x03, 0x84, 0, 0, 0, 0, 0], 7);
        array.message_decode(0x161, &[0x06, 0x01, 0x2C, 0, 0, 0, 0, 0], 7);
        array.message_decode(0x161, &[0x08, 0, 0, 0, 0, 0, 0, 0], 7);
        // Threshold (100 + 900) / 2 = 500; reading 300 is below it.
        assert!(array.dark(0, 0, true));
        array.message_decode(0x161, &[0x06, 0x02, 0x58, 0, 0, 0, 0, 0], 7);
        assert!(!array.dark(0, 0, true));
    }

    #[test]
    fn test_digital_bits_follow_center_mode() {
        let (mut array, bus) = driver(1);
        array.message_decode(0x161, &[0x0E, 0x88, 0x13, 0xA5, 0x07, 0, 0, 0], 5);
        array.slots[0].mode = Some(Mode::DigitalDarkCenter);
        assert!(array.dark(0, 0, false));
        assert!(!array.dark(1, 0, false));
        array.slots[0].mode = Some(Mode::DigitalBrightCenter);
        assert!(!array.dark(0, 0, false));
        assert!(array.dark(1, 0, false));
        // The ninth entry is a raw byte, 7 is neither 0 nor 1.
        assert!(!array.dark(8, 0, false));
        assert!(bus.sent().unwrap().is_empty());
    }

    #[test]
    fn test_any_respects_range_and_transistor_count() {
        let (mut array, _) = driver(1);
        array.slots[0].mode = Some(Mode::DigitalDarkCenter);
        // Only transistor 5 is dark.
        array.message_decode(0x161, &[0x0E, 0x88, 0x13, 0b0000_0100, 0, 0, 0, 0], 5);
        assert!(array.any(true, 0, 0, 0xFF));
        assert!(!array.any(true, 0, 0, 5));
        assert!(array.any(true, 0, 5, 6));
        assert!(array.any(false, 0, 0, 0xFF));
        assert!(array.transistor_count_set(5, 0));
        assert!(!array.any(true, 0, 0, 0xFF));
        assert!(!array.transistor_count_set(10, 0));
        assert!(!array.transistor_count_set(0, 0));
        assert_eq!(array.slot(0).unwrap().transistor_count, 5);
    }

    #[test]
    fn test_calibration_request_without_wait_keeps_freshness() {
        let (mut array, bus) = driver(1);
        array.registry.alive_set(true, 0);
        assert!(array.calibration_data_request(Target::Device(0), false));
        assert_eq!(array.slot(0).unwrap().freshness, Freshness::fresh());
        assert_eq!(bus.sent().unwrap()[0].payload(), [0x0D]);
    }

    #[test]
    fn test_calibration_request_times_out() {
        let (mut array, _) = driver(1);
        array.registry.alive_set(true, 0);
        assert!(!array.calibration_data_request(Target::All, true));
        assert!(matches!(
            array.last_error(),
            Some(DriverError::CalibrationDataTimeout { device: 0 })
        ));
        assert!(!array.slot(0).unwrap().freshness.calibration_fresh());
    }

    #[test]
    fn test_settings_go_only_to_alive_boards() {
        let (mut array, bus) = driver(3);
        array.registry.alive_set(true, 0);
        array.registry.alive_set(true, 2);
        assert_eq!(array.refresh_set(300, Target::All), 2);
        assert_eq!(array.peak_recording_set(PeakMode::Max, Target::Device(1)), 0);
        assert_eq!(array.pnp_set(false, Target::Device(2)), 1);
        assert_eq!(array.pnp_set(true, Target::Device(0)), 1);
        let sent = bus.sent().unwrap();
        assert_eq!(sent[0].payload(), [0x55, 0x2C, 0x01]);
        assert_eq!(sent[0].id.raw(), 0x160);
        assert_eq!(sent[1].id.raw(), 0x164);
        assert_eq!(sent[2].payload(), [common::PNP_DISABLE, 0]);
        assert_eq!(sent[3].payload(), [common::PNP_ENABLE, 1]);
        assert_eq!(sent[3].id.raw(), 0x160);
        assert_eq!(array.record_peak(), PeakMode::Max);
    }

    #[test]
    fn test_readings_print_lists_alive_boards_only() {
        let (mut array, bus) = driver(2);
        let mut board = SimulatedBoard::default();
        board.analog = [10, 20, 30, 40, 50, 60, 70, 80, 90];
        let silent = SimulatedBoard {
            responsive: false,
            ..SimulatedBoard::default()
        };
        SimulatedArray::new(vec![board, silent]).attach(&bus).unwrap();
        assert!(array.alive(0, true));
        assert!(!array.alive(1, true));
        bus.clear_sent().unwrap();

        let line = array.readings_print();
        assert_eq!(line, "Refl: 10  20  30  40  50  60  70  80  90 ");
        assert!(bus.sent().unwrap().iter().all(|f| f.id.raw() == 0x160));
    }

    #[test]
    fn test_queries_never_ping_an_unseen_board() {
        let (mut array, bus) = driver(1);
        assert_eq!(array.reading(0, 0), 0);
        assert!(!array.dark(0, 0, false));
        let sent = bus.sent().unwrap();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|f| f.data[0] == common::MEASURE_CONTINUOUS));
    }

    #[test]
    fn test_calibrate_without_alive_board_reports_nothing_done() {
        let (mut array, bus) = driver(2);
        assert!(!array.calibrate(Target::All));
        assert!(!array.calibrate(Target::Device(1)));
        assert!(bus.sent().unwrap().is_empty());
    }

    #[test]
    fn test_service_keeps_foreign_frames() {
        let (mut array, bus) = driver(1);
        let foreign = CanFrame::new(CanId::standard(0x200).unwrap(), &[1, 2]).unwrap();
        bus.inject(foreign).unwrap();
        bus.inject(
            CanFrame::new(CanId::standard(0x161).unwrap(), &[common::REPORT_ALIVE]).unwrap(),
        )
        .unwrap();
        assert_eq!(array.service(), 2);
        assert!(array.alive(0, false));
        let unclaimed = array.take_unclaimed();
        assert_eq!(unclaimed.len(), 1);
        assert_eq!(unclaimed[0].id.raw(), 0x200);
    }

    #[test]
    fn test_snapshot_serializes() {
        let (mut array, _) = driver(1);
        array.message_decode(0x161, &[0x0E, 0x88, 0x13, 0xA5, 0x07, 0, 0, 0], 5);
        let snap = array.snapshot(0).unwrap();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["name"], "ReflArray0");
        assert_eq!(json["center"], 5000);
        assert!(array.snapshot(1).is_none());
    }
}
