//! Simulated reflectance boards answering on a [`MockBus`].

use crate::protocol::{common, Command, CAN_IDS, SENSOR_COUNT};
use can_transport::{CanFrame, CanId, MockBus, Result};
use std::sync::{Arc, Mutex};

/// What one simulated board "sees".
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    pub analog: [u16; SENSOR_COUNT],
    pub dark: [bool; SENSOR_COUNT],
    pub calibration_dark: [u16; SENSOR_COUNT],
    pub calibration_bright: [u16; SENSOR_COUNT],
    pub center_dark: u16,
    pub center_bright: u16,
    /// A silent board ignores every command.
    pub responsive: bool,
    /// Start code of the mode being streamed, once started.
    pub streaming: Option<u8>,
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self {
            analog: [500; SENSOR_COUNT],
            dark: [false; SENSOR_COUNT],
            calibration_dark: [100; SENSOR_COUNT],
            calibration_bright: [900; SENSOR_COUNT],
            center_dark: 0,
            center_bright: 5000,
            responsive: true,
            streaming: None,
        }
    }
}

impl SimulatedBoard {
    /// A board with a dark line under `transistors`, analog values to match.
    pub fn with_line(transistors: &[usize]) -> Self {
        let mut board = Self::default();
        for &t in transistors.iter().filter(|&&t| t < SENSOR_COUNT) {
            board.dark[t] = true;
            board.analog[t] = 150;
        }
        if !transistors.is_empty() {
            let sum: usize = transistors.iter().map(|t| (t + 1) * 1000).sum();
            board.center_dark = (sum / transistors.len()) as u16;
        }
        board
    }
}

/// Shared set of boards; clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedArray {
    boards: Arc<Mutex<Vec<SimulatedBoard>>>,
}

fn frame(slot: usize, data: &[u8]) -> Option<CanFrame> {
    let (_, id_out) = CAN_IDS.get(slot)?;
    CanFrame::new(CanId::standard(*id_out)?, data)
}

fn fragment(command: Command, values: &[u16]) -> Vec<u8> {
    let mut data = vec![command.byte()];
    for v in values.iter().take(3) {
        data.extend_from_slice(&v.to_be_bytes());
    }
    data
}

fn center_frame(center: u16, flags: [bool; SENSOR_COUNT]) -> Vec<u8> {
    let bits = flags
        .iter()
        .take(8)
        .fold(0u8, |acc, &f| (acc << 1) | u8::from(f));
    let [lo, hi] = center.to_le_bytes();
    vec![Command::SensorsCenter.byte(), lo, hi, bits, u8::from(flags[8])]
}

fn stream_payloads(board: &SimulatedBoard, start_code: u8) -> Vec<Vec<u8>> {
    match start_code {
        0 => vec![
            fragment(Command::Sensors1To3, &board.analog[0..3]),
            fragment(Command::Sensors4To6, &board.analog[3..6]),
            fragment(Command::Sensors7To9, &board.analog[6..9]),
        ],
        1 => vec![center_frame(board.center_dark, board.dark)],
        _ => vec![center_frame(board.center_bright, board.dark.map(|d| !d))],
    }
}

impl SimulatedArray {
    pub fn new(boards: Vec<SimulatedBoard>) -> Self {
        Self {
            boards: Arc::new(Mutex::new(boards)),
        }
    }

    /// Change a board in place, e.g. to move the line under it.
    pub fn update<F: FnOnce(&mut SimulatedBoard)>(&self, slot: usize, f: F) {
        if let Ok(mut boards) = self.boards.lock() {
            if let Some(board) = boards.get_mut(slot) {
                f(board);
            }
        }
    }

    /// Answer every frame sent on `bus` from now on.
    pub fn attach(&self, bus: &MockBus) -> Result<()> {
        let sim = self.clone();
        bus.set_responder(move |f| sim.respond(f))
    }

    pub fn respond(&self, sent: &CanFrame) -> Vec<CanFrame> {
        let Some(slot) = CAN_IDS
            .iter()
            .position(|(id_in, _)| u32::from(*id_in) == sent.id.raw())
        else {
            return Vec::new();
        };
        let board = match self.boards.lock() {
            Ok(mut boards) => match boards.get_mut(slot) {
                Some(b) if b.responsive => {
                    if sent.data[0] == common::MEASURE_CONTINUOUS {
                        b.streaming = Some(sent.data[1]);
                    }
                    b.clone()
                }
                _ => return Vec::new(),
            },
            Err(_) => return Vec::new(),
        };
        let payloads: Vec<Vec<u8>> = match sent.data[0] {
            common::MEASURE_CONTINUOUS => stream_payloads(&board, sent.data[1]),
            common::REPORT_ALIVE => vec![vec![common::REPORT_ALIVE]],
            b if b == Command::Calibrate.byte() => vec![vec![common::REPORT_ALIVE]],
            b if b == Command::CalibrationDataRequest.byte() => vec![
                fragment(Command::CalibrationDark1To3, &board.calibration_dark[0..3]),
                fragment(Command::CalibrationDark4To6, &board.calibration_dark[3..6]),
                fragment(Command::CalibrationDark7To9, &board.calibration_dark[6..9]),
                fragment(Command::CalibrationBright1To3, &board.calibration_bright[0..3]),
                fragment(Command::CalibrationBright4To6, &board.calibration_bright[3..6]),
                fragment(Command::CalibrationBright7To9, &board.calibration_bright[6..9]),
            ],
            _ => Vec::new(),
        };
        payloads.iter().filter_map(|p| frame(slot, p)).collect()
    }

    /// One refresh period of telemetry from every board that was started.
    pub fn tick(&self) -> Vec<CanFrame> {
        let Ok(boards) = self.boards.lock() else {
            return Vec::new();
        };
        boards
            .iter()
            .enumerate()
            .filter(|(_, b)| b.responsive)
            .flat_map(|(slot, b)| {
                let payloads = b.streaming.map(|code| stream_payloads(b, code));
                payloads
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(move |p| frame(slot, &p))
            })
            .collect()
    }
}
