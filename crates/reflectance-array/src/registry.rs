use crate::error::{DriverError, Result};
use crate::protocol::{common, ids_for_slot, MAX_BOARDS};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Identity and liveness of one registered board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardEntry {
    pub name: String,
    /// ID the driver sends commands to.
    pub id_in: u16,
    /// ID the board reports on.
    pub id_out: u16,
    pub alive: bool,
    pub last_error_code: Option<u8>,
    pub fps: Option<u16>,
}

/// Slot bookkeeping shared by every board of the family: slot assignment in
/// registration order, names, and the alive flag refreshed by common frames.
#[derive(Debug, Clone)]
pub struct BoardRegistry {
    boards_name: &'static str,
    max_boards: usize,
    boards: Vec<BoardEntry>,
}

impl BoardRegistry {
    pub fn new(boards_name: &'static str, max_boards: usize) -> Self {
        Self {
            boards_name,
            max_boards: max_boards.min(MAX_BOARDS),
            boards: Vec::new(),
        }
    }

    pub fn boards_name(&self) -> &'static str {
        self.boards_name
    }

    /// Allocate the next free slot. Slots are never released.
    pub fn add(&mut self, name: &str) -> Result<usize> {
        let slot = self.boards.len();
        let ids = if slot < self.max_boards {
            ids_for_slot(slot)
        } else {
            None
        };
        let (id_in, id_out) = ids.ok_or(DriverError::TooManyBoards {
            requested: slot + 1,
            max: self.max_boards,
        })?;
        let name = if name.is_empty() {
            format!("{}{}", self.boards_name, slot)
        } else {
            name.to_string()
        };
        debug!(slot, %name, id_in, id_out, "registered board");
        self.boards.push(BoardEntry {
            name,
            id_in,
            id_out,
            alive: false,
            last_error_code: None,
            fps: None,
        });
        Ok(slot)
    }

    pub fn count(&self) -> usize {
        self.boards.len()
    }

    pub fn max_boards(&self) -> usize {
        self.max_boards
    }

    pub fn get(&self, slot: usize) -> Option<&BoardEntry> {
        self.boards.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoardEntry> {
        self.boards.iter()
    }

    pub fn name(&self, slot: usize) -> &str {
        self.boards.get(slot).map(|b| b.name.as_str()).unwrap_or("")
    }

    /// Slot whose board reports on `can_id`.
    pub fn slot_for(&self, can_id: u32) -> Option<usize> {
        self.boards
            .iter()
            .position(|b| u32::from(b.id_out) == can_id)
    }

    pub fn alive(&self, slot: usize) -> bool {
        self.boards.get(slot).map(|b| b.alive).unwrap_or(false)
    }

    pub fn alive_set(&mut self, alive: bool, slot: usize) {
        if let Some(b) = self.boards.get_mut(slot) {
            b.alive = alive;
        }
    }

    /// Handle the frames every board of the family may send. Any frame marks
    /// its sender alive; returns true if the frame needs no further decoding.
    pub fn decode_common(&mut self, slot: usize, data: &[u8; 8]) -> bool {
        let boards_name = self.boards_name;
        let Some(board) = self.boards.get_mut(slot) else {
            return false;
        };
        board.alive = true;
        match data[0] {
            common::REPORT_ALIVE => true,
            common::NOTIFICATION => {
                debug!(board = %board.name, "notification");
                true
            }
            common::FPS_SENDING => {
                board.fps = Some(u16::from_le_bytes([data[1], data[2]]));
                true
            }
            common::ERROR => {
                board.last_error_code = Some(data[1]);
                warn!(board = %board.name, code = data[1], "{boards_name} reported an error");
                true
            }
            _ => false,
        }
    }
}
