use core::fmt;
use time::OffsetDateTime;

/// 11-bit or 29-bit CAN identifier
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CanId {
    raw: u32,
    extended: bool,
}

impl CanId {
    pub fn standard(id11: u16) -> Option<Self> {
        if id11 <= 0x7FF {
            Some(Self {
                raw: id11 as u32,
                extended: false,
            })
        } else {
            None
        }
    }

    pub fn extended(id29: u32) -> Option<Self> {
        if id29 <= 0x1FFF_FFFF {
            Some(Self {
                raw: id29,
                extended: true,
            })
        } else {
            None
        }
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }
    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "0x{raw:08X}", raw = self.raw)
        } else {
            write!(f, "0x{raw:03X}", raw = self.raw)
        }
    }
}

/// A CAN data frame (no CAN FD features yet)
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CanFrame {
    pub id: CanId,
    pub len: u8,
    pub data: [u8; 8],
    pub rtr: bool,
    pub timestamp: Option<Timestamp>,
}

impl CanFrame {
    pub fn new(id: CanId, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        let len = data.len() as u8;
        // Copy without panic on length
        for (i, b) in data.iter().enumerate() {
            if i >= 8 {
                break;
            }
            buf[i] = *b;
        }
        Some(Self {
            id,
            len,
            data: buf,
            rtr: false,
            timestamp: None,
        })
    }

    /// Build a frame from a full 8-byte buffer, clamping `len` to 8.
    pub fn from_parts(id: CanId, data: [u8; 8], len: u8) -> Self {
        Self {
            id,
            len: len.min(8),
            data,
            rtr: false,
            timestamp: None,
        }
    }

    /// The first `len` payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len.min(8))]
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.len)?;
        for b in self.payload() {
            write!(f, " {b:02X}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CanFilter {
    pub id: CanId,
    pub mask: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

#[derive(Clone, Debug)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_id_range() {
        assert!(CanId::standard(0x7FF).is_some());
        assert!(CanId::standard(0x800).is_none());
        assert_eq!(CanId::standard(0x161).map(|id| id.to_string()), Some("0x161".into()));
    }

    #[test]
    fn test_frame_display_and_payload() {
        let id = CanId::standard(0x161).unwrap();
        let frame = CanFrame::from_parts(id, [0x0E, 0x88, 0x13, 0, 0, 0, 0, 0xAA], 3);
        assert_eq!(frame.payload(), &[0x0E, 0x88, 0x13]);
        assert_eq!(frame.to_string(), "0x161 [3] 0E 88 13");
        assert!(CanFrame::new(id, &[0; 9]).is_none());
        assert_eq!(CanFrame::from_parts(id, [0; 8], 12).len, 8);
    }
}
