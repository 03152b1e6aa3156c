//! Spon broadcast frame encoding/decoding
//!
//! Spon frame format:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Byte 0-1:   Preamble (0xFF 0xFF)                                │
//! │ Byte 2:     Opcode (0xC1 terminal, 0xC3 broadcast, 0xCA task)   │
//! │ Byte 3:     Sub-action                                          │
//! │ Byte 4-5:   Field A (uint16 little-endian)                      │
//! │ Byte 6-7:   Field B (uint16 little-endian)                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ [Broadcast control] 16-byte bitmap, destinations 1-128          │
//! │ [Broadcast extend]  125-byte bitmap, destinations 1-1000        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Destination `d` is bit `(d-1) % 8` of bitmap byte `(d-1) / 8`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result, ZoneId};

/// Frame preamble
pub const PREAMBLE: [u8; 2] = [0xFF, 0xFF];

/// Preamble + opcode + sub-action + two u16 fields
pub const FRAME_SIZE: usize = 8;

/// Bitmap size for broadcast control (destinations 1-128)
pub const CONTROL_BITMAP_SIZE: usize = 16;

/// Highest destination addressable by broadcast control
pub const CONTROL_MAX_DESTINATION: u16 = 128;

/// Bitmap size for extended broadcast (destinations 1-1000)
pub const EXTEND_BITMAP_SIZE: usize = 125;

/// Highest destination addressable by extended broadcast
pub const EXTEND_MAX_DESTINATION: u16 = 1000;

/// Sub-action codes for the broadcast family (0xC3)
pub mod sub_action {
    pub const BROADCAST_STOP: u8 = 0x00;
    pub const BROADCAST_START: u8 = 0x01;
    pub const EXTEND_STOP: u8 = 0x02;
    pub const EXTEND_START: u8 = 0x03;
    pub const SINGLE_STOP: u8 = 0x04;
    pub const SINGLE_START: u8 = 0x05;

    /// Alarm task control (0xCA)
    pub const TASK_STOP: u8 = 0x00;
    pub const TASK_START: u8 = 0x01;
}

/// Frame opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    TerminalControl = 0xC1,
    Broadcast = 0xC3,
    AlarmTask = 0xCA,
}

impl Opcode {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0xC1 => Some(Opcode::TerminalControl),
            0xC3 => Some(Opcode::Broadcast),
            0xCA => Some(Opcode::AlarmTask),
            _ => None,
        }
    }
}

/// Intercom terminal actions (0xC1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TerminalAction {
    Call = 0x00,
    Answer = 0x01,
    Hangup = 0x02,
}

impl TerminalAction {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0x00 => Some(TerminalAction::Call),
            0x01 => Some(TerminalAction::Answer),
            0x02 => Some(TerminalAction::Hangup),
            _ => None,
        }
    }
}

impl FromStr for TerminalAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CALL" => Ok(TerminalAction::Call),
            "ANSWER" => Ok(TerminalAction::Answer),
            "HANGUP" => Ok(TerminalAction::Hangup),
            _ => Err(Error::UnknownAction(s.to_string())),
        }
    }
}

/// Start/stop selector shared by broadcast and alarm task frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Switch {
    Start,
    Stop,
}

impl Switch {
    fn pick(self, start: u8, stop: u8) -> u8 {
        match self {
            Switch::Start => start,
            Switch::Stop => stop,
        }
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Switch::Start => f.write_str("start"),
            Switch::Stop => f.write_str("stop"),
        }
    }
}

impl FromStr for Switch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "START" => Ok(Switch::Start),
            "STOP" => Ok(Switch::Stop),
            _ => Err(Error::UnknownAction(s.to_string())),
        }
    }
}

/// Fixed-size destination bitmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationBitmap {
    bytes: Vec<u8>,
    max: u16,
}

impl DestinationBitmap {
    /// Empty bitmap for broadcast control (16 bytes, 1-128)
    pub fn control() -> Self {
        Self {
            bytes: vec![0u8; CONTROL_BITMAP_SIZE],
            max: CONTROL_MAX_DESTINATION,
        }
    }

    /// Empty bitmap for extended broadcast (125 bytes, 1-1000)
    pub fn extend() -> Self {
        Self {
            bytes: vec![0u8; EXTEND_BITMAP_SIZE],
            max: EXTEND_MAX_DESTINATION,
        }
    }

    /// Rebuild a bitmap from raw bytes (length picks the form)
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut bitmap = match bytes.len() {
            CONTROL_BITMAP_SIZE => Self::control(),
            EXTEND_BITMAP_SIZE => Self::extend(),
            _ => return None,
        };
        bitmap.bytes.copy_from_slice(bytes);
        Some(bitmap)
    }

    /// Set a destination. Returns false (and changes nothing) when out of range.
    pub fn set<D: Into<i64>>(&mut self, dest: D) -> bool {
        let dest = dest.into();
        if dest < 1 || dest > self.max as i64 {
            return false;
        }
        let index = (dest - 1) as usize;
        self.bytes[index / 8] |= 1 << (index % 8);
        true
    }

    /// Set every in-range destination, silently dropping the rest
    pub fn with_destinations<I, D>(mut self, dests: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<i64>,
    {
        for dest in dests {
            self.set(dest);
        }
        self
    }

    pub fn contains(&self, dest: ZoneId) -> bool {
        if dest < 1 || dest > self.max {
            return false;
        }
        let index = (dest - 1) as usize;
        self.bytes[index / 8] & (1 << (index % 8)) != 0
    }

    /// All destinations present, ascending
    pub fn destinations(&self) -> Vec<ZoneId> {
        (1..=self.max).filter(|d| self.contains(*d)).collect()
    }

    pub fn max_destination(&self) -> u16 {
        self.max
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

/// A Spon command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponFrame {
    pub opcode: Opcode,
    pub sub_action: u8,
    /// Source terminal, destination or task depending on the opcode
    pub field_a: u16,
    /// Destination or zone depending on the opcode
    pub field_b: u16,
    pub bitmap: Option<DestinationBitmap>,
}

impl SponFrame {
    /// Terminal control (0xC1): fields `(action, source, destination)`
    pub fn terminal_control(action: TerminalAction, dest: u16, source: u16) -> Self {
        Self {
            opcode: Opcode::TerminalControl,
            sub_action: action as u8,
            field_a: source,
            field_b: dest,
            bitmap: None,
        }
    }

    /// Broadcast control (0xC3): destinations 1-128 as a 16-byte bitmap
    pub fn broadcast_control<I, D>(switch: Switch, dests: I, source: u16) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<i64>,
    {
        Self {
            opcode: Opcode::Broadcast,
            sub_action: switch.pick(sub_action::BROADCAST_START, sub_action::BROADCAST_STOP),
            field_a: source,
            field_b: 0,
            bitmap: Some(DestinationBitmap::control().with_destinations(dests)),
        }
    }

    /// Extended broadcast (0xC3): destinations 1-1000 as a 125-byte bitmap
    pub fn broadcast_extend<I, D>(switch: Switch, dests: I, source: u16) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<i64>,
    {
        Self {
            opcode: Opcode::Broadcast,
            sub_action: switch.pick(sub_action::EXTEND_START, sub_action::EXTEND_STOP),
            field_a: source,
            field_b: 0,
            bitmap: Some(DestinationBitmap::extend().with_destinations(dests)),
        }
    }

    /// Single-destination broadcast (0xC3): fields `(sub, destination, zone)`
    pub fn broadcast_single(switch: Switch, dest: u16, zone: u16) -> Self {
        Self {
            opcode: Opcode::Broadcast,
            sub_action: switch.pick(sub_action::SINGLE_START, sub_action::SINGLE_STOP),
            field_a: dest,
            field_b: zone,
            bitmap: None,
        }
    }

    /// Alarm task control (0xCA): fields `(sub, task, 0)`
    pub fn alarm_task(switch: Switch, task: u16) -> Self {
        Self {
            opcode: Opcode::AlarmTask,
            sub_action: switch.pick(sub_action::TASK_START, sub_action::TASK_STOP),
            field_a: task,
            field_b: 0,
            bitmap: None,
        }
    }

    /// Total encoded size
    pub fn size(&self) -> usize {
        FRAME_SIZE + self.bitmap.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());

        buf.put_slice(&PREAMBLE);
        buf.put_u8(self.opcode as u8);
        buf.put_u8(self.sub_action);
        buf.put_u16_le(self.field_a);
        buf.put_u16_le(self.field_b);

        if let Some(bitmap) = &self.bitmap {
            buf.put_slice(bitmap.as_bytes());
        }

        buf.freeze()
    }

    /// Decode frame from bytes
    pub fn decode(mut buf: impl Buf) -> Result<Self> {
        if buf.remaining() < FRAME_SIZE {
            return Err(Error::BufferTooSmall {
                needed: FRAME_SIZE,
                have: buf.remaining(),
            });
        }

        let (p0, p1) = (buf.get_u8(), buf.get_u8());
        if [p0, p1] != PREAMBLE {
            return Err(Error::InvalidPreamble(p0, p1));
        }

        let raw_opcode = buf.get_u8();
        let opcode = Opcode::from_u8(raw_opcode).ok_or(Error::UnknownOpcode(raw_opcode))?;
        let sub = buf.get_u8();
        let field_a = buf.get_u16_le();
        let field_b = buf.get_u16_le();

        let bitmap_size = match (opcode, sub) {
            (Opcode::TerminalControl, s) if TerminalAction::from_u8(s).is_some() => 0,
            (Opcode::AlarmTask, sub_action::TASK_STOP | sub_action::TASK_START) => 0,
            (Opcode::Broadcast, sub_action::BROADCAST_STOP | sub_action::BROADCAST_START) => {
                CONTROL_BITMAP_SIZE
            }
            (Opcode::Broadcast, sub_action::EXTEND_STOP | sub_action::EXTEND_START) => {
                EXTEND_BITMAP_SIZE
            }
            (Opcode::Broadcast, sub_action::SINGLE_STOP | sub_action::SINGLE_START) => 0,
            _ => {
                return Err(Error::UnknownSubAction {
                    opcode: raw_opcode,
                    sub_action: sub,
                })
            }
        };

        let bitmap = if bitmap_size > 0 {
            if buf.remaining() < bitmap_size {
                return Err(Error::BufferTooSmall {
                    needed: FRAME_SIZE + bitmap_size,
                    have: FRAME_SIZE + buf.remaining(),
                });
            }
            let raw = buf.copy_to_bytes(bitmap_size);
            DestinationBitmap::from_bytes(&raw)
        } else {
            None
        };

        Ok(Self {
            opcode,
            sub_action: sub,
            field_a,
            field_b,
            bitmap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_control_layout() {
        let bytes = SponFrame::terminal_control(TerminalAction::Call, 2, 3).encode();
        assert_eq!(
            bytes.as_ref(),
            &[0xFF, 0xFF, 0xC1, 0x00, 0x03, 0x00, 0x02, 0x00]
        );
    }

    #[test]
    fn test_alarm_task_layout() {
        let start = SponFrame::alarm_task(Switch::Start, 0x0102).encode();
        assert_eq!(
            start.as_ref(),
            &[0xFF, 0xFF, 0xCA, 0x01, 0x02, 0x01, 0x00, 0x00]
        );

        let stop = SponFrame::alarm_task(Switch::Stop, 7).encode();
        assert_eq!(stop.as_ref(), &[0xFF, 0xFF, 0xCA, 0x00, 0x07, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_bitmap_bits() {
        let bitmap = DestinationBitmap::control().with_destinations([1, 8, 9, 128]);
        assert_eq!(bitmap.as_bytes()[0], 0b1000_0001);
        assert_eq!(bitmap.as_bytes()[1], 0b0000_0001);
        assert_eq!(bitmap.as_bytes()[15], 0b1000_0000);
        assert_eq!(bitmap.destinations(), vec![1, 8, 9, 128]);
    }

    #[test]
    fn test_bitmap_drops_out_of_range() {
        let mut bitmap = DestinationBitmap::control();
        assert!(!bitmap.set(0));
        assert!(!bitmap.set(-4));
        assert!(!bitmap.set(129));
        assert!(bitmap.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(
            SponFrame::decode(&[0xFF, 0xFF, 0xC1][..]),
            Err(Error::BufferTooSmall { .. })
        ));
        assert!(matches!(
            SponFrame::decode(&[0xFE, 0xFF, 0xC1, 0, 0, 0, 0, 0][..]),
            Err(Error::InvalidPreamble(0xFE, 0xFF))
        ));
        assert!(matches!(
            SponFrame::decode(&[0xFF, 0xFF, 0xCC, 0, 0, 0, 0, 0][..]),
            Err(Error::UnknownOpcode(0xCC))
        ));
        // broadcast control announced but bitmap missing
        assert!(matches!(
            SponFrame::decode(&[0xFF, 0xFF, 0xC3, 0x01, 0, 0, 0, 0][..]),
            Err(Error::BufferTooSmall { needed: 24, .. })
        ));
    }

    #[test]
    fn test_switch_parse() {
        assert_eq!("start".parse::<Switch>().unwrap(), Switch::Start);
        assert_eq!("STOP".parse::<Switch>().unwrap(), Switch::Stop);
        assert!("pause".parse::<Switch>().is_err());
        assert_eq!("hangup".parse::<TerminalAction>().unwrap(), TerminalAction::Hangup);
    }
}
