//! Desk GATT protocol
//!
//! The Linak controller exposes a control characteristic that takes
//! two-byte commands and a height characteristic whose value (and
//! notifications) carry the height offset and speed.

use uuid::Uuid;

use desk_runtime::MIN_DESK_HEIGHT;

/// Characteristic carrying height and speed
pub const HEIGHT_CHARACTERISTIC: Uuid = Uuid::from_u128(0x99fa0021_338a_1024_8a49_009c0215f78a);

/// Characteristic accepting movement commands
pub const CONTROL_CHARACTERISTIC: Uuid = Uuid::from_u128(0x99fa0002_338a_1024_8a49_009c0215f78a);

/// Heights on the wire are offsets from this base, in millimeters
pub const HEIGHT_OFFSET: i32 = MIN_DESK_HEIGHT;

/// Minimum length of a height payload
pub const HEIGHT_PAYLOAD_LEN: usize = 4;

/// Errors decoding or encoding protocol payloads
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid data length {0}, expected at least {HEIGHT_PAYLOAD_LEN}")]
    TooShort(usize),

    #[error("Unknown command 0x{0:02X} 0x{1:02X}")]
    UnknownCommand(u8, u8),

    #[error("Height {0} cannot be represented on the wire")]
    HeightOutOfRange(i32),
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Commands written to [`CONTROL_CHARACTERISTIC`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Up,
    Down,
    Stop,
}

impl Command {
    /// Bytes written to the control characteristic
    pub const fn payload(self) -> [u8; 2] {
        match self {
            Command::Up => [0x47, 0x00],
            Command::Down => [0x46, 0x00],
            Command::Stop => [0xFF, 0x00],
        }
    }

    /// Parse a control write
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        match data {
            [0x47, 0x00] => Ok(Command::Up),
            [0x46, 0x00] => Ok(Command::Down),
            [0xFF, 0x00] => Ok(Command::Stop),
            [a, b] => Err(ProtocolError::UnknownCommand(*a, *b)),
            [a] => Err(ProtocolError::UnknownCommand(*a, 0)),
            [] => Err(ProtocolError::UnknownCommand(0, 0)),
            [a, b, ..] => Err(ProtocolError::UnknownCommand(*a, *b)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Height
// ─────────────────────────────────────────────────────────────────────────────

/// Decoded height characteristic value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightReading {
    /// Absolute height in millimeters
    pub height: i32,
    /// Raw speed reported by the controller, signed
    pub speed: i16,
}

/// Decode a height value or notification
pub fn decode_height(data: &[u8]) -> Result<HeightReading, ProtocolError> {
    if data.len() < HEIGHT_PAYLOAD_LEN {
        return Err(ProtocolError::TooShort(data.len()));
    }

    let offset = u16::from_le_bytes([data[0], data[1]]);
    let speed = i16::from_le_bytes([data[2], data[3]]);

    Ok(HeightReading {
        height: i32::from(offset) + HEIGHT_OFFSET,
        speed,
    })
}

/// Encode a height value as the controller reports it
pub fn encode_height(reading: HeightReading) -> Result<[u8; HEIGHT_PAYLOAD_LEN], ProtocolError> {
    let offset = u16::try_from(reading.height - HEIGHT_OFFSET)
        .map_err(|_| ProtocolError::HeightOutOfRange(reading.height))?;

    let [o0, o1] = offset.to_le_bytes();
    let [s0, s1] = reading.speed.to_le_bytes();
    Ok([o0, o1, s0, s1])
}
