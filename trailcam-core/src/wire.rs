//! Gateway wire format: decode motion/image/status notifications, encode commands.
//! All multi-byte integers are little-endian. Pure functions, no state.

use serde::{Deserialize, Serialize};

/// Image payload bytes per chunk, as sent by the gateway.
pub const CHUNK_SIZE: usize = 240;

pub const MOTION_MIN_LEN: usize = 7;
pub const IMAGE_START_LEN: usize = 12;
pub const IMAGE_CHUNK_MIN_LEN: usize = 6;
pub const STATUS_MIN_LEN: usize = 5;

const CHUNK_HEADER_LEN: usize = 5;

const MARKER_CHUNK: u8 = 0x00;
const MARKER_START: u8 = 0x01;
const MARKER_END: u8 = 0x02;

/// Decoded motion notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionFrame {
    pub node_id: u16,
    pub timestamp: u32,
    pub has_image: bool,
    /// Mesh routing path (source first, gateway last). Empty if the gateway sent none.
    pub route: Vec<u16>,
}

/// Decoded image channel notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageFrame {
    Start {
        node_id: u16,
        image_id: u16,
        total_size: u32,
        total_chunks: u16,
    },
    Chunk {
        index: u16,
        total_chunks: u16,
        data: Vec<u8>,
    },
    End {
        image_id: Option<u16>,
    },
}

/// Decoded status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFrame {
    pub node_id: u16,
    pub battery: u8,
    pub rssi: i8,
    pub mesh_nodes: u8,
}

/// Commands understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    RequestStatus = 0x01,
    ForceCapture = 0x02,
    PingMesh = 0x03,
}

impl Command {
    pub fn opcode(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = DecodeError;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Command::RequestStatus),
            0x02 => Ok(Command::ForceCapture),
            0x03 => Ok(Command::PingMesh),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

/// Why a notification could not be decoded. Callers drop the frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{kind} frame too short: need {need} bytes, got {got}")]
    TooShort {
        kind: &'static str,
        need: usize,
        got: usize,
    },
    #[error("empty image frame")]
    Empty,
    #[error("unknown image marker {0:#04x}")]
    UnknownMarker(u8),
    #[error("negative image size {0}")]
    NegativeSize(i32),
    #[error("unknown command opcode {0:#04x}")]
    UnknownOpcode(u8),
}

fn need(kind: &'static str, bytes: &[u8], need: usize) -> Result<(), DecodeError> {
    if bytes.len() < need {
        return Err(DecodeError::TooShort {
            kind,
            need,
            got: bytes.len(),
        });
    }
    Ok(())
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decode a motion notification: nodeId u16, timestamp u32, hasImage u8,
/// then an optional routing path (length u8 + that many u16 node ids).
pub fn decode_motion(bytes: &[u8]) -> Result<MotionFrame, DecodeError> {
    need("motion", bytes, MOTION_MIN_LEN)?;
    let route = match bytes.get(MOTION_MIN_LEN) {
        Some(&declared) => bytes[MOTION_MIN_LEN + 1..]
            .chunks_exact(2)
            .take(declared as usize)
            .map(|p| u16::from_le_bytes([p[0], p[1]]))
            .collect(),
        None => Vec::new(),
    };
    Ok(MotionFrame {
        node_id: u16_at(bytes, 0),
        timestamp: u32_at(bytes, 2),
        has_image: bytes[6] != 0,
        route,
    })
}

/// Decode an image channel notification. The first byte selects start/chunk/end.
pub fn decode_image(bytes: &[u8]) -> Result<ImageFrame, DecodeError> {
    let Some(&marker) = bytes.first() else {
        return Err(DecodeError::Empty);
    };
    match marker {
        MARKER_START => {
            need("image start", bytes, IMAGE_START_LEN)?;
            // Sent as u32 but the gateway's receiver treats it as a signed int.
            let size = u32_at(bytes, 5) as i32;
            if size < 0 {
                return Err(DecodeError::NegativeSize(size));
            }
            Ok(ImageFrame::Start {
                node_id: u16_at(bytes, 1),
                image_id: u16_at(bytes, 3),
                total_size: size as u32,
                total_chunks: u16_at(bytes, 9),
            })
        }
        MARKER_CHUNK => {
            need("image chunk", bytes, IMAGE_CHUNK_MIN_LEN)?;
            Ok(ImageFrame::Chunk {
                index: u16_at(bytes, 1),
                total_chunks: u16_at(bytes, 3),
                data: bytes[CHUNK_HEADER_LEN..].to_vec(),
            })
        }
        MARKER_END => {
            let image_id = (bytes.len() >= 3).then(|| u16_at(bytes, 1));
            Ok(ImageFrame::End { image_id })
        }
        other => Err(DecodeError::UnknownMarker(other)),
    }
}

/// Decode a status notification: nodeId u16, battery u8, rssi i8, meshNodes u8.
pub fn decode_status(bytes: &[u8]) -> Result<StatusFrame, DecodeError> {
    need("status", bytes, STATUS_MIN_LEN)?;
    Ok(StatusFrame {
        node_id: u16_at(bytes, 0),
        battery: bytes[2],
        rssi: bytes[3] as i8,
        mesh_nodes: bytes[4],
    })
}

/// Command byte followed by the opaque payload. No length prefix; the transport frames it.
pub fn encode_command(command: Command, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(command.opcode());
    out.extend_from_slice(payload);
    out
}

/// ForceCapture argument: the target node id.
pub fn force_capture_payload(node_id: u16) -> [u8; 2] {
    node_id.to_le_bytes()
}
