//! Host boundary framing: length-prefix (4 bytes LE) + bincode payload.
//! Used by the C ABI to pass actions and events to hosts that can't share Rust types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::link::Action;
use crate::session::SessionEvent;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// What the core hands to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostMessage {
    Action(Action),
    Event(SessionEvent),
}

/// Frame anything crossing the C ABI: actions and events going out,
/// `TransportEvent`s coming in.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameEncodeError> {
    let body = bincode::serialize(msg)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|&n| n <= MAX_FRAME_LEN)
        .ok_or(FrameEncodeError::TooLarge)?;
    let mut out = Vec::with_capacity(LEN_SIZE + body.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("bincode: {0}")]
    Encode(#[from] bincode::Error),
    #[error("host message exceeds the 16 MiB frame limit")]
    TooLarge,
}

/// Read one host frame from the front of `bytes`. Returns the message and how
/// many bytes it used, so a host buffer holding several frames can be walked.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize), FrameDecodeError> {
    let Some(header) = bytes.get(..LEN_SIZE) else {
        return Err(FrameDecodeError::NeedMore);
    };
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge(len));
    }
    let end = LEN_SIZE + len as usize;
    let body = bytes.get(LEN_SIZE..end).ok_or(FrameDecodeError::NeedMore)?;
    Ok((bincode::deserialize(body)?, end))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    /// The host passed a partial frame.
    #[error("incomplete frame")]
    NeedMore,
    #[error("declared frame length {0} over limit")]
    TooLarge(u32),
    #[error("bincode: {0}")]
    Decode(#[from] bincode::Error),
}
