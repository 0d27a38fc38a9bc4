//! Client core for a trail-camera mesh gateway reached over BLE.
//! Host-driven: no I/O; the host passes transport events in and receives actions,
//! and drains session events for its UI.

pub mod alert;
pub mod channel;
pub mod clock;
pub mod config;
pub mod ffi;
pub mod frame;
pub mod link;
pub mod model;
pub mod reassembly;
pub mod session;
pub mod wire;

pub use channel::{Channel, ChannelMap};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use frame::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, HostMessage};
pub use link::{Action, GattService, LinkError, LinkState, TransportEvent};
pub use model::{CapturedImage, MotionAlert, NodeStatus, PeerDevice};
pub use reassembly::TransferProgress;
pub use session::{Session, SessionEvent, StatusMap};
pub use wire::Command;
