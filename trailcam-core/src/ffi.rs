//! C ABI for linking trailcam-core as a static library from Android (NDK) or other C/C++ hosts.
//! Facade calls and transport callbacks go in; actions and session events come out as
//! frames (see `frame`), drained one at a time with `trailcam_session_take_frame`.

use std::collections::VecDeque;
use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};
use std::slice;

use log::warn;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::frame::{decode_frame, encode_frame, HostMessage};
use crate::link::{Action, LinkError, LinkState, TransportEvent};
use crate::session::Session;

/// Bumped when a signature or frame layout here changes.
pub const ABI_VERSION: u8 = 1;

struct FfiSession {
    session: Session,
    outbox: VecDeque<Vec<u8>>,
}

impl FfiSession {
    /// Queue actions first, then whatever events the call produced.
    fn flush(&mut self, actions: Vec<Action>) {
        let messages = actions
            .into_iter()
            .map(HostMessage::Action)
            .chain(self.session.take_events().into_iter().map(HostMessage::Event));
        for msg in messages {
            match encode_frame(&msg) {
                Ok(frame) => self.outbox.push_back(frame),
                Err(e) => warn!("dropping host message: {}", e),
            }
        }
    }
}

fn state_code(state: LinkState) -> c_int {
    match state {
        LinkState::Idle => 0,
        LinkState::Scanning => 1,
        LinkState::Connecting => 2,
        LinkState::NegotiatingMtu => 3,
        LinkState::DiscoveringCapabilities => 4,
        LinkState::SubscribingChannel(_) => 5,
        LinkState::Ready => 6,
        LinkState::Disconnected => 7,
    }
}

/// Borrow the handle. Caller checked for null.
unsafe fn handle<'a>(h: *mut c_void) -> &'a mut FfiSession {
    &mut *(h as *mut FfiSession)
}

/// Run `f` against the session and queue what it produced. Returns 0, or -1 if h is null.
fn with_session(h: *mut c_void, f: impl FnOnce(&mut Session) -> Vec<Action>) -> c_int {
    if h.is_null() {
        return -1;
    }
    let s = unsafe { handle(h) };
    let actions = f(&mut s.session);
    s.flush(actions);
    0
}

#[no_mangle]
pub extern "C" fn trailcam_core_abi_version() -> u8 {
    ABI_VERSION
}

/// Create a session with default config. Returns opaque handle.
#[no_mangle]
pub extern "C" fn trailcam_session_create() -> *mut c_void {
    let s = FfiSession {
        session: Session::new(SessionConfig::default()),
        outbox: VecDeque::new(),
    };
    Box::into_raw(Box::new(s)) as *mut c_void
}

/// Destroy session. No-op if h is null.
#[no_mangle]
pub extern "C" fn trailcam_session_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut FfiSession) };
}

/// Link state: 0 Idle, 1 Scanning, 2 Connecting, 3 NegotiatingMtu, 4 DiscoveringCapabilities,
/// 5 SubscribingChannel, 6 Ready, 7 Disconnected. -1 if h is null.
#[no_mangle]
pub extern "C" fn trailcam_session_state(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    state_code(unsafe { handle(h) }.session.state())
}

/// 1 if Ready, 0 if not, -1 if h is null.
#[no_mangle]
pub extern "C" fn trailcam_session_is_ready(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    unsafe { handle(h) }.session.is_link_ready() as c_int
}

#[no_mangle]
pub extern "C" fn trailcam_session_set_radio_enabled(h: *mut c_void, enabled: bool) -> c_int {
    with_session(h, |s| {
        s.set_radio_enabled(enabled);
        vec![]
    })
}

/// 0 on success, -1 if h is null, -2 if the radio is off, -3 if a scan can't start from the current state.
#[no_mangle]
pub extern "C" fn trailcam_session_start_scan(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    let s = unsafe { handle(h) };
    match s.session.start_scan() {
        Ok(actions) => {
            s.flush(actions);
            0
        }
        Err(LinkError::RadioDisabled) => -2,
        Err(LinkError::InvalidState(_)) => -3,
    }
}

#[no_mangle]
pub extern "C" fn trailcam_session_stop_scan(h: *mut c_void) -> c_int {
    with_session(h, |s| s.stop_scan())
}

/// address is a NUL-terminated UTF-8 device address. Returns 0, or -1 on null/invalid input.
#[no_mangle]
pub extern "C" fn trailcam_session_connect(h: *mut c_void, address: *const c_char) -> c_int {
    if h.is_null() || address.is_null() {
        return -1;
    }
    let address = match unsafe { CStr::from_ptr(address) }.to_str() {
        Ok(a) => a.to_owned(),
        Err(_) => return -1,
    };
    with_session(h, |s| s.connect(&address))
}

#[no_mangle]
pub extern "C" fn trailcam_session_disconnect(h: *mut c_void) -> c_int {
    with_session(h, |s| s.disconnect())
}

#[no_mangle]
pub extern "C" fn trailcam_session_request_status(h: *mut c_void) -> c_int {
    with_session(h, |s| s.request_status())
}

#[no_mangle]
pub extern "C" fn trailcam_session_ping_mesh(h: *mut c_void) -> c_int {
    with_session(h, |s| s.ping_mesh())
}

#[no_mangle]
pub extern "C" fn trailcam_session_force_capture(h: *mut c_void, node_id: u16) -> c_int {
    with_session(h, |s| s.force_capture(node_id))
}

#[no_mangle]
pub extern "C" fn trailcam_session_clear_alerts(h: *mut c_void) -> c_int {
    with_session(h, |s| {
        s.clear_alerts();
        vec![]
    })
}

/// Deliver one transport callback, encoded as a frame holding a `TransportEvent`.
/// Returns 0, or -1 on null input or a malformed frame.
#[no_mangle]
pub extern "C" fn trailcam_session_on_transport_event(
    h: *mut c_void,
    bytes: *const u8,
    len: usize,
) -> c_int {
    if h.is_null() || bytes.is_null() {
        return -1;
    }
    let slice = unsafe { slice::from_raw_parts(bytes, len) };
    let event: TransportEvent = match decode_frame(slice) {
        Ok((event, _)) => event,
        Err(_) => return -1,
    };
    with_session(h, |s| s.on_transport_event(event))
}

/// Fast path for notifications: characteristic_16 is the 16 raw UUID bytes (big-endian),
/// value is the notification payload. Returns 0, or -1 on null input.
#[no_mangle]
pub extern "C" fn trailcam_session_on_notification(
    h: *mut c_void,
    characteristic_16: *const u8,
    value: *const u8,
    value_len: usize,
) -> c_int {
    if h.is_null() || characteristic_16.is_null() || (value.is_null() && value_len > 0) {
        return -1;
    }
    let mut id = [0u8; 16];
    unsafe {
        id.copy_from_slice(slice::from_raw_parts(characteristic_16, 16));
    }
    let value = if value_len == 0 {
        Vec::new()
    } else {
        unsafe { slice::from_raw_parts(value, value_len) }.to_vec()
    };
    with_session(h, |s| {
        s.on_transport_event(TransportEvent::Notification {
            characteristic: Uuid::from_bytes(id),
            value,
        })
    })
}

/// Length of the next queued frame, 0 if none, -1 if h is null.
#[no_mangle]
pub extern "C" fn trailcam_session_next_frame_len(h: *mut c_void) -> c_int {
    if h.is_null() {
        return -1;
    }
    unsafe { handle(h) }
        .outbox
        .front()
        .map_or(0, |f| f.len() as c_int)
}

/// Pop the next frame (length-prefix + bincode `HostMessage`) into out_buf.
/// Returns bytes written, 0 if the queue is empty, -1 on null input or if out_buf is too small
/// (the frame stays queued).
#[no_mangle]
pub extern "C" fn trailcam_session_take_frame(
    h: *mut c_void,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() || out_buf.is_null() {
        return -1;
    }
    let s = unsafe { handle(h) };
    let Some(frame) = s.outbox.front() else {
        return 0;
    };
    if frame.len() > out_buf_len {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(frame.as_ptr(), frame.len());
    }
    let n = frame.len() as c_int;
    s.outbox.pop_front();
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MOTION_UUID;
    use crate::session::SessionEvent;

    fn drain(h: *mut c_void) -> Vec<HostMessage> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = trailcam_session_take_frame(h, buf.as_mut_ptr(), buf.len());
            assert!(n >= 0);
            if n == 0 {
                return out;
            }
            let (msg, used): (HostMessage, usize) = decode_frame(&buf[..n as usize]).unwrap();
            assert_eq!(used, n as usize);
            out.push(msg);
        }
    }

    #[test]
    fn null_handle_rejected() {
        let null = std::ptr::null_mut();
        assert_eq!(trailcam_session_state(null), -1);
        assert_eq!(trailcam_session_start_scan(null), -1);
        assert_eq!(trailcam_session_request_status(null), -1);
        assert_eq!(trailcam_session_next_frame_len(null), -1);
        trailcam_session_destroy(null);
    }

    #[test]
    fn scan_emits_action_then_events() {
        let h = trailcam_session_create();
        assert_eq!(trailcam_session_state(h), 0);
        assert_eq!(trailcam_session_start_scan(h), 0);
        assert_eq!(trailcam_session_state(h), 1);
        let msgs = drain(h);
        assert!(matches!(msgs[0], HostMessage::Action(Action::StartScan { .. })));
        assert!(msgs
            .iter()
            .any(|m| *m == HostMessage::Event(SessionEvent::StateChanged(LinkState::Scanning))));
        trailcam_session_destroy(h);
    }

    #[test]
    fn radio_off_refuses_scan() {
        let h = trailcam_session_create();
        assert_eq!(trailcam_session_set_radio_enabled(h, false), 0);
        assert_eq!(trailcam_session_start_scan(h), -2);
        assert_eq!(trailcam_session_next_frame_len(h), 0);
        trailcam_session_destroy(h);
    }

    #[test]
    fn small_buffer_keeps_frame_queued() {
        let h = trailcam_session_create();
        trailcam_session_start_scan(h);
        let len = trailcam_session_next_frame_len(h);
        assert!(len > 4);
        let mut tiny = [0u8; 4];
        assert_eq!(trailcam_session_take_frame(h, tiny.as_mut_ptr(), tiny.len()), -1);
        assert_eq!(trailcam_session_next_frame_len(h), len);
        trailcam_session_destroy(h);
    }

    #[test]
    fn transport_event_frame_and_bad_frame() {
        let h = trailcam_session_create();
        let frame = encode_frame(&TransportEvent::Connected).unwrap();
        // Connected outside a connection attempt is ignored, but the frame is valid.
        assert_eq!(trailcam_session_on_transport_event(h, frame.as_ptr(), frame.len()), 0);
        let garbage = [9u8, 0, 0, 0, 0xFF];
        assert_eq!(trailcam_session_on_transport_event(h, garbage.as_ptr(), garbage.len()), -1);
        trailcam_session_destroy(h);
    }

    #[test]
    fn notification_outside_ready_is_dropped() {
        let h = trailcam_session_create();
        let value = [0x03, 0x00, 0x64, 0x00, 0x00, 0x00, 0x01];
        let id = MOTION_UUID.into_bytes();
        assert_eq!(
            trailcam_session_on_notification(h, id.as_ptr(), value.as_ptr(), value.len()),
            0
        );
        assert!(drain(h).is_empty());
        trailcam_session_destroy(h);
    }

    #[test]
    fn commands_dropped_until_ready() {
        let h = trailcam_session_create();
        assert_eq!(trailcam_session_force_capture(h, 3), 0);
        assert_eq!(trailcam_session_ping_mesh(h), 0);
        assert_eq!(trailcam_session_next_frame_len(h), 0);
        trailcam_session_destroy(h);
    }
}
