//! Session facade: the host-facing API. Composes the link state machine, wire
//! codec, image reassembler and alert gate. Host passes transport events and
//! facade calls; the session returns transport actions and queues events.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::{AlertGate, History};
use crate::channel::Channel;
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::link::{Action, LinkError, LinkMachine, LinkState, TransportEvent};
use crate::model::{CapturedImage, MotionAlert, NodeStatus, PeerDevice};
use crate::reassembly::{ChunkOutcome, ImageReassembler, TransferProgress};
use crate::wire::{self, Command, ImageFrame};

/// Per-node status, replaced wholesale on every update.
pub type StatusMap = Arc<BTreeMap<u16, NodeStatus>>;

/// Something the host should surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    StateChanged(LinkState),
    /// Full discovered-peer list after a change.
    PeersChanged(Vec<PeerDevice>),
    MotionAlert(MotionAlert),
    ImageReceived(CapturedImage),
    StatusUpdated(NodeStatus),
    AlertsCleared,
}

/// One session per gateway client. Not thread-safe by itself: the host must
/// serialize transport callbacks and facade calls (single event loop or a mutex).
pub struct Session {
    config: SessionConfig,
    clock: Box<dyn Clock>,
    link: LinkMachine,
    gate: AlertGate,
    reassembler: ImageReassembler,
    peers: Vec<PeerDevice>,
    alerts: History<MotionAlert>,
    images: History<CapturedImage>,
    statuses: StatusMap,
    events: Vec<SessionEvent>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: SessionConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            link: LinkMachine::new(
                config.channels.clone(),
                config.scan_timeout_ms,
                config.preferred_mtu,
            ),
            gate: AlertGate::new(config.alert_cooldown_ms),
            reassembler: ImageReassembler::new(config.chunk_size, config.max_image_bytes),
            peers: Vec::new(),
            alerts: History::new(config.max_alerts),
            images: History::new(config.max_images),
            statuses: Arc::new(BTreeMap::new()),
            events: Vec::new(),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_link_ready(&self) -> bool {
        self.link.is_ready()
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    /// Host reports whether the radio is on. Scans are refused while it is off.
    pub fn set_radio_enabled(&mut self, enabled: bool) {
        self.link.set_radio_enabled(enabled);
    }

    /// Start scanning for gateways. `Err(RadioDisabled)` means the host should
    /// ask the user to turn the radio on.
    pub fn start_scan(&mut self) -> Result<Vec<Action>, LinkError> {
        let before = self.link.state();
        let actions = self.link.start_scan()?;
        self.peers.clear();
        self.events.push(SessionEvent::PeersChanged(Vec::new()));
        self.note_state(before);
        Ok(actions)
    }

    pub fn stop_scan(&mut self) -> Vec<Action> {
        self.step(|link| link.stop_scan())
    }

    pub fn connect(&mut self, address: &str) -> Vec<Action> {
        self.drop_transfer();
        self.step(|link| link.connect(address))
    }

    pub fn disconnect(&mut self) -> Vec<Action> {
        self.step(|link| link.disconnect())
    }

    /// Fire-and-forget. Dropped unless the link is Ready.
    pub fn send_command(&mut self, command: Command, payload: &[u8]) -> Vec<Action> {
        match self.link.command_write(wire::encode_command(command, payload)) {
            Some(write) => {
                debug!("sent command {:?}", command);
                vec![write]
            }
            None => {
                debug!("link not ready, dropping command {:?}", command);
                vec![]
            }
        }
    }

    pub fn request_status(&mut self) -> Vec<Action> {
        self.send_command(Command::RequestStatus, &[])
    }

    pub fn ping_mesh(&mut self) -> Vec<Action> {
        self.send_command(Command::PingMesh, &[])
    }

    pub fn force_capture(&mut self, node_id: u16) -> Vec<Action> {
        self.send_command(Command::ForceCapture, &wire::force_capture_payload(node_id))
    }

    /// Empties both the alert list and the image list.
    pub fn clear_alerts(&mut self) {
        self.alerts.clear();
        self.images.clear();
        self.events.push(SessionEvent::AlertsCleared);
        debug!("cleared all alerts and images");
    }

    /// Remove the alert and any image from the same node received within the
    /// association window of it. Nothing on the wire links the two.
    pub fn delete_alert(&mut self, alert: &MotionAlert) {
        let window = self.config.image_association_ms;
        self.alerts.retain(|a| !a.same_alert(alert));
        self.images.retain(|img| {
            !(img.node_id == alert.node_id && img.received_at.abs_diff(alert.received_at) <= window)
        });
        debug!("deleted alert from node {}", alert.node_id);
    }

    /// Accepted alerts, newest first.
    pub fn alerts(&self) -> impl Iterator<Item = &MotionAlert> {
        self.alerts.iter()
    }

    /// Completed images, newest first.
    pub fn images(&self) -> impl Iterator<Item = &CapturedImage> {
        self.images.iter()
    }

    pub fn peers(&self) -> &[PeerDevice] {
        &self.peers
    }

    /// Snapshot of per-node status. Later updates never mutate a snapshot.
    pub fn statuses(&self) -> StatusMap {
        Arc::clone(&self.statuses)
    }

    pub fn transfer_progress(&self) -> Option<TransferProgress> {
        self.reassembler.progress()
    }

    /// Events queued since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Feed one transport callback. Returns what the transport should do next.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> Vec<Action> {
        match &event {
            TransportEvent::ScanResult(peer) => {
                self.on_scan_result(peer.clone());
                vec![]
            }
            TransportEvent::Notification {
                characteristic,
                value,
            } => {
                self.on_notification(characteristic, value);
                vec![]
            }
            _ => self.step(|link| link.on_transport_event(&event)),
        }
    }

    fn step(&mut self, f: impl FnOnce(&mut LinkMachine) -> Vec<Action>) -> Vec<Action> {
        let before = self.link.state();
        let actions = f(&mut self.link);
        self.note_state(before);
        actions
    }

    fn note_state(&mut self, before: LinkState) {
        let after = self.link.state();
        if after == before {
            return;
        }
        if !after.has_transport() {
            self.drop_transfer();
        }
        self.events.push(SessionEvent::StateChanged(after));
    }

    fn drop_transfer(&mut self) {
        if self.reassembler.abort() {
            warn!("in-flight image transfer dropped");
        }
    }

    fn on_scan_result(&mut self, peer: PeerDevice) {
        if self.link.state() != LinkState::Scanning {
            trace!("scan result for {} outside a scan, ignored", peer.address);
            return;
        }
        debug!(
            "found device: {} ({})",
            peer.display_name.as_deref().unwrap_or("Unknown"),
            peer.address
        );
        match self.peers.iter_mut().find(|p| p.address == peer.address) {
            Some(existing) => *existing = peer,
            None => self.peers.push(peer),
        }
        self.events.push(SessionEvent::PeersChanged(self.peers.clone()));
    }

    fn on_notification(&mut self, characteristic: &Uuid, value: &[u8]) {
        let Some(channel) = self.link.route(characteristic) else {
            trace!("notification on unrouted characteristic {}", characteristic);
            return;
        };
        match channel {
            Channel::Motion => self.on_motion(value),
            Channel::Image => self.on_image(value),
            Channel::Status => self.on_status(value),
            Channel::Command => trace!("notification on command channel ignored"),
        }
    }

    fn on_motion(&mut self, value: &[u8]) {
        let frame = match wire::decode_motion(value) {
            Ok(f) => f,
            Err(e) => {
                trace!("dropping motion frame: {}", e);
                return;
            }
        };
        let now = self.clock.now_ms();
        if !self.gate.admit(now) {
            debug!(
                "ignoring alert from node {} (within {}ms global cooldown)",
                frame.node_id, self.config.alert_cooldown_ms
            );
            return;
        }
        let alert = MotionAlert {
            node_id: frame.node_id,
            device_timestamp: frame.timestamp,
            has_image: frame.has_image,
            route: frame.route,
            received_at: now,
        };
        info!(
            "motion alert from node {}, hasImage={}",
            alert.node_id, alert.has_image
        );
        self.alerts.push(alert.clone());
        self.events.push(SessionEvent::MotionAlert(alert));
    }

    fn on_image(&mut self, value: &[u8]) {
        let frame = match wire::decode_image(value) {
            Ok(f) => f,
            Err(e) => {
                trace!("dropping image frame: {}", e);
                return;
            }
        };
        match frame {
            ImageFrame::Start {
                node_id,
                image_id,
                total_size,
                total_chunks,
            } => {
                if let Err(e) = self
                    .reassembler
                    .start(node_id, image_id, total_size, total_chunks)
                {
                    warn!("image {} from node {} refused: {}", image_id, node_id, e);
                }
            }
            ImageFrame::Chunk {
                index,
                total_chunks,
                data,
            } => match self.reassembler.chunk(index, &data) {
                ChunkOutcome::Stored => {
                    trace!("image chunk {}/{}", u32::from(index) + 1, total_chunks)
                }
                ChunkOutcome::NoTransfer => debug!("image chunk {} without a start", index),
                ChunkOutcome::OutOfBounds => debug!("image chunk {} past buffer end", index),
            },
            ImageFrame::End { image_id } => {
                let now = self.clock.now_ms();
                if let Some(image) = self.reassembler.end(image_id, now) {
                    info!(
                        "image complete: node {} id {} ({} bytes)",
                        image.node_id,
                        image.image_id,
                        image.payload.len()
                    );
                    self.images.push(image.clone());
                    self.events.push(SessionEvent::ImageReceived(image));
                }
            }
        }
    }

    fn on_status(&mut self, value: &[u8]) {
        let frame = match wire::decode_status(value) {
            Ok(f) => f,
            Err(e) => {
                trace!("dropping status frame: {}", e);
                return;
            }
        };
        let status = NodeStatus {
            node_id: frame.node_id,
            battery_percent: frame.battery,
            signal_strength: frame.rssi,
            mesh_node_count: frame.mesh_nodes,
            last_seen: self.clock.now_ms(),
        };
        debug!(
            "status from node {}: battery={}%, rssi={}",
            status.node_id, status.battery_percent, status.signal_strength
        );
        Arc::make_mut(&mut self.statuses).insert(status.node_id, status);
        self.events.push(SessionEvent::StatusUpdated(status));
    }
}
