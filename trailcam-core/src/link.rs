//! Link state machine: scan, connect, MTU, service discovery, and the
//! one-at-a-time notification subscriptions. Host-driven: transport events go
//! in, transport actions come out.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::{Channel, ChannelMap, SUBSCRIPTION_ORDER};
use crate::model::PeerDevice;

/// Connection lifecycle. Exactly one is active; only transport events and the
/// facade's scan/connect/disconnect requests move it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    NegotiatingMtu,
    DiscoveringCapabilities,
    /// Waiting for the acknowledgment of this channel's subscription.
    SubscribingChannel(Channel),
    Ready,
    Disconnected,
}

impl LinkState {
    /// A transport connection exists or is being set up.
    pub fn has_transport(self) -> bool {
        matches!(
            self,
            LinkState::Connecting
                | LinkState::NegotiatingMtu
                | LinkState::DiscoveringCapabilities
                | LinkState::SubscribingChannel(_)
                | LinkState::Ready
        )
    }

    /// Idle and Disconnected are both resting states.
    pub fn is_resting(self) -> bool {
        matches!(self, LinkState::Idle | LinkState::Disconnected)
    }
}

/// Service and characteristics reported by the transport after discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Callbacks from the transport. The host must deliver them one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    ScanResult(PeerDevice),
    ScanFailed { code: i32 },
    /// The timer armed by `Action::StartScan` fired.
    ScanTimedOut { scan_id: u32 },
    Connected,
    Disconnected,
    MtuChanged { mtu: u16, success: bool },
    ServicesDiscovered { services: Vec<GattService> },
    DiscoveryFailed { status: i32 },
    /// Notification-enable descriptor write completed for this characteristic.
    DescriptorWritten { characteristic: Uuid, success: bool },
    Notification { characteristic: Uuid, value: Vec<u8> },
}

/// Work for the transport. Fire-and-forget; results come back as `TransportEvent`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Scan filtered on `service`; post `ScanTimedOut { scan_id }` after `timeout_ms`.
    StartScan {
        service: Uuid,
        timeout_ms: u64,
        scan_id: u32,
    },
    StopScan,
    Connect { address: String },
    RequestMtu { mtu: u16 },
    DiscoverServices,
    EnableNotifications { characteristic: Uuid },
    Write { characteristic: Uuid, payload: Vec<u8> },
    /// Disconnect and release the transport connection.
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("radio is disabled")]
    RadioDisabled,
    #[error("not allowed in state {0:?}")]
    InvalidState(LinkState),
}

pub struct LinkMachine {
    state: LinkState,
    channels: ChannelMap,
    /// Characteristics resolved on the connected gateway. Cleared on disconnect.
    handles: Option<ChannelMap>,
    scan_timeout_ms: u64,
    preferred_mtu: u16,
    scan_id: u32,
    radio_enabled: bool,
    target: Option<String>,
    mtu: Option<u16>,
}

impl LinkMachine {
    pub fn new(channels: ChannelMap, scan_timeout_ms: u64, preferred_mtu: u16) -> Self {
        Self {
            state: LinkState::Idle,
            channels,
            handles: None,
            scan_timeout_ms,
            preferred_mtu,
            scan_id: 0,
            radio_enabled: true,
            target: None,
            mtu: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready
    }

    pub fn set_radio_enabled(&mut self, enabled: bool) {
        self.radio_enabled = enabled;
    }

    pub fn radio_enabled(&self) -> bool {
        self.radio_enabled
    }

    /// Address of the gateway being connected or connected to.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// MTU reported by a successful negotiation on this connection.
    pub fn mtu(&self) -> Option<u16> {
        self.mtu
    }

    pub fn start_scan(&mut self) -> Result<Vec<Action>, LinkError> {
        if !self.radio_enabled {
            return Err(LinkError::RadioDisabled);
        }
        let mut actions = Vec::new();
        match self.state {
            LinkState::Idle | LinkState::Disconnected => {}
            LinkState::Scanning => actions.push(Action::StopScan),
            other => return Err(LinkError::InvalidState(other)),
        }
        self.scan_id = self.scan_id.wrapping_add(1);
        self.state = LinkState::Scanning;
        actions.push(Action::StartScan {
            service: self.channels.service,
            timeout_ms: self.scan_timeout_ms,
            scan_id: self.scan_id,
        });
        debug!("scan {} started", self.scan_id);
        Ok(actions)
    }

    pub fn stop_scan(&mut self) -> Vec<Action> {
        if self.state != LinkState::Scanning {
            return vec![];
        }
        self.state = LinkState::Idle;
        vec![Action::StopScan]
    }

    /// Connect to `address`, superseding any scan or earlier connection.
    pub fn connect(&mut self, address: &str) -> Vec<Action> {
        let mut actions = self.release();
        self.state = LinkState::Connecting;
        self.target = Some(address.to_string());
        info!("connecting to {}", address);
        actions.push(Action::Connect {
            address: address.to_string(),
        });
        actions
    }

    pub fn disconnect(&mut self) -> Vec<Action> {
        let actions = self.release();
        self.state = LinkState::Disconnected;
        info!("disconnected");
        actions
    }

    /// Stop whatever scan or connection is running and forget its handles.
    fn release(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state == LinkState::Scanning {
            actions.push(Action::StopScan);
        }
        if self.state.has_transport() {
            actions.push(Action::Disconnect);
        }
        self.clear_connection();
        actions
    }

    fn clear_connection(&mut self) {
        self.handles = None;
        self.target = None;
        self.mtu = None;
    }

    /// Channel a notification arrived on. Only resolved while connected.
    pub fn route(&self, characteristic: &Uuid) -> Option<Channel> {
        self.handles.as_ref()?.channel_for(characteristic)
    }

    /// Write to the command channel. `None` unless Ready.
    pub fn command_write(&self, payload: Vec<u8>) -> Option<Action> {
        if self.state != LinkState::Ready {
            return None;
        }
        let handles = self.handles.as_ref()?;
        Some(Action::Write {
            characteristic: handles.command,
            payload,
        })
    }

    /// Advance on a transport event. Notifications and scan results are not
    /// link concerns and leave the state untouched.
    pub fn on_transport_event(&mut self, event: &TransportEvent) -> Vec<Action> {
        match event {
            TransportEvent::ScanResult(_) | TransportEvent::Notification { .. } => vec![],
            TransportEvent::ScanFailed { code } => {
                warn!("scan failed: {}", code);
                if self.state == LinkState::Scanning {
                    self.state = LinkState::Idle;
                }
                vec![]
            }
            TransportEvent::ScanTimedOut { scan_id } => {
                if self.state == LinkState::Scanning && *scan_id == self.scan_id {
                    debug!("scan {} timed out", scan_id);
                    self.state = LinkState::Idle;
                    vec![Action::StopScan]
                } else {
                    vec![]
                }
            }
            TransportEvent::Connected => {
                if self.state != LinkState::Connecting {
                    debug!("ignoring connected event in {:?}", self.state);
                    return vec![];
                }
                self.state = LinkState::NegotiatingMtu;
                vec![Action::RequestMtu {
                    mtu: self.preferred_mtu,
                }]
            }
            TransportEvent::Disconnected => {
                if !self.state.has_transport() {
                    debug!("ignoring disconnected event in {:?}", self.state);
                    return vec![];
                }
                info!("transport disconnected in {:?}", self.state);
                self.clear_connection();
                self.state = LinkState::Disconnected;
                vec![]
            }
            TransportEvent::MtuChanged { mtu, success } => {
                if self.state != LinkState::NegotiatingMtu {
                    return vec![];
                }
                if *success {
                    debug!("mtu negotiated: {}", mtu);
                    self.mtu = Some(*mtu);
                } else {
                    warn!("mtu negotiation failed (mtu {}), continuing", mtu);
                }
                self.state = LinkState::DiscoveringCapabilities;
                vec![Action::DiscoverServices]
            }
            TransportEvent::ServicesDiscovered { services } => {
                if self.state != LinkState::DiscoveringCapabilities {
                    return vec![];
                }
                self.on_services(services)
            }
            TransportEvent::DiscoveryFailed { status } => {
                if self.state != LinkState::DiscoveringCapabilities {
                    return vec![];
                }
                warn!("service discovery failed: {}", status);
                self.teardown()
            }
            TransportEvent::DescriptorWritten {
                characteristic,
                success,
            } => self.on_subscribed(characteristic, *success),
        }
    }

    fn on_services(&mut self, services: &[GattService]) -> Vec<Action> {
        let Some(service) = services.iter().find(|s| s.uuid == self.channels.service) else {
            warn!("gateway service not found, wrong device");
            return self.teardown();
        };
        let missing: Vec<Channel> = Channel::ALL
            .into_iter()
            .filter(|&c| !service.characteristics.contains(&self.channels.uuid(c)))
            .collect();
        if !missing.is_empty() {
            warn!("gateway service lacks channels {:?}, wrong device", missing);
            return self.teardown();
        }
        let first = SUBSCRIPTION_ORDER[0];
        self.handles = Some(self.channels.clone());
        self.state = LinkState::SubscribingChannel(first);
        vec![Action::EnableNotifications {
            characteristic: self.channels.uuid(first),
        }]
    }

    /// The next request follows from which channel was acknowledged, not from
    /// a counter.
    fn on_subscribed(&mut self, characteristic: &Uuid, success: bool) -> Vec<Action> {
        let LinkState::SubscribingChannel(pending) = self.state else {
            return vec![];
        };
        let Some(channel) = self.route(characteristic).filter(|c| c.is_notify()) else {
            debug!("descriptor write for unknown characteristic {}", characteristic);
            return vec![];
        };
        // Only move forward; Ready needs the last channel to be the pending one.
        if order_of(channel) < order_of(pending)
            || (channel.next_subscription().is_none() && channel != pending)
        {
            debug!("ignoring {:?} ack while {:?} is pending", channel, pending);
            return vec![];
        }
        if !success {
            warn!("enabling {:?} notifications failed, continuing", channel);
        }
        match channel.next_subscription() {
            Some(next) => {
                self.state = LinkState::SubscribingChannel(next);
                vec![Action::EnableNotifications {
                    characteristic: self.channels.uuid(next),
                }]
            }
            None => {
                info!("link ready");
                self.state = LinkState::Ready;
                vec![]
            }
        }
    }

    /// Terminal for this session: drop the connection rather than retry.
    fn teardown(&mut self) -> Vec<Action> {
        self.clear_connection();
        self.state = LinkState::Disconnected;
        vec![Action::Disconnect]
    }
}

fn order_of(channel: Channel) -> usize {
    SUBSCRIPTION_ORDER
        .iter()
        .position(|&c| c == channel)
        .unwrap_or(SUBSCRIPTION_ORDER.len())
}
