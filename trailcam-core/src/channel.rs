//! Channel identities: the four GATT characteristics the gateway exposes and their UUIDs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gateway service UUID (advertised; used as the scan filter).
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);
/// Motion alerts (notify).
pub const MOTION_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);
/// Image start/chunk/end frames (notify).
pub const IMAGE_UUID: Uuid = Uuid::from_u128(0xcba1d466_344c_4be3_ab3f_189f80dd7518);
/// Node status reports (notify).
pub const STATUS_UUID: Uuid = Uuid::from_u128(0x2c957792_46f0_4d8c_9a76_3c0e8fb4a4d5);
/// Commands from the client (write).
pub const COMMAND_UUID: Uuid = Uuid::from_u128(0xf27b53ad_c63d_49a0_8c0f_9f297e6cc520);
/// Client Characteristic Configuration Descriptor, written to enable notifications.
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// One of the four logical channels. Closed set; routing is a match, not a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Motion,
    Image,
    Status,
    Command,
}

/// Notification subscriptions are enabled in this order, one at a time.
pub const SUBSCRIPTION_ORDER: [Channel; 3] = [Channel::Motion, Channel::Image, Channel::Status];

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Motion,
        Channel::Image,
        Channel::Status,
        Channel::Command,
    ];

    /// Subscription to request after this channel's subscription was acknowledged.
    /// `None` once the last notify channel is done (and for Command, which is never subscribed).
    pub fn next_subscription(self) -> Option<Channel> {
        match self {
            Channel::Motion => Some(Channel::Image),
            Channel::Image => Some(Channel::Status),
            Channel::Status | Channel::Command => None,
        }
    }

    pub fn is_notify(self) -> bool {
        !matches!(self, Channel::Command)
    }
}

/// UUIDs of the gateway service and its channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    pub service: Uuid,
    pub motion: Uuid,
    pub image: Uuid,
    pub status: Uuid,
    pub command: Uuid,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
            motion: MOTION_UUID,
            image: IMAGE_UUID,
            status: STATUS_UUID,
            command: COMMAND_UUID,
        }
    }
}

impl ChannelMap {
    pub fn uuid(&self, channel: Channel) -> Uuid {
        match channel {
            Channel::Motion => self.motion,
            Channel::Image => self.image,
            Channel::Status => self.status,
            Channel::Command => self.command,
        }
    }

    /// Which channel a characteristic UUID belongs to, if any.
    pub fn channel_for(&self, characteristic: &Uuid) -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|&c| self.uuid(c) == *characteristic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uuids_match_gateway_firmware() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "4fafc201-1fb5-459e-8fcc-c5c9c331914b"
        );
        assert_eq!(
            COMMAND_UUID.to_string(),
            "f27b53ad-c63d-49a0-8c0f-9f297e6cc520"
        );
        assert_eq!(CCCD_UUID.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn lookup_by_uuid() {
        let map = ChannelMap::default();
        for c in Channel::ALL {
            assert_eq!(map.channel_for(&map.uuid(c)), Some(c));
        }
        assert_eq!(map.channel_for(&SERVICE_UUID), None);
        assert_eq!(map.channel_for(&CCCD_UUID), None);
    }

    #[test]
    fn subscription_chain_ends_at_status() {
        assert_eq!(Channel::Motion.next_subscription(), Some(Channel::Image));
        assert_eq!(Channel::Image.next_subscription(), Some(Channel::Status));
        assert_eq!(Channel::Status.next_subscription(), None);
        assert_eq!(Channel::Command.next_subscription(), None);
        assert!(SUBSCRIPTION_ORDER.iter().all(|c| c.is_notify()));
        assert!(!Channel::Command.is_notify());
    }
}
