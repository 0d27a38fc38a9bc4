//! Values surfaced to the host: discovered peers, alerts, images, node status.
//! Wall-clock fields are milliseconds since the Unix epoch.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Gateway seen during a scan. `address` is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDevice {
    pub display_name: Option<String>,
    pub address: String,
    pub signal_strength: i16,
}

/// Accepted motion alert. Identity is (node_id, received_at).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionAlert {
    pub node_id: u16,
    /// Node-local capture time. An ordering hint only, not wall-clock truth.
    pub device_timestamp: u32,
    pub has_image: bool,
    /// Mesh hops the alert took, source first. Empty for gateways that don't report it.
    pub route: Vec<u16>,
    pub received_at: u64,
}

impl MotionAlert {
    pub fn same_alert(&self, other: &MotionAlert) -> bool {
        self.node_id == other.node_id && self.received_at == other.received_at
    }
}

/// Reassembled image. Two images with the same (node_id, image_id) are the same image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedImage {
    pub node_id: u16,
    pub image_id: u16,
    pub payload: Vec<u8>,
    pub received_at: u64,
}

impl PartialEq for CapturedImage {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id && self.image_id == other.image_id
    }
}

impl Eq for CapturedImage {}

impl Hash for CapturedImage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
        self.image_id.hash(state);
    }
}

/// Last status reported by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: u16,
    pub battery_percent: u8,
    pub signal_strength: i8,
    pub mesh_node_count: u8,
    pub last_seen: u64,
}

impl NodeStatus {
    /// The gateway reports itself with signal strength 0.
    pub fn is_gateway(&self) -> bool {
        self.signal_strength == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn image_identity_ignores_payload() {
        let a = CapturedImage {
            node_id: 2,
            image_id: 5,
            payload: vec![1, 2, 3],
            received_at: 10,
        };
        let b = CapturedImage {
            payload: vec![9],
            received_at: 99,
            ..a.clone()
        };
        let c = CapturedImage {
            image_id: 6,
            ..a.clone()
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn alert_identity() {
        let a = MotionAlert {
            node_id: 3,
            device_timestamp: 100,
            has_image: true,
            route: vec![],
            received_at: 5_000,
        };
        let b = MotionAlert {
            device_timestamp: 7,
            has_image: false,
            ..a.clone()
        };
        assert!(a.same_alert(&b));
        assert!(!a.same_alert(&MotionAlert {
            received_at: 5_001,
            ..a.clone()
        }));
    }

    #[test]
    fn gateway_status() {
        let s = NodeStatus {
            node_id: 1,
            battery_percent: 100,
            signal_strength: 0,
            mesh_node_count: 4,
            last_seen: 0,
        };
        assert!(s.is_gateway());
        assert!(!NodeStatus {
            signal_strength: -70,
            ..s
        }
        .is_gateway());
    }
}
