//! BLE central over btleplug. Executes core `Action`s and posts the results back
//! as `TransportEvent`s on one channel, so the session sees them in order.

use std::time::Duration;

use anyhow::{anyhow, Result};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

use trailcam_core::{Action, GattService, PeerDevice, TransportEvent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
/// How long connect scans for an address the adapter has not cached.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const LOOKUP_POLL: Duration = Duration::from_millis(250);
/// BlueZ reports the connection before its GATT cache is filled.
const GATT_SETTLE: Duration = Duration::from_millis(600);

pub type EventSender = UnboundedSender<TransportEvent>;

pub struct BleTransport {
    adapter: Adapter,
    events: EventSender,
    peripheral: Option<Peripheral>,
    scan_tasks: Vec<JoinHandle<()>>,
    link_tasks: Vec<JoinHandle<()>>,
}

impl BleTransport {
    /// Open the first Bluetooth adapter.
    pub async fn new(events: EventSender) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no Bluetooth adapter found"))?;
        info!("using adapter {}", adapter.adapter_info().await.unwrap_or_default());
        Ok(Self {
            adapter,
            events,
            peripheral: None,
            scan_tasks: Vec::new(),
            link_tasks: Vec::new(),
        })
    }

    pub async fn execute_all(&mut self, actions: Vec<Action>) {
        for action in actions {
            self.execute(action).await;
        }
    }

    /// Run one action. Failures are reported as transport events, never returned.
    pub async fn execute(&mut self, action: Action) {
        debug!("action {:?}", action);
        match action {
            Action::StartScan {
                service,
                timeout_ms,
                scan_id,
            } => self.start_scan(service, timeout_ms, scan_id).await,
            Action::StopScan => self.stop_scan().await,
            Action::Connect { address } => self.connect(&address).await,
            Action::RequestMtu { mtu } => {
                // BlueZ negotiates the MTU itself on connect.
                self.post(TransportEvent::MtuChanged { mtu, success: true });
            }
            Action::DiscoverServices => self.discover_services(),
            Action::EnableNotifications { characteristic } => {
                self.enable_notifications(characteristic).await
            }
            Action::Write {
                characteristic,
                payload,
            } => self.write(characteristic, &payload).await,
            Action::Disconnect => self.disconnect().await,
        }
    }

    fn post(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    async fn start_scan(&mut self, service: Uuid, timeout_ms: u64, scan_id: u32) {
        abort_all(&mut self.scan_tasks);
        let filter = ScanFilter {
            services: vec![service],
        };
        if let Err(e) = self.adapter.start_scan(filter).await {
            warn!("start_scan: {}", e);
            self.post(TransportEvent::ScanFailed { code: -1 });
            return;
        }

        let events = self.events.clone();
        self.scan_tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let _ = events.send(TransportEvent::ScanTimedOut { scan_id });
        }));

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.scan_tasks.push(tokio::spawn(async move {
            let mut stream = match adapter.events().await {
                Ok(s) => s,
                Err(e) => {
                    warn!("scan: could not subscribe to adapter events: {}", e);
                    return;
                }
            };
            while let Some(event) = stream.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(p) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(props)) = p.properties().await else {
                    continue;
                };
                if !props.services.contains(&service) {
                    continue;
                }
                let peer = PeerDevice {
                    display_name: props.local_name,
                    address: props.address.to_string(),
                    signal_strength: props.rssi.unwrap_or(0),
                };
                if events.send(TransportEvent::ScanResult(peer)).is_err() {
                    return;
                }
            }
        }));
    }

    async fn stop_scan(&mut self) {
        abort_all(&mut self.scan_tasks);
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan: {}", e);
        }
    }

    async fn find_peripheral(&self, address: &str) -> Option<Peripheral> {
        let peripherals = self.adapter.peripherals().await.unwrap_or_default();
        peripherals
            .into_iter()
            .find(|p| same_address(&p.address().to_string(), address))
    }

    /// Cached peripheral, or scan briefly until the adapter sees `address`.
    async fn lookup(&mut self, address: &str) -> Option<Peripheral> {
        if let Some(p) = self.find_peripheral(address).await {
            return Some(p);
        }
        debug!("{} not cached, scanning for it", address);
        abort_all(&mut self.scan_tasks);
        if let Err(e) = self.adapter.start_scan(ScanFilter::default()).await {
            warn!("start_scan: {}", e);
            return None;
        }
        let found = tokio::time::timeout(LOOKUP_TIMEOUT, async {
            loop {
                if let Some(p) = self.find_peripheral(address).await {
                    return p;
                }
                tokio::time::sleep(LOOKUP_POLL).await;
            }
        })
        .await
        .ok();
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan: {}", e);
        }
        found
    }

    async fn connect(&mut self, address: &str) {
        self.release().await;
        let Some(peripheral) = self.lookup(address).await else {
            warn!("{} not found within {:?}", address, LOOKUP_TIMEOUT);
            self.post(TransportEvent::Disconnected);
            return;
        };
        self.peripheral = Some(peripheral.clone());

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let watched = peripheral.id();
        self.link_tasks.push(tokio::spawn(async move {
            let Ok(mut stream) = adapter.events().await else {
                warn!("disconnect watcher: could not subscribe to adapter events");
                return;
            };
            while let Some(event) = stream.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == watched {
                        let _ = events.send(TransportEvent::Disconnected);
                        return;
                    }
                }
            }
        }));

        let events = self.events.clone();
        self.link_tasks.push(tokio::spawn(async move {
            let event = match tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect()).await {
                Ok(Ok(())) => TransportEvent::Connected,
                Ok(Err(e)) => {
                    warn!("connect: {}", e);
                    TransportEvent::Disconnected
                }
                Err(_) => {
                    warn!("connect timed out after {:?}", CONNECT_TIMEOUT);
                    TransportEvent::Disconnected
                }
            };
            let _ = events.send(event);
        }));
    }

    fn discover_services(&mut self) {
        let Some(peripheral) = self.peripheral.clone() else {
            self.post(TransportEvent::DiscoveryFailed { status: -1 });
            return;
        };
        let events = self.events.clone();
        self.link_tasks.push(tokio::spawn(async move {
            tokio::time::sleep(GATT_SETTLE).await;
            match tokio::time::timeout(DISCOVERY_TIMEOUT, peripheral.discover_services()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("discover_services: {}", e);
                    let _ = events.send(TransportEvent::DiscoveryFailed { status: -1 });
                    return;
                }
                Err(_) => {
                    warn!("discover_services timed out after {:?}", DISCOVERY_TIMEOUT);
                    let _ = events.send(TransportEvent::DiscoveryFailed { status: -2 });
                    return;
                }
            }
            let services = peripheral
                .services()
                .into_iter()
                .map(|s| GattService {
                    uuid: s.uuid,
                    characteristics: s.characteristics.into_iter().map(|c| c.uuid).collect(),
                })
                .collect();

            // Forward notifications before any subscription can produce one.
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    warn!("could not get notification stream: {}", e);
                    let _ = events.send(TransportEvent::DiscoveryFailed { status: -3 });
                    return;
                }
            };
            if events
                .send(TransportEvent::ServicesDiscovered { services })
                .is_err()
            {
                return;
            }
            while let Some(n) = notifications.next().await {
                let event = TransportEvent::Notification {
                    characteristic: n.uuid,
                    value: n.value,
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            debug!("notification stream ended");
        }));
    }

    fn characteristic(&self, uuid: Uuid) -> Option<(Peripheral, Characteristic)> {
        let p = self.peripheral.as_ref()?;
        let c = p.characteristics().into_iter().find(|c| c.uuid == uuid)?;
        Some((p.clone(), c))
    }

    async fn enable_notifications(&mut self, characteristic: Uuid) {
        let success = match self.characteristic(characteristic) {
            Some((p, c)) => match p.subscribe(&c).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("subscribe {}: {}", characteristic, e);
                    false
                }
            },
            None => {
                warn!("characteristic {} not found", characteristic);
                false
            }
        };
        self.post(TransportEvent::DescriptorWritten {
            characteristic,
            success,
        });
    }

    async fn write(&mut self, characteristic: Uuid, payload: &[u8]) {
        let Some((p, c)) = self.characteristic(characteristic) else {
            warn!("write: characteristic {} not found", characteristic);
            return;
        };
        if let Err(e) = p.write(&c, payload, WriteType::WithoutResponse).await {
            warn!("write {}: {}", characteristic, e);
        }
    }

    async fn disconnect(&mut self) {
        self.release().await;
    }

    /// Drop the current peripheral and its tasks without posting events.
    async fn release(&mut self) {
        abort_all(&mut self.link_tasks);
        if let Some(p) = self.peripheral.take() {
            if let Err(e) = p.disconnect().await {
                debug!("disconnect: {}", e);
            }
        }
    }
}

fn abort_all(tasks: &mut Vec<JoinHandle<()>>) {
    for t in tasks.drain(..) {
        t.abort();
    }
}

/// Bluetooth addresses compare case-insensitively; `-` and `:` separators are equivalent.
fn same_address(a: &str, b: &str) -> bool {
    let norm = |s: &str| -> String {
        s.trim()
            .chars()
            .map(|c| if c == '-' { ':' } else { c.to_ascii_uppercase() })
            .collect()
    };
    norm(a) == norm(b)
}
