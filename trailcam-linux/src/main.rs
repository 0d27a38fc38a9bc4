// Trail camera gateway client for Linux: BLE central daemon.

mod config;
mod transport;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};

use trailcam_core::{Action, CapturedImage, LinkState, Session, SessionEvent};

use crate::config::Config;
use crate::transport::BleTransport;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const RETRY_DELAY: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let mut connect = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("trailcam-linux {}", VERSION);
                return Ok(());
            }
            "--connect" => match args.next() {
                Some(addr) => connect = Some(addr),
                None => bail!("--connect needs an address"),
            },
            other => bail!("unknown argument: {}", other),
        }
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut cfg = config::load()?;
    if connect.is_some() {
        cfg.gateway_address = connect;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    tokio::fs::create_dir_all(&cfg.image_dir)
        .await
        .with_context(|| format!("creating {}", cfg.image_dir.display()))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut transport = BleTransport::new(tx).await?;
    let mut session = Session::new(cfg.session.clone());

    let actions = begin(&mut session, &cfg)?;
    transport.execute_all(actions).await;

    let mut status_tick = cfg
        .status_interval_secs
        .filter(|&s| s > 0)
        .map(|s| tokio::time::interval(Duration::from_secs(s)));
    let mut retry_at: Option<Instant> = None;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let actions = tokio::select! {
            Some(event) = rx.recv() => session.on_transport_event(event),
            _ = tick(&mut status_tick) => session.request_status(),
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                if session.state().is_resting() {
                    begin(&mut session, &cfg)?
                } else {
                    vec![]
                }
            }
            r = &mut shutdown => {
                r?;
                break;
            }
        };
        transport.execute_all(actions).await;

        for event in session.take_events() {
            if let Some(follow_up) = on_session_event(&mut session, &cfg, event).await {
                transport.execute_all(follow_up).await;
            }
        }
        if retry_at.is_none() && session.state().is_resting() {
            retry_at = Some(Instant::now() + RETRY_DELAY);
        }
    }

    info!("shutting down");
    let actions = session.disconnect();
    transport.execute_all(actions).await;
    Ok(())
}

/// Connect to the configured gateway, or scan for one.
fn begin(session: &mut Session, cfg: &Config) -> Result<Vec<Action>> {
    match &cfg.gateway_address {
        Some(addr) => Ok(session.connect(addr)),
        None => session.start_scan().context("starting scan"),
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn on_session_event(
    session: &mut Session,
    cfg: &Config,
    event: SessionEvent,
) -> Option<Vec<Action>> {
    match event {
        SessionEvent::StateChanged(state) => {
            info!("link state: {:?}", state);
            if state == LinkState::Ready {
                return Some(session.request_status());
            }
        }
        SessionEvent::PeersChanged(peers) => {
            if cfg.gateway_address.is_none() && session.state() == LinkState::Scanning {
                if let Some(first) = peers.first() {
                    info!(
                        "connecting to first gateway found: {} ({})",
                        first.display_name.as_deref().unwrap_or("Unknown"),
                        first.address
                    );
                    return Some(session.connect(&first.address));
                }
            }
        }
        SessionEvent::MotionAlert(alert) => {
            info!(
                "motion at node {} (t={}, image={}, route={:?})",
                alert.node_id, alert.device_timestamp, alert.has_image, alert.route
            );
        }
        SessionEvent::ImageReceived(image) => {
            if let Err(e) = save_image(&cfg.image_dir, &image).await {
                warn!("saving image {} from node {}: {:#}", image.image_id, image.node_id, e);
            }
        }
        SessionEvent::StatusUpdated(status) => {
            info!(
                "node {}{}: battery {}%, rssi {}, mesh {}",
                status.node_id,
                if status.is_gateway() { " (gateway)" } else { "" },
                status.battery_percent,
                status.signal_strength,
                status.mesh_node_count
            );
        }
        SessionEvent::AlertsCleared => {}
    }
    None
}

fn image_path(dir: &Path, image: &CapturedImage) -> PathBuf {
    dir.join(format!(
        "node{}_img{}_{}.jpg",
        image.node_id, image.image_id, image.received_at
    ))
}

async fn save_image(dir: &Path, image: &CapturedImage) -> Result<()> {
    let path = image_path(dir, image);
    tokio::fs::write(&path, &image.payload)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!("saved {} ({} bytes)", path.display(), image.payload.len());
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_file_name() {
        let image = CapturedImage {
            node_id: 3,
            image_id: 12,
            payload: vec![0xFF, 0xD8],
            received_at: 1_700_000_000_123,
        };
        assert_eq!(
            image_path(Path::new("/tmp/cams"), &image),
            PathBuf::from("/tmp/cams/node3_img12_1700000000123.jpg")
        );
    }

    #[test]
    fn begin_scans_without_address() {
        let cfg = Config::default();
        let mut session = Session::new(cfg.session.clone());
        let actions = begin(&mut session, &cfg).unwrap();
        assert!(matches!(actions.last(), Some(Action::StartScan { .. })));
        assert_eq!(session.state(), LinkState::Scanning);
    }

    #[test]
    fn begin_connects_to_configured_gateway() {
        let cfg = Config {
            gateway_address: Some("AA:BB:CC:DD:EE:FF".into()),
            ..Config::default()
        };
        let mut session = Session::new(cfg.session.clone());
        let actions = begin(&mut session, &cfg).unwrap();
        assert_eq!(
            actions,
            vec![Action::Connect {
                address: "AA:BB:CC:DD:EE:FF".into()
            }]
        );
    }
}
