use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use thiserror::Error;
use shared::protocol::{BEOREMOTE_SERVICE_TYPE, TXT_JID, TXT_NAME};
use shared::types::{DeviceRecord, Directory};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery needs a time budget")]
    NoTimeBudget,

    /// Interrupted before the browse window elapsed; the partial result is discarded
    #[error("discovery cancelled")]
    Cancelled,

    #[error("failed to start mDNS browse: {0}")]
    Browse(#[source] mdns_sd::Error),

    #[error("advertisement collector failed: {0}")]
    Collector(#[from] tokio::task::JoinError),
}

/// The parts of a resolved advertisement we care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub txt: HashMap<String, String>,
    pub addresses: Vec<Ipv4Addr>,
}

/// Browse for beoremote products until `budget` elapses or `cancel` fires.
///
/// Returns one record per `jid`. When the same product advertises more than
/// once, the most recently received advertisement wins.
/// A cancelled browse returns [`DiscoveryError::Cancelled`] rather than
/// whatever was seen before the interrupt.
pub async fn discover(
    daemon: &ServiceDaemon,
    budget: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<Directory, DiscoveryError> {
    let budget = budget.ok_or(DiscoveryError::NoTimeBudget)?;

    tracing::info!("Browsing {} for {:?}", BEOREMOTE_SERVICE_TYPE, budget);

    let receiver = daemon
        .browse(BEOREMOTE_SERVICE_TYPE)
        .map_err(DiscoveryError::Browse)?;

    let result = collect_window(receiver, budget, cancel).await;

    if let Err(e) = daemon.stop_browse(BEOREMOTE_SERVICE_TYPE) {
        tracing::warn!("Failed to stop browsing {}: {}", BEOREMOTE_SERVICE_TYPE, e);
    }

    let directory = result?;
    if cancel.is_cancelled() {
        return Err(DiscoveryError::Cancelled);
    }
    tracing::info!("Discovery finished with {} product(s)", directory.len());
    Ok(directory)
}

/// Run the browse window against a stream of daemon events, feeding a
/// collector task, and wait for the collector before returning.
async fn collect_window(
    events: flume::Receiver<ServiceEvent>,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<Directory, DiscoveryError> {
    let (tx, rx) = mpsc::channel(64);
    let collector = tokio::spawn(collect(rx));

    run_browse_window(events, budget, tx, cancel).await;

    Ok(collector.await?)
}

async fn run_browse_window(
    events: flume::Receiver<ServiceEvent>,
    budget: Duration,
    tx: mpsc::Sender<Advertisement>,
    cancel: &CancellationToken,
) {
    let deadline = tokio::time::sleep(budget);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::info!("Discovery cancelled");
                break;
            }

            _ = &mut deadline => {
                tracing::debug!("Browse window elapsed");
                break;
            }

            event = events.recv_async() => {
                match event {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        tracing::debug!("Resolved advertisement: {}", info.get_fullname());
                        if tx.send(convert_service_info(&info)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("Browse channel closed: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

/// Fold advertisements into a directory, last write wins per `jid`.
/// Advertisements without a `jid` are dropped.
async fn collect(mut rx: mpsc::Receiver<Advertisement>) -> Directory {
    let mut directory = Directory::new();

    while let Some(advertisement) = rx.recv().await {
        let Some(record) = into_record(advertisement) else {
            tracing::debug!("Ignoring advertisement without a jid");
            continue;
        };

        if let Some(previous) = directory.insert(record.jid.clone(), record) {
            tracing::debug!("Replaced earlier advertisement for {}", previous.jid);
        }
    }

    directory
}

fn into_record(advertisement: Advertisement) -> Option<DeviceRecord> {
    let mut txt = advertisement.txt;
    let jid = txt.remove(TXT_JID).filter(|jid| !jid.is_empty())?;
    let name = txt.remove(TXT_NAME).unwrap_or_default();

    Some(DeviceRecord {
        addresses: advertisement.addresses,
        name,
        jid,
    })
}

/// Reduce an mdns-sd ServiceInfo to an Advertisement
fn convert_service_info(info: &ServiceInfo) -> Advertisement {
    // IPv4 only, sorted so that repeated runs persist identical files
    let mut addresses: Vec<Ipv4Addr> = info
        .get_addresses()
        .iter()
        .filter_map(|addr| match addr {
            IpAddr::V4(ipv4) => Some(*ipv4),
            _ => None,
        })
        .collect();
    addresses.sort();

    // Attributes without a `=` carry no value and are skipped
    let txt: HashMap<String, String> = info
        .get_properties()
        .iter()
        .filter_map(|prop| {
            let value = prop.val()?;
            Some((prop.key().to_string(), String::from_utf8_lossy(value).into_owned()))
        })
        .collect();

    Advertisement { txt, addresses }
}
