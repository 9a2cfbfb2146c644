use std::collections::HashSet;
use std::io::Write;
use std::net::Ipv4Addr;
use std::time::Duration;
use anyhow::{Context, Result};
use mdns_sd::ServiceDaemon;
use tokio_util::sync::CancellationToken;
use shared::notification::{Notification, NotificationPayload};
use shared::types::PairingRole;
use crate::cache::store::DirectoryStore;
use crate::client::{http_client, DeviceClient};
use crate::config::Config;
use crate::mdns::browser;
use crate::notify::stream::{StreamError, StreamPolicy};
use crate::notify::watch::{self, DeviceStream, WatchObserver};
use crate::topology::{build_topology, HttpSystemQuery, Topology, TopologyEntry};

/// Browse for products and replace the cache with what answered
pub async fn find_products(config: &Config, timeout: Option<u64>, cancel: &CancellationToken) -> Result<()> {
    let budget = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.discovery.timeout());
    let store = DirectoryStore::new(config.cache.resolve_path()?);

    let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;

    eprintln!("Scanning for products...");
    let result = browser::discover(&daemon, Some(budget), cancel).await;

    if let Err(e) = daemon.shutdown() {
        tracing::warn!("Failed to shutdown mDNS daemon: {}", e);
    }

    // An interrupted scan leaves the previous cache in place
    let directory = result.context("Product discovery failed")?;
    store
        .save(&directory)
        .context("Failed to save discovered products")?;
    tracing::info!("Cached {} product(s) at {}", directory.len(), store.path().display());

    eprintln!("Found {} products.", directory.len());
    Ok(())
}

/// Print the merged system topology built from the cached products
pub async fn list_products(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let store = DirectoryStore::new(config.cache.resolve_path()?);
    let directory = store.load()?;

    let http = http_client(&config.device).context("Failed to build HTTP client")?;
    let query = HttpSystemQuery::new(http, config.device.clone());
    let topology = build_topology(&directory, &query, config.topology.policy, cancel).await;

    if topology.is_empty() {
        eprintln!("No products responded.");
        return Ok(());
    }

    let table = render_table(&product_rows(&topology));
    std::io::stdout()
        .write_all(table.as_bytes())
        .context("Failed to write product list")?;
    Ok(())
}

/// Stream a product's notifications until interrupted
pub async fn watch(config: &Config, address: &str, cancel: &CancellationToken) -> Result<()> {
    let http = http_client(&config.device).context("Failed to build HTTP client")?;
    let client = DeviceClient::new(http, address, &config.device);
    let policy = StreamPolicy {
        max_consecutive_decode_errors: config.stream.max_consecutive_decode_errors,
    };
    let opener = DeviceStream::new(client, policy);
    let mut printer = PrintObserver::new(std::io::stdout());

    watch::watch(&opener, &mut printer, config.stream.reconnect_delay(), cancel)
        .await
        .with_context(|| format!("Watching {} failed", address))
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    name: String,
    role: String,
    addresses: String,
    jid: String,
    online: String,
    state: String,
}

const HEADER: [&str; 6] = ["NAME", "ROLE", "IP", "JID", "ONLINE", "STATE"];

impl Row {
    fn from_entry(entry: &TopologyEntry, prefix: &str) -> Self {
        let product = &entry.product;
        Self {
            name: format!("{}{}", prefix, product.friendly_name),
            role: product.role().to_string(),
            addresses: join_addresses(&entry.addresses),
            jid: product.jid.clone(),
            online: product.online.to_string(),
            state: product
                .state()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }

    /// Partner named by a master but absent from the topology
    fn unknown_slave(jid: &str) -> Self {
        Self {
            name: " + <unknown>".to_string(),
            role: PairingRole::Slave.to_string(),
            addresses: "-".to_string(),
            jid: jid.to_string(),
            online: "-".to_string(),
            state: "-".to_string(),
        }
    }

    fn cells(&self) -> [&str; 6] {
        [&self.name, &self.role, &self.addresses, &self.jid, &self.online, &self.state]
    }
}

fn join_addresses(addresses: &[Ipv4Addr]) -> String {
    if addresses.is_empty() {
        return "-".to_string();
    }
    addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// One row per product; a slave is listed under the master that claims it
fn product_rows(topology: &Topology) -> Vec<Row> {
    let claimed: HashSet<&str> = topology
        .iter()
        .filter(|e| e.product.role() == PairingRole::Master)
        .filter_map(|e| e.product.integrated.as_ref())
        .map(|i| i.jid.as_str())
        .collect();

    let mut rows = Vec::with_capacity(topology.len());
    for entry in topology.iter() {
        if claimed.contains(entry.product.jid.as_str()) {
            continue;
        }
        rows.push(Row::from_entry(entry, ""));

        if entry.product.role() != PairingRole::Master {
            continue;
        }
        match topology.partner(entry) {
            Some(slave) => rows.push(Row::from_entry(slave, " + ")),
            None => {
                if let Some(integrated) = &entry.product.integrated {
                    rows.push(Row::unknown_slave(&integrated.jid));
                }
            }
        }
    }
    rows
}

fn render_table(rows: &[Row]) -> String {
    let mut widths = HEADER.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row.cells()) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for cells in std::iter::once(HEADER).chain(rows.iter().map(Row::cells)) {
        let line = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Prints each notification as a block of `Field: value` lines
struct PrintObserver<W: Write> {
    out: W,
}

impl<W: Write> PrintObserver<W> {
    fn new(out: W) -> Self {
        Self { out }
    }

    fn emit(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            tracing::warn!("Failed to write notification: {}", e);
        }
    }
}

impl<W: Write> WatchObserver for PrintObserver<W> {
    fn notification(
        &mut self,
        notification: &Notification,
        payload: Result<NotificationPayload, serde_json::Error>,
    ) {
        let mut text = format!(
            "Type: {}\nKind: {}\nTimestamp: {}\n",
            notification.kind_type, notification.kind, notification.timestamp
        );
        if let Some(time) = notification.time() {
            text.push_str(&format!("Time: {}\n", time.format("%Y-%m-%d %H:%M:%S%.3f %:z")));
        }
        text.push_str(&format!("Data: {}\n", notification.data));
        match payload {
            Ok(payload) => {
                if let Some(summary) = describe(&payload) {
                    text.push_str(&format!("Summary: {}\n", summary));
                }
            }
            Err(e) => tracing::debug!("Unexpected {} payload: {}", notification.kind_type, e),
        }
        text.push('\n');
        self.emit(&text);
    }

    fn reconnecting(&mut self) {
        self.emit("[Reconnecting...]\n\n");
    }

    fn stream_error(&mut self, error: &StreamError) {
        self.emit(&format!("Error: {}\n\n", error));
    }
}

/// Short human summary of a recognised payload
fn describe(payload: &NotificationPayload) -> Option<String> {
    let summary = match payload {
        NotificationPayload::Volume(v) => {
            let muted = if v.speaker.muted { " (muted)" } else { "" };
            format!(
                "volume {} of {}..{}{}",
                v.speaker.level, v.speaker.range.minimum, v.speaker.range.maximum, muted
            )
        }
        NotificationPayload::ProgressInformation(p) => {
            format!("{} at {}s of {}s", p.state, p.position, p.total_duration)
        }
        NotificationPayload::NowPlayingStoredMusic(n) => {
            format!("now playing {} by {} from {}", n.name, n.artist, n.album)
        }
        NotificationPayload::NowPlayingNetRadio(n) => {
            format!("now playing {} ({})", n.name, n.live_description)
        }
        NotificationPayload::NowPlayingEnded => "playback ended".to_string(),
        NotificationPayload::PlayQueueChanged(q) => {
            format!("play queue {} at revision {}", q.play_queue_id, q.revision)
        }
        NotificationPayload::Source(s) => {
            format!("source {} on {}", s.primary_experience.source.friendly_name, s.primary_jid)
        }
        NotificationPayload::SourceExperienceChanged(s) => {
            format!("source experience {}", s.primary_experience.state)
        }
        NotificationPayload::SoftwareUpdateStatus(s) => format!("software update {}", s.state),
        NotificationPayload::Unknown(_) => return None,
    };
    Some(summary)
}
