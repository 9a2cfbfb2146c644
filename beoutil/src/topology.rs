use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use shared::types::{Directory, PairingRole, Product};
use crate::client::{ClientError, DeviceClient};
use crate::config::DeviceConfig;

/// Which view of a product wins when several products report it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// First product to answer wins; products are asked in jid order
    #[default]
    FirstResponder,
    /// As above, but a view reporting the product online replaces an offline one
    PreferOnline,
}

/// Issues the system query against one address
#[async_trait]
pub trait SystemQuery: Send + Sync {
    async fn system_products(&self, address: Ipv4Addr) -> Result<Vec<Product>, ClientError>;
}

pub struct HttpSystemQuery {
    http: reqwest::Client,
    config: DeviceConfig,
}

impl HttpSystemQuery {
    pub fn new(http: reqwest::Client, config: DeviceConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl SystemQuery for HttpSystemQuery {
    async fn system_products(&self, address: Ipv4Addr) -> Result<Vec<Product>, ClientError> {
        DeviceClient::new(self.http.clone(), &address.to_string(), &self.config)
            .system_products()
            .await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopologyEntry {
    pub product: Product,
    /// Only populated for products that were also discovered locally
    pub addresses: Vec<Ipv4Addr>,
}

/// Merged view of every product any cached product knows about
#[derive(Debug, Clone, Default)]
pub struct Topology {
    entries: BTreeMap<String, TopologyEntry>,
}

impl Topology {
    pub fn get(&self, jid: &str) -> Option<&TopologyEntry> {
        self.entries.get(jid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopologyEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The slave paired with a master entry. `None` for anything that is not
    /// a master, and for masters whose partner is not in the topology.
    pub fn partner(&self, entry: &TopologyEntry) -> Option<&TopologyEntry> {
        let integrated = entry.product.integrated.as_ref()?;
        if integrated.role != PairingRole::Master {
            return None;
        }
        self.get(&integrated.jid)
    }
}

/// Ask every cached product for its view of the system and merge the answers.
///
/// Products are tried one address at a time, in order, until one answers.
/// A product that never answers contributes nothing. Cancellation stops the
/// walk and keeps what has been merged so far.
pub async fn build_topology<Q>(
    directory: &Directory,
    query: &Q,
    policy: MergePolicy,
    cancel: &CancellationToken,
) -> Topology
where
    Q: SystemQuery + ?Sized,
{
    let mut merged: BTreeMap<String, Product> = BTreeMap::new();

    'products: for record in directory.values() {
        for address in &record.addresses {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = query.system_products(*address) => Some(result),
            };
            let Some(result) = result else {
                tracing::info!("Topology query cancelled");
                break 'products;
            };

            match result {
                Ok(products) => {
                    tracing::debug!(
                        "{} at {} reported {} product(s)",
                        record.jid,
                        address,
                        products.len()
                    );
                    for product in products {
                        merge(&mut merged, product, policy);
                    }
                    continue 'products;
                }
                Err(e) => {
                    tracing::debug!("{} did not answer at {}: {}", record.jid, address, e);
                }
            }
        }

        tracing::debug!("No address answered for {}", record.jid);
    }

    let entries = merged
        .into_iter()
        .map(|(jid, product)| {
            let addresses = directory
                .get(&jid)
                .map(|record| record.addresses.clone())
                .unwrap_or_default();
            (jid, TopologyEntry { product, addresses })
        })
        .collect();

    Topology { entries }
}

fn merge(merged: &mut BTreeMap<String, Product>, product: Product, policy: MergePolicy) {
    if product.jid.is_empty() {
        tracing::debug!("Skipping reported product without a jid: {:?}", product.friendly_name);
        return;
    }

    match merged.entry(product.jid.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(product);
        }
        Entry::Occupied(mut slot) => {
            if policy == MergePolicy::PreferOnline && product.online && !slot.get().online {
                slot.insert(product);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use shared::types::{DeviceRecord, Integrated};

    /// Answers per address from a script; unscripted addresses fail
    #[derive(Default)]
    struct ScriptedQuery {
        answers: HashMap<Ipv4Addr, Vec<Product>>,
        asked: Mutex<Vec<Ipv4Addr>>,
    }

    impl ScriptedQuery {
        fn answer(mut self, address: Ipv4Addr, products: Vec<Product>) -> Self {
            self.answers.insert(address, products);
            self
        }
    }

    #[async_trait]
    impl SystemQuery for ScriptedQuery {
        async fn system_products(&self, address: Ipv4Addr) -> Result<Vec<Product>, ClientError> {
            self.asked.lock().unwrap().push(address);
            self.answers.get(&address).cloned().ok_or_else(|| ClientError::Status {
                url: format!("http://{}:8080/BeoZone/System/Products", address),
                status: reqwest::StatusCode::GATEWAY_TIMEOUT,
            })
        }
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn product(jid: &str, name: &str, online: bool) -> Product {
        Product {
            jid: jid.to_string(),
            friendly_name: name.to_string(),
            online,
            primary_experience: None,
            source: Vec::new(),
            integrated: None,
        }
    }

    fn paired(jid: &str, role: PairingRole, partner: &str) -> Product {
        let mut p = product(jid, jid, true);
        p.integrated = Some(Integrated { role, jid: partner.to_string() });
        p
    }

    fn directory(records: &[(&str, &[Ipv4Addr])]) -> Directory {
        records
            .iter()
            .map(|(jid, addresses)| {
                let record = DeviceRecord {
                    addresses: addresses.to_vec(),
                    name: jid.to_string(),
                    jid: jid.to_string(),
                };
                (jid.to_string(), record)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_continues_past_failing_addresses_and_products() {
        let dir = directory(&[("a@p", &[ip(1), ip(2)]), ("b@p", &[ip(3)])]);
        let query = ScriptedQuery::default().answer(
            ip(2),
            vec![product("a@p", "Kitchen", true), product("c@p", "Peer only", true)],
        );

        let topology = build_topology(&dir, &query, MergePolicy::FirstResponder, &CancellationToken::new()).await;

        assert_eq!(*query.asked.lock().unwrap(), vec![ip(1), ip(2), ip(3)]);
        assert_eq!(topology.len(), 2);
        assert_eq!(topology.get("a@p").unwrap().product.friendly_name, "Kitchen");
        assert!(topology.get("b@p").is_none());
    }

    #[tokio::test]
    async fn test_stops_at_first_answering_address() {
        let dir = directory(&[("a@p", &[ip(1), ip(2)])]);
        let query = ScriptedQuery::default()
            .answer(ip(1), vec![product("a@p", "Kitchen", true)])
            .answer(ip(2), vec![product("a@p", "Kitchen", true)]);

        build_topology(&dir, &query, MergePolicy::FirstResponder, &CancellationToken::new()).await;

        assert_eq!(*query.asked.lock().unwrap(), vec![ip(1)]);
    }

    #[tokio::test]
    async fn test_cached_addresses_are_overlaid() {
        let dir = directory(&[("a@p", &[ip(1)]), ("b@p", &[ip(2), ip(4)])]);
        let query = ScriptedQuery::default().answer(
            ip(1),
            vec![
                product("a@p", "Kitchen", true),
                product("b@p", "Den", false),
                product("c@p", "Peer only", true),
            ],
        );

        let topology = build_topology(&dir, &query, MergePolicy::FirstResponder, &CancellationToken::new()).await;

        assert_eq!(topology.get("a@p").unwrap().addresses, vec![ip(1)]);
        // b@p never answered itself but was discovered locally
        assert_eq!(topology.get("b@p").unwrap().addresses, vec![ip(2), ip(4)]);
        assert!(topology.get("c@p").unwrap().addresses.is_empty());
    }

    #[tokio::test]
    async fn test_first_responder_wins() {
        let dir = directory(&[("a@p", &[ip(1)]), ("b@p", &[ip(2)])]);
        let query = ScriptedQuery::default()
            .answer(ip(1), vec![product("x@p", "From A", false)])
            .answer(ip(2), vec![product("x@p", "From B", true)]);

        let topology = build_topology(&dir, &query, MergePolicy::FirstResponder, &CancellationToken::new()).await;

        assert_eq!(topology.get("x@p").unwrap().product.friendly_name, "From A");
    }

    #[tokio::test]
    async fn test_prefer_online_replaces_offline_view() {
        let dir = directory(&[("a@p", &[ip(1)]), ("b@p", &[ip(2)]), ("c@p", &[ip(3)])]);
        let query = ScriptedQuery::default()
            .answer(ip(1), vec![product("x@p", "From A", false)])
            .answer(ip(2), vec![product("x@p", "From B", true)])
            .answer(ip(3), vec![product("x@p", "From C", true)]);

        let topology = build_topology(&dir, &query, MergePolicy::PreferOnline, &CancellationToken::new()).await;

        assert_eq!(topology.get("x@p").unwrap().product.friendly_name, "From B");
    }

    #[tokio::test]
    async fn test_empty_directory_gives_empty_topology() {
        let query = ScriptedQuery::default();
        let topology = build_topology(&Directory::new(), &query, MergePolicy::FirstResponder, &CancellationToken::new()).await;

        assert!(topology.is_empty());
        assert!(query.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_queries_nothing() {
        let dir = directory(&[("a@p", &[ip(1)])]);
        let query = ScriptedQuery::default().answer(ip(1), vec![product("a@p", "Kitchen", true)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let topology = build_topology(&dir, &query, MergePolicy::FirstResponder, &cancel).await;

        assert!(topology.is_empty());
        assert!(query.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_products_without_jid_are_skipped() {
        let dir = directory(&[("a@p", &[ip(1)])]);
        let query = ScriptedQuery::default().answer(
            ip(1),
            vec![product("a@p", "Kitchen", true), product("", "Nameless", true)],
        );

        let topology = build_topology(&dir, &query, MergePolicy::FirstResponder, &CancellationToken::new()).await;

        assert_eq!(topology.len(), 1);
        assert!(topology.get("").is_none());
    }

    #[tokio::test]
    async fn test_partner_lookup() {
        let dir = directory(&[("l@p", &[ip(1)])]);
        let query = ScriptedQuery::default().answer(
            ip(1),
            vec![
                paired("l@p", PairingRole::Master, "r@p"),
                paired("r@p", PairingRole::Slave, "l@p"),
                paired("m@p", PairingRole::Master, "gone@p"),
            ],
        );

        let topology = build_topology(&dir, &query, MergePolicy::FirstResponder, &CancellationToken::new()).await;

        let left = topology.get("l@p").unwrap();
        assert_eq!(topology.partner(left).unwrap().product.jid, "r@p");

        let right = topology.get("r@p").unwrap();
        assert!(topology.partner(right).is_none(), "slaves do not resolve a partner");

        let dangling = topology.get("m@p").unwrap();
        assert!(topology.partner(dangling).is_none());
    }
}
