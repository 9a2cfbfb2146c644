use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use serde::{Deserialize, Deserializer, Serialize};

/// A beoremote product found on the local network.
/// This is the record persisted in the discovery cache, keyed by `jid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// IPv4 addresses from the advertisement
    pub addresses: Vec<Ipv4Addr>,

    /// Human-readable product name
    pub name: String,

    /// Stable product identity, e.g. "1234.1234567.12345678@products.bang-olufsen.com"
    pub jid: String,
}

/// Discovery output: one record per identity, ordered by identity.
pub type Directory = BTreeMap<String, DeviceRecord>;

/// Playback state reported by a product or in notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Idle,
    Preparing,
    Play,
    Pause,
    Stop,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Products send `null` for fields they have nothing to say about; treat it
/// the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceType {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
}

/// Short reference to a product, embedded in sources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShortProduct {
    #[serde(deserialize_with = "null_as_default")]
    pub jid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub friendly_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Source {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub friendly_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub source_type: SourceType,
    #[serde(deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(deserialize_with = "null_as_default")]
    pub in_use: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub profile: String,
    #[serde(deserialize_with = "null_as_default")]
    pub linkable: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub product: ShortProduct,
}

/// Role of a product in a stereo pair or integrated group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingRole {
    #[serde(rename = "integratedMaster")]
    Master,
    #[serde(rename = "integratedSlave")]
    Slave,
    #[default]
    #[serde(other)]
    None,
}

impl fmt::Display for PairingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Master => "master",
            Self::Slave => "slave",
            Self::None => "-",
        };
        f.write_str(s)
    }
}

/// Pairing relation as reported by a product (`integrated` in the API)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Integrated {
    #[serde(deserialize_with = "null_as_default")]
    pub role: PairingRole,
    /// Identity of the partner product
    #[serde(deserialize_with = "null_as_default")]
    pub jid: String,
}

/// Playback summary for a product
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductPrimaryExperience {
    #[serde(deserialize_with = "null_as_default")]
    pub source: Source,
    #[serde(deserialize_with = "null_as_default")]
    pub listener: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub state: State,
}

/// One product as reported by some product's system query.
/// Every field is optional on the wire; a product without a `jid` cannot be
/// placed in a topology and is skipped there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Product {
    #[serde(deserialize_with = "null_as_default")]
    pub jid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub friendly_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub online: bool,
    pub primary_experience: Option<ProductPrimaryExperience>,
    #[serde(deserialize_with = "null_as_default")]
    pub source: Vec<Source>,
    pub integrated: Option<Integrated>,
}

impl Product {
    pub fn role(&self) -> PairingRole {
        self.integrated
            .as_ref()
            .map(|i| i.role)
            .unwrap_or(PairingRole::None)
    }

    pub fn state(&self) -> Option<State> {
        self.primary_experience.as_ref().map(|pe| pe.state)
    }
}

/// Body of the system query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub products: Vec<Product>,
}
