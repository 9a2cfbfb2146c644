use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::types::{Source, State};

/// A single notification from the `/BeoNotify/Notifications` feed.
///
/// Only the envelope is decoded eagerly; the payload stays as raw JSON until
/// [`Notification::payload`] is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind_type: String,
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Deserialize)]
struct NotificationWrapper {
    notification: Notification,
}

impl Notification {
    /// Decode the `{"notification": {...}}` envelope
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let wrapper: NotificationWrapper = serde_json::from_value(value)?;
        Ok(wrapper.notification)
    }

    /// Timestamp as a date-time, if it is in a format we recognise.
    /// Products omit the offset, in which case it is treated as UTC.
    pub fn time(&self) -> Option<DateTime<FixedOffset>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(t);
        }
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|t| t.and_utc().fixed_offset())
    }

    /// Interpret the payload according to the (type, kind) pair.
    ///
    /// Unrecognised pairs yield [`NotificationPayload::Unknown`] holding the raw
    /// data. An error is returned only when a recognised pair carries a payload
    /// of the wrong shape.
    pub fn payload(&self) -> Result<NotificationPayload, serde_json::Error> {
        use NotificationPayload as P;

        let data = self.data.clone();
        let payload = match (self.kind_type.as_str(), self.kind.as_str()) {
            ("SOURCE", "source") => P::Source(serde_json::from_value(data)?),
            ("SOURCE_EXPERIENCE_CHANGED", "source") => {
                P::SourceExperienceChanged(serde_json::from_value(data)?)
            }
            ("NOW_PLAYING_STORED_MUSIC", "playing") => {
                P::NowPlayingStoredMusic(serde_json::from_value(data)?)
            }
            ("NOW_PLAYING_NET_RADIO", "playing") => {
                P::NowPlayingNetRadio(serde_json::from_value(data)?)
            }
            ("NOW_PLAYING_ENDED", "playing") => P::NowPlayingEnded,
            ("PLAY_QUEUE_CHANGED", "playing") => {
                P::PlayQueueChanged(serde_json::from_value(data)?)
            }
            ("PROGRESS_INFORMATION", "playing") => {
                P::ProgressInformation(serde_json::from_value(data)?)
            }
            ("VOLUME", "renderer") => P::Volume(serde_json::from_value(data)?),
            ("SOFTWARE_UPDATE_STATUS", "device") => {
                P::SoftwareUpdateStatus(serde_json::from_value(data)?)
            }
            _ => P::Unknown(data),
        };
        Ok(payload)
    }
}

/// Notification payloads, one variant per known (type, kind) pair
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPayload {
    Source(SourceData),
    SourceExperienceChanged(SourceExperienceChangedData),
    NowPlayingStoredMusic(NowPlayingStoredMusicData),
    NowPlayingNetRadio(NowPlayingNetRadioData),
    NowPlayingEnded,
    PlayQueueChanged(PlayQueueChangedData),
    ProgressInformation(ProgressInformationData),
    Volume(VolumeData),
    SoftwareUpdateStatus(SoftwareUpdateStatusData),
    /// Pair we have no model for; the data is kept undecoded
    Unknown(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub size: String,
    #[serde(rename = "mediatype", default)]
    pub media_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrimaryExperience {
    pub source: Source,
    pub category: String,
    pub profile: String,
    pub in_use: bool,
    pub linkable: bool,
    pub listener: Vec<String>,
    pub last_used: String,
    pub state: State,
}

/// type: SOURCE, kind: source
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceData {
    /// Source id
    pub primary: String,
    /// Product currently providing the source
    pub primary_jid: String,
    pub primary_experience: PrimaryExperience,
}

/// type: SOURCE_EXPERIENCE_CHANGED, kind: source
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceExperienceChangedData {
    pub primary_experience: PrimaryExperience,
}

/// type: NOW_PLAYING_STORED_MUSIC, kind: playing
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NowPlayingStoredMusicData {
    pub name: String,
    pub album: String,
    pub artist: String,
    pub track_id: String,
    pub track_image: Vec<Image>,
    pub play_queue_id: String,
    pub play_queue_item_id: String,
}

/// type: NOW_PLAYING_NET_RADIO, kind: playing
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NowPlayingNetRadioData {
    pub name: String,
    pub live_description: String,
    pub station_id: String,
    pub image: Vec<Image>,
    pub play_queue_id: String,
}

/// type: PLAY_QUEUE_CHANGED, kind: playing
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayQueueChangedData {
    pub revision: i64,
    pub play_queue_id: String,
}

/// type: PROGRESS_INFORMATION, kind: playing
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressInformationData {
    pub state: State,
    pub position: i64,
    pub total_duration: i64,
    pub seek_supported: bool,
    pub play_queue_id: String,
    pub play_queue_item_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Range {
    pub minimum: i64,
    pub maximum: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Speaker {
    pub level: i64,
    pub muted: bool,
    pub range: Range,
}

/// type: VOLUME, kind: renderer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VolumeData {
    pub speaker: Speaker,
}

/// type: SOFTWARE_UPDATE_STATUS, kind: device
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SoftwareUpdateStatusData {
    pub state: String,
}
