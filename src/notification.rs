//! Notification payloads pushed by the gallery backend, and how they translate
//! into user-facing toasts and cache invalidations.

use std::fmt::Display;

use enum_as_inner::EnumAsInner;
use serde::Deserialize;
use snafu::prelude::*;

static CONNECTION_ACK_TYPE: &str = "connection";
static DEFAULT_TITLE: &str = "Image";

/// Error when parse text payload as notification
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ParseNotificationError {
    /// payload is not valid json, or json is not an object of expected shape
    #[snafu(display("parse notification json {payload:?} failed: {source}"))]
    ParseJSONFailed {
        /// raw payload
        payload: String,
        /// source error
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct WirePayload {
    #[serde(rename = "type", default)]
    kind: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    message: Option<String>,
    #[serde(rename = "imageId", default)]
    image_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    title: Option<String>,
}

/// Optional display text: any non string value is treated as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

/// Processing status of a gallery entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityStatus {
    /// queued for processing
    Pending,
    /// being processed
    Processing,
    /// processed and available
    Ready,
    /// processing failed
    Failed,
    /// upload finished
    Uploaded,
    /// removed
    Deleted,
    /// status this client does not know about
    Other(String),
}

impl EntityStatus {
    /// Parse status string, unknown values are kept as [`EntityStatus::Other`].
    pub fn parse(s: &str) -> Self {
        match s {
            "PENDING" => Self::Pending,
            "PROCESSING" => Self::Processing,
            "READY" => Self::Ready,
            "FAILED" => Self::Failed,
            "UPLOADED" => Self::Uploaded,
            "DELETED" => Self::Deleted,
            other => Self::Other(other.to_string()),
        }
    }

    /// wire representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
            Self::Uploaded => "UPLOADED",
            Self::Deleted => "DELETED",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Icon shown before decorated toast messages.
    ///
    /// Matched case-insensitively, so `ready` from an older backend still gets ✅.
    pub fn icon(&self) -> &'static str {
        match self.as_str().to_ascii_lowercase().as_str() {
            "ready" => "✅",
            "failed" => "❌",
            "processing" => "⚙️",
            "pending" => "⏳",
            "uploaded" => "📤",
            "deleted" => "🗑️",
            _ => "📷",
        }
    }
}

impl Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity status change pushed by server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityUpdate {
    /// entity id
    pub entity_id: String,
    /// new status
    pub status: EntityStatus,
    /// display label
    pub title: String,
}

/// Decoded inbound notification
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Notification {
    /// server confirms the stream is established, with optional greeting text
    ConnectionAck(Option<String>),
    /// an entity changed status
    EntityUpdate(EntityUpdate),
    /// valid json of a shape this client does not handle
    Ignored,
}

impl Notification {
    /// Decode a text payload received from the stream
    pub fn decode(payload: &str) -> Result<Self, ParseNotificationError> {
        let wire: WirePayload = serde_json::from_str(payload)
            .with_context(|_| error::ParseJSONFailed { payload })?;

        if matches!(&wire.kind, Some(serde_json::Value::String(t)) if t == CONNECTION_ACK_TYPE) {
            return Ok(Self::ConnectionAck(wire.message));
        }

        let entity_id = wire.image_id.filter(|id| !id.is_empty());
        let status = wire.status.filter(|s| !s.is_empty());

        match (entity_id, status) {
            (Some(entity_id), Some(status)) => Ok(Self::EntityUpdate(EntityUpdate {
                entity_id,
                status: EntityStatus::parse(&status),
                title: wire
                    .title
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            })),
            _ => Ok(Self::Ignored),
        }
    }
}

/// Toast severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// positive outcome
    Success,
    /// failure
    Error,
    /// neutral information
    Info,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Info => "info",
        })
    }
}

/// User-visible feedback message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    /// severity
    pub severity: Severity,
    /// text
    pub message: String,
}

impl Toast {
    pub(crate) fn new<S: Into<String>>(severity: Severity, message: S) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub(crate) fn connection_lost() -> Self {
        Self::new(Severity::Error, "connection lost, reconnecting")
    }

    pub(crate) fn retries_exhausted() -> Self {
        Self::new(Severity::Error, "failed to connect, please retry manually")
    }
}

/// Cached query key that becomes stale when an entity changes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// the whole gallery listing
    Collection,
    /// one entity
    Entity(String),
}

impl QueryKey {
    /// key segments, `["images"]` or `["images", id]`
    pub fn segments(&self) -> Vec<&str> {
        match self {
            Self::Collection => vec!["images"],
            Self::Entity(id) => vec!["images", id.as_str()],
        }
    }
}

impl Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments().join("/"))
    }
}

impl EntityUpdate {
    /// Summary toast for this update.
    pub fn toast(&self, decorate: bool) -> Toast {
        let title = &self.title;
        let (severity, text) = match &self.status {
            EntityStatus::Ready => (Severity::Success, format!("{} is ready", title)),
            EntityStatus::Failed => (Severity::Error, format!("{} processing failed", title)),
            EntityStatus::Uploaded => {
                (Severity::Success, format!("{} uploaded successfully", title))
            }
            EntityStatus::Deleted => (Severity::Info, format!("{} deleted", title)),
            status => (Severity::Info, format!("{}: {}", title, status)),
        };

        if decorate {
            Toast::new(severity, format!("{} {}", self.status.icon(), text))
        } else {
            Toast::new(severity, text)
        }
    }

    /// Keys to invalidate, always the collection and then the entity itself.
    pub fn stale_keys(&self) -> Vec<QueryKey> {
        let mut keys = vec![QueryKey::Collection];
        if !self.entity_id.is_empty() {
            keys.push(QueryKey::Entity(self.entity_id.clone()));
        }
        keys
    }
}
