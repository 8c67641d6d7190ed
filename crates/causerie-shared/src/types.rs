use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DIRECT_ID_SEPARATOR, GROUP_ID_PREFIX, MAX_ID_LEN};
use crate::error::ChatError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque user identifier supplied by the auth provider.
///
/// Construction rejects empty ids, ids longer than [`MAX_ID_LEN`], ids
/// containing [`DIRECT_ID_SEPARATOR`] and ids starting with
/// [`GROUP_ID_PREFIX`].  Direct conversation keys stay injective and never
/// look like group ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ChatError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ChatError::InvalidMembership("user id is empty".into()));
        }
        if raw.len() > MAX_ID_LEN {
            return Err(ChatError::InvalidMembership(format!(
                "user id longer than {MAX_ID_LEN} bytes"
            )));
        }
        if raw.contains(DIRECT_ID_SEPARATOR) {
            return Err(ChatError::InvalidMembership(format!(
                "user id must not contain '{DIRECT_ID_SEPARATOR}'"
            )));
        }
        if raw.starts_with(GROUP_ID_PREFIX) {
            return Err(ChatError::InvalidMembership(format!(
                "user id must not start with '{GROUP_ID_PREFIX}'"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl FromStr for UserId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation key. Direct ids are derived from the participant pair, group
/// ids are generated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap an id read back from storage or received from a client.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn new_group() -> Self {
        Self(format!("{GROUP_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_group(&self) -> bool {
        self.0.starts_with(GROUP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-wide monotonically increasing message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied idempotency key for `append` retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Conversation kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Attachments and content
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }
}

impl FromStr for MediaKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            other => Err(ChatError::InvalidAttachment(format!(
                "unsupported media kind '{other}'"
            ))),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to externally stored binary content. The handle is never
/// interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub kind: MediaKind,
    pub handle: String,
}

/// Message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Content {
    Text(String),
    Image(AttachmentRef),
    Audio(AttachmentRef),
}

impl Content {
    /// Storage discriminant.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Image(_) => "image",
            Self::Audio(_) => "audio",
        }
    }

    /// The attachment carried by this content, if any.
    pub fn attachment(&self) -> Option<&AttachmentRef> {
        match self {
            Self::Text(_) => None,
            Self::Image(r) | Self::Audio(r) => Some(r),
        }
    }

    /// Rebuild content from its storage discriminant and body.
    pub fn from_parts(kind: &str, body: String) -> Option<Self> {
        match kind {
            "text" => Some(Self::Text(body)),
            "image" => Some(Self::Image(AttachmentRef {
                kind: MediaKind::Image,
                handle: body,
            })),
            "audio" => Some(Self::Audio(AttachmentRef {
                kind: MediaKind::Audio,
                handle: body,
            })),
            _ => None,
        }
    }

    /// Storage body: the text itself or the attachment handle.
    pub fn body(&self) -> &str {
        match self {
            Self::Text(t) => t,
            Self::Image(r) | Self::Audio(r) => &r.handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_separator_and_empty() {
        assert!(UserId::parse("u1").is_ok());
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("a_b").is_err());
        assert!(UserId::parse("x".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn user_id_cannot_pose_as_group() {
        assert!(matches!(
            UserId::parse("grp-amy"),
            Err(ChatError::InvalidMembership(_))
        ));
        assert!(UserId::parse("grpamy").is_ok());
        assert!(serde_json::from_str::<UserId>("\"grp-amy\"").is_err());
    }

    #[test]
    fn user_id_validates_on_deserialize() {
        let ok: UserId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(ok.as_str(), "alice");
        assert!(serde_json::from_str::<UserId>("\"al_ice\"").is_err());
    }

    #[test]
    fn media_kind_parse_is_case_insensitive() {
        assert_eq!("Image".parse::<MediaKind>().unwrap(), MediaKind::Image);
        assert_eq!(" audio ".parse::<MediaKind>().unwrap(), MediaKind::Audio);
        assert!(matches!(
            "video".parse::<MediaKind>(),
            Err(ChatError::InvalidAttachment(_))
        ));
    }

    #[test]
    fn content_json_shape() {
        let content = Content::Image(AttachmentRef {
            kind: MediaKind::Image,
            handle: "ref-123".into(),
        });
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["value"]["handle"], "ref-123");
    }

    #[test]
    fn content_parts_round_trip_through_storage_columns() {
        let content = Content::Audio(AttachmentRef {
            kind: MediaKind::Audio,
            handle: "https://cdn.example/a.webm".into(),
        });
        let rebuilt = Content::from_parts(content.kind_str(), content.body().to_string());
        assert_eq!(rebuilt, Some(content));
        assert_eq!(Content::from_parts("video", String::new()), None);
    }

    #[test]
    fn group_ids_are_tagged() {
        let id = ConversationId::new_group();
        assert!(id.is_group());
        assert!(!ConversationId::from_raw("u1_u2").is_group());
    }
}
