//! Core domain types for chatlore
//!
//! These types represent the normalized data model that every supported
//! export format converges on.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Platform** | The chat product an export came from (QQ, Telegram, ...) |
//! | **Parsed record** | Ephemeral output of a streaming parser, consumed by the pipeline |
//! | **Member** | A persisted chat participant, keyed by platform-native id |
//! | **Message** | A persisted message row with sender names as observed at send time |
//! | **Chat session** | A contiguous conversational burst derived by gap-thresholding, NOT the whole imported chat |
//! | **Store** | One SQLite file holding one imported chat (the top-level "analysis session") |
//!
//! Sender names are denormalized onto every message *as observed at message
//! time*; this is what makes nickname-history reconstruction possible.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Platform id used for messages that have no real sender (system notices,
/// group announcements). Excluded from every analysis.
pub const SYSTEM_SENDER_ID: &str = "__system__";

// ============================================
// Platform
// ============================================

/// Chat platforms with supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Qq,
    WeChat,
    Telegram,
    Discord,
    WhatsApp,
    Line,
    Instagram,
    /// chatlore's own JSONL interchange format
    Chatlore,
}

impl Platform {
    /// Returns the display name for this platform
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Qq => "QQ",
            Platform::WeChat => "WeChat",
            Platform::Telegram => "Telegram",
            Platform::Discord => "Discord",
            Platform::WhatsApp => "WhatsApp",
            Platform::Line => "LINE",
            Platform::Instagram => "Instagram",
            Platform::Chatlore => "chatlore",
        }
    }

    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Qq => "qq",
            Platform::WeChat => "wechat",
            Platform::Telegram => "telegram",
            Platform::Discord => "discord",
            Platform::WhatsApp => "whatsapp",
            Platform::Line => "line",
            Platform::Instagram => "instagram",
            Platform::Chatlore => "chatlore",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qq" => Ok(Platform::Qq),
            "wechat" => Ok(Platform::WeChat),
            "telegram" => Ok(Platform::Telegram),
            "discord" => Ok(Platform::Discord),
            "whatsapp" => Ok(Platform::WhatsApp),
            "line" => Ok(Platform::Line),
            "instagram" => Ok(Platform::Instagram),
            "chatlore" => Ok(Platform::Chatlore),
            _ => Err(format!("unknown platform: {}", s)),
        }
    }
}

// ============================================
// Chat kind
// ============================================

/// Whether the imported chat is a two-party conversation or a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
        }
    }
}

impl std::str::FromStr for ChatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(ChatKind::Private),
            "group" => Ok(ChatKind::Group),
            _ => Err(format!("unknown chat kind: {}", s)),
        }
    }
}

// ============================================
// Message kind
// ============================================

/// Shared message classification across all platforms.
///
/// Each parser maps its platform-specific markers (stickers, recall notices,
/// service messages) into this one enum; numeric codes exist only at the
/// interchange-format boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Video,
    File,
    Emoji,
    Location,
    System,
    Recall,
    Reply,
    Forward,
    RedPacket,
    Transfer,
    Poke,
    Call,
    Share,
    Link,
    Contact,
    Other,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Voice => "voice",
            MessageKind::Video => "video",
            MessageKind::File => "file",
            MessageKind::Emoji => "emoji",
            MessageKind::Location => "location",
            MessageKind::System => "system",
            MessageKind::Recall => "recall",
            MessageKind::Reply => "reply",
            MessageKind::Forward => "forward",
            MessageKind::RedPacket => "red_packet",
            MessageKind::Transfer => "transfer",
            MessageKind::Poke => "poke",
            MessageKind::Call => "call",
            MessageKind::Share => "share",
            MessageKind::Link => "link",
            MessageKind::Contact => "contact",
            MessageKind::Other => "other",
        }
    }

    /// Numeric type code used by the JSONL interchange format.
    pub fn type_code(&self) -> u8 {
        match self {
            MessageKind::Text => 0,
            MessageKind::Image => 1,
            MessageKind::Voice => 2,
            MessageKind::Video => 3,
            MessageKind::File => 4,
            MessageKind::Emoji => 5,
            MessageKind::Location => 6,
            MessageKind::System => 7,
            MessageKind::Recall => 8,
            MessageKind::Reply => 9,
            MessageKind::Forward => 10,
            MessageKind::RedPacket => 11,
            MessageKind::Transfer => 12,
            MessageKind::Poke => 13,
            MessageKind::Call => 14,
            MessageKind::Share => 15,
            MessageKind::Link => 16,
            MessageKind::Contact => 17,
            MessageKind::Other => 18,
        }
    }

    /// Inverse of [`MessageKind::type_code`]; unknown codes map to `Other`.
    pub fn from_type_code(code: u8) -> Self {
        match code {
            0 => MessageKind::Text,
            1 => MessageKind::Image,
            2 => MessageKind::Voice,
            3 => MessageKind::Video,
            4 => MessageKind::File,
            5 => MessageKind::Emoji,
            6 => MessageKind::Location,
            7 => MessageKind::System,
            8 => MessageKind::Recall,
            9 => MessageKind::Reply,
            10 => MessageKind::Forward,
            11 => MessageKind::RedPacket,
            12 => MessageKind::Transfer,
            13 => MessageKind::Poke,
            14 => MessageKind::Call,
            15 => MessageKind::Share,
            16 => MessageKind::Link,
            17 => MessageKind::Contact,
            _ => MessageKind::Other,
        }
    }

    /// Kinds that count as "an image" for the image-burst analysis.
    pub fn is_image_like(&self) -> bool {
        matches!(self, MessageKind::Image | MessageKind::Emoji)
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "voice" => Ok(MessageKind::Voice),
            "video" => Ok(MessageKind::Video),
            "file" => Ok(MessageKind::File),
            "emoji" => Ok(MessageKind::Emoji),
            "location" => Ok(MessageKind::Location),
            "system" => Ok(MessageKind::System),
            "recall" => Ok(MessageKind::Recall),
            "reply" => Ok(MessageKind::Reply),
            "forward" => Ok(MessageKind::Forward),
            "red_packet" => Ok(MessageKind::RedPacket),
            "transfer" => Ok(MessageKind::Transfer),
            "poke" => Ok(MessageKind::Poke),
            "call" => Ok(MessageKind::Call),
            "share" => Ok(MessageKind::Share),
            "link" => Ok(MessageKind::Link),
            "contact" => Ok(MessageKind::Contact),
            "other" => Ok(MessageKind::Other),
            _ => Err(format!("unknown message kind: {}", s)),
        }
    }
}

// ============================================
// Parsed records (ephemeral, parser -> pipeline)
// ============================================

/// Chat-level metadata, produced exactly once per parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMeta {
    /// Chat display name
    pub name: String,
    /// Platform the export came from
    pub platform: Platform,
    /// Private or group chat
    pub chat_kind: ChatKind,
    /// Platform-native group identifier
    pub group_id: Option<String>,
    /// Group avatar (URL or data URI)
    pub group_avatar: Option<String>,
    /// Platform id of the importing account, when the export declares one
    pub owner_id: Option<String>,
}

/// A roster entry from an export. Deduplicated by `platform_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMember {
    /// Platform-native identifier (stable key)
    pub platform_id: String,
    /// Display/account name
    pub account_name: String,
    /// Group-scoped nickname
    pub group_nickname: Option<String>,
    /// Alternative names
    pub aliases: Vec<String>,
    /// Avatar payload (URL or data URI)
    pub avatar: Option<String>,
    /// Platform roles (admin, owner, ...)
    pub roles: Vec<String>,
}

impl ParsedMember {
    /// Minimal member inferred from a message when the format has no roster.
    pub fn from_observation(platform_id: &str, account_name: &str) -> Self {
        Self {
            platform_id: platform_id.to_string(),
            account_name: account_name.to_string(),
            group_nickname: None,
            aliases: Vec::new(),
            avatar: None,
            roles: Vec::new(),
        }
    }
}

/// One message as emitted by a streaming parser.
///
/// `account_name` and `group_nickname` are the names *as observed at message
/// time*, never the member's current names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMessage {
    /// Sender's platform-native identifier
    pub sender_id: String,
    /// Sender display name at send time
    pub account_name: String,
    /// Sender group nickname at send time
    pub group_nickname: Option<String>,
    /// Seconds since epoch
    pub ts: i64,
    /// Classification
    pub kind: MessageKind,
    /// Free-text content
    pub content: Option<String>,
    /// Platform-native message id
    pub platform_message_id: Option<String>,
    /// Platform id of the message this one replies to
    pub reply_to_id: Option<String>,
}

impl ParsedMessage {
    /// Plain text message, the common case in tests and inference paths.
    pub fn text(sender_id: &str, account_name: &str, ts: i64, content: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            account_name: account_name.to_string(),
            group_nickname: None,
            ts,
            kind: MessageKind::Text,
            content: Some(content.to_string()),
            platform_message_id: None,
            reply_to_id: None,
        }
    }

    /// System pseudo-message with the reserved sender id.
    pub fn system(ts: i64, content: &str) -> Self {
        Self {
            sender_id: SYSTEM_SENDER_ID.to_string(),
            account_name: "system".to_string(),
            group_nickname: None,
            ts,
            kind: MessageKind::System,
            content: Some(content.to_string()),
            platform_message_id: None,
            reply_to_id: None,
        }
    }
}

// ============================================
// Persisted entities
// ============================================

/// A persisted chat participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    /// Surrogate id
    pub id: i64,
    /// Platform-native identifier (unique)
    pub platform_id: String,
    /// Current account name
    pub account_name: String,
    /// Current group nickname
    pub group_nickname: Option<String>,
    /// User-maintained alias list
    pub aliases: Vec<String>,
    /// Avatar payload
    pub avatar: Option<String>,
    /// Platform roles
    pub roles: Vec<String>,
}

/// Which of the two tracked names an interval describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameKind {
    AccountName,
    GroupNickname,
}

impl NameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameKind::AccountName => "account_name",
            NameKind::GroupNickname => "group_nickname",
        }
    }
}

impl std::str::FromStr for NameKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account_name" => Ok(NameKind::AccountName),
            "group_nickname" => Ok(NameKind::GroupNickname),
            _ => Err(format!("unknown name kind: {}", s)),
        }
    }
}

/// One run in a member's name timeline.
///
/// Invariant: for a given member and kind, intervals are contiguous,
/// non-overlapping and ordered by `start_ts`; `end_ts == None` means current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameInterval {
    pub member_id: i64,
    pub kind: NameKind,
    pub name: String,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
}

/// A persisted message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Surrogate id
    pub id: i64,
    /// FK to member
    pub member_id: i64,
    /// Sender account name at send time
    pub account_name: String,
    /// Sender group nickname at send time
    pub group_nickname: Option<String>,
    /// Seconds since epoch
    pub ts: i64,
    /// Classification
    pub kind: MessageKind,
    /// Free-text content
    pub content: Option<String>,
    /// Platform id of the replied-to message
    pub reply_to_id: Option<String>,
    /// Platform-native message id
    pub platform_message_id: Option<String>,
}

/// A contiguous conversational burst, derived by gap-thresholding consecutive
/// message timestamps. Distinct from the imported chat as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: i64,
    pub start_ts: i64,
    pub end_ts: i64,
    pub message_count: i64,
    /// True when the session boundaries were user-edited rather than derived
    pub is_manual: bool,
    /// Cached summary text, if one has been attached
    pub summary: Option<String>,
}

/// The single meta row of a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub name: String,
    pub platform: Platform,
    pub chat_kind: ChatKind,
    /// Seconds since epoch at import time
    pub imported_at: i64,
    pub group_id: Option<String>,
    pub group_avatar: Option<String>,
    pub owner_id: Option<String>,
    pub schema_version: i32,
    /// Per-store override of the session gap threshold, seconds
    pub session_gap_secs: Option<i64>,
}

// ============================================
// Cancellation
// ============================================

/// Cooperative cancellation token checked inside every long-running
/// import/merge loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Loops observe it at their next batch boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(Error::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(crate::error::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
