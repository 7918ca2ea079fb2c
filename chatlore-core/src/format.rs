//! Format catalog and detection
//!
//! Every supported export format is described by one [`FormatDescriptor`] in a
//! flat static table. Detection never fully parses a file: it reads a bounded
//! head window and evaluates cheap signatures against it. Parsers stay free
//! functions keyed by [`FormatId`]; the table is data, not a class hierarchy.

use crate::error::{Error, Result};
use crate::types::Platform;
use regex::Regex;
use std::io::Read;
use std::path::Path;

/// Bytes of file head examined during detection.
const HEAD_WINDOW: usize = 8 * 1024;

/// Identifier of one supported export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatId {
    /// chatlore's own line-delimited interchange format
    CanonicalJsonl,
    /// Telegram Desktop `result.json` (single chat or full multi-chat bundle)
    TelegramJson,
    /// DiscordChatExporter JSON
    DiscordJson,
    /// Meta takeout `message_1.json`
    InstagramJson,
    /// QQ exporter JSON (roster with inline avatars + message array)
    QqJson,
    /// QQ built-in `.txt` history export
    QqText,
    /// LINE `.txt` chat history
    LineText,
    /// WhatsApp "export chat" `.txt`
    WhatsAppText,
    /// MemoTrace-style WeChat CSV
    WeChatCsv,
}

impl FormatId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatId::CanonicalJsonl => "canonical_jsonl",
            FormatId::TelegramJson => "telegram_json",
            FormatId::DiscordJson => "discord_json",
            FormatId::InstagramJson => "instagram_json",
            FormatId::QqJson => "qq_json",
            FormatId::QqText => "qq_text",
            FormatId::LineText => "line_text",
            FormatId::WhatsAppText => "whatsapp_text",
            FormatId::WeChatCsv => "wechat_csv",
        }
    }
}

impl std::fmt::Display for FormatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable description of one format: identity plus matching rules.
///
/// A descriptor matches a file when ANY head signature matches, ALL required
/// field names are textually present in the head window, and the extension /
/// filename constraints (where declared) hold.
#[derive(Debug)]
pub struct FormatDescriptor {
    pub id: FormatId,
    pub name: &'static str,
    pub platform: Platform,
    /// Lower is tried first; ties break by table order.
    pub priority: u8,
    /// Extension allowlist; empty means any extension.
    pub extensions: &'static [&'static str],
    /// Regexes evaluated against the head window.
    pub head_signatures: &'static [&'static str],
    /// Top-level field names that must appear verbatim in the head window.
    pub required_fields: &'static [&'static str],
    /// Regex evaluated against the file name, when declared.
    pub filename_pattern: Option<&'static str>,
}

/// The registry. Ordered by ascending priority; registration order is the
/// tie-break, so keep the table sorted.
pub const CATALOG: &[FormatDescriptor] = &[
    FormatDescriptor {
        id: FormatId::CanonicalJsonl,
        name: "chatlore interchange (JSONL)",
        platform: Platform::Chatlore,
        priority: 10,
        extensions: &["jsonl", "json"],
        head_signatures: &[r#""record"\s*:\s*"header""#],
        required_fields: &["record", "version", "name"],
        filename_pattern: None,
    },
    FormatDescriptor {
        id: FormatId::QqJson,
        name: "QQ exporter JSON",
        platform: Platform::Qq,
        priority: 20,
        extensions: &["json"],
        head_signatures: &[r#""group_name"\s*:"#],
        required_fields: &["group_name", "messages"],
        filename_pattern: None,
    },
    FormatDescriptor {
        id: FormatId::DiscordJson,
        name: "DiscordChatExporter JSON",
        platform: Platform::Discord,
        priority: 30,
        extensions: &["json"],
        head_signatures: &[r#""guild"\s*:"#],
        required_fields: &["guild", "channel", "messages"],
        filename_pattern: None,
    },
    FormatDescriptor {
        id: FormatId::InstagramJson,
        name: "Instagram message JSON",
        platform: Platform::Instagram,
        priority: 40,
        extensions: &["json"],
        head_signatures: &[r#""participants"\s*:\s*\["#, r#""sender_name"\s*:"#],
        required_fields: &["participants", "messages"],
        filename_pattern: None,
    },
    FormatDescriptor {
        id: FormatId::TelegramJson,
        name: "Telegram Desktop JSON",
        platform: Platform::Telegram,
        priority: 50,
        extensions: &["json"],
        head_signatures: &[r#""messages"\s*:\s*\["#, r#""chats"\s*:\s*\{"#],
        required_fields: &[],
        filename_pattern: None,
    },
    FormatDescriptor {
        id: FormatId::WeChatCsv,
        name: "WeChat CSV export",
        platform: Platform::WeChat,
        priority: 60,
        extensions: &["csv"],
        head_signatures: &[r"(?i)CreateTime"],
        required_fields: &["CreateTime", "StrContent"],
        filename_pattern: None,
    },
    FormatDescriptor {
        id: FormatId::QqText,
        name: "QQ text history",
        platform: Platform::Qq,
        priority: 70,
        extensions: &["txt"],
        head_signatures: &[
            r"消息记录",
            r"(?m)^\d{4}-\d{2}-\d{2} \d{1,2}:\d{2}:\d{2} .+[(（]\d{5,}[)）]\s*$",
            r"(?m)^\d{4}-\d{2}-\d{2} \d{1,2}:\d{2}:\d{2} .+<[^<>\s]+@[^<>\s]+>\s*$",
        ],
        required_fields: &[],
        filename_pattern: None,
    },
    FormatDescriptor {
        id: FormatId::LineText,
        name: "LINE chat history",
        platform: Platform::Line,
        priority: 80,
        extensions: &["txt"],
        head_signatures: &[r"\[LINE\]", r"(?m)^\d{1,2}:\d{2}\t[^\t]+\t"],
        required_fields: &[],
        filename_pattern: None,
    },
    FormatDescriptor {
        id: FormatId::WhatsAppText,
        name: "WhatsApp chat export",
        platform: Platform::WhatsApp,
        priority: 90,
        extensions: &["txt"],
        head_signatures: &[
            // The locale variants WhatsApp is known to produce; any hit counts.
            r"(?m)^\[\d{1,2}/\d{1,2}/\d{2,4},\s\d{1,2}:\d{2}",
            r"(?m)^\[\d{2}\.\d{2}\.\d{2,4},\s\d{2}:\d{2}",
            r"(?m)^\d{2}\.\d{2}\.\d{2,4},\s\d{2}:\d{2}\s-\s",
            r"(?m)^\d{2}/\d{2}/\d{2,4},\s\d{1,2}:\d{2}\s-\s",
        ],
        required_fields: &[],
        filename_pattern: Some(r"(?i)chat"),
    },
];

/// Per-descriptor outcome of the diagnostic pass.
#[derive(Debug, Clone)]
pub struct FormatDiagnostic {
    pub format: FormatId,
    pub name: &'static str,
    /// Whether any head signature matched
    pub signature_matched: bool,
    /// Required fields that were absent from the head window
    pub missing_fields: Vec<&'static str>,
    /// Whether the extension allowlist rejected the file
    pub extension_rejected: bool,
}

fn read_head(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; HEAD_WINDOW];
    let mut read = 0;
    // Loop because a single read may return short on some filesystems
    loop {
        let n = file.read(&mut buf[read..])?;
        if n == 0 || read + n >= HEAD_WINDOW {
            read += n;
            break;
        }
        read += n;
    }
    buf.truncate(read);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn extension_allowed(descriptor: &FormatDescriptor, path: &Path) -> bool {
    if descriptor.extensions.is_empty() {
        return true;
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext {
        Some(ext) => descriptor.extensions.contains(&ext.as_str()),
        None => false,
    }
}

fn filename_allowed(descriptor: &FormatDescriptor, path: &Path) -> bool {
    let Some(pattern) = descriptor.filename_pattern else {
        return true;
    };
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    Regex::new(pattern)
        .map(|re| re.is_match(file_name))
        .unwrap_or(false)
}

fn signature_matched(descriptor: &FormatDescriptor, head: &str) -> bool {
    descriptor
        .head_signatures
        .iter()
        .any(|pattern| Regex::new(pattern).map(|re| re.is_match(head)).unwrap_or(false))
}

fn missing_fields(descriptor: &FormatDescriptor, head: &str) -> Vec<&'static str> {
    descriptor
        .required_fields
        .iter()
        .filter(|field| !head.contains(&format!("\"{}\"", field)))
        .copied()
        .collect()
}

/// Detect matching formats for a file, highest confidence first.
///
/// Returns an empty list when nothing matches; the caller must treat that as
/// [`Error::UnrecognizedFormat`]. Multiple candidates mean the file is
/// ambiguous and the import should fall back through them in order.
pub fn detect(path: &Path) -> Result<Vec<&'static FormatDescriptor>> {
    let head = read_head(path)?;

    let mut matches: Vec<&FormatDescriptor> = CATALOG
        .iter()
        .filter(|d| {
            extension_allowed(d, path)
                && filename_allowed(d, path)
                && signature_matched(d, &head)
                && missing_fields(d, &head).is_empty()
        })
        .collect();

    // Stable sort keeps registration order as the tie-break
    matches.sort_by_key(|d| d.priority);

    tracing::debug!(
        path = %path.display(),
        candidates = matches.len(),
        "Format detection complete"
    );

    Ok(matches)
}

/// Look up a descriptor by id.
pub fn descriptor(id: FormatId) -> &'static FormatDescriptor {
    CATALOG
        .iter()
        .find(|d| d.id == id)
        .expect("every FormatId has a catalog entry")
}

/// Diagnostic pass for unrecognized files: reports, per known format, why it
/// did not match. Intended for support logs and user guidance.
pub fn diagnose(path: &Path) -> Result<Vec<FormatDiagnostic>> {
    let head = read_head(path)?;

    Ok(CATALOG
        .iter()
        .map(|d| FormatDiagnostic {
            format: d.id,
            name: d.name,
            signature_matched: signature_matched(d, &head),
            missing_fields: missing_fields(d, &head),
            extension_rejected: !extension_allowed(d, path),
        })
        .collect())
}

/// Convenience: detect and error out when nothing matched.
pub fn detect_required(path: &Path) -> Result<Vec<&'static FormatDescriptor>> {
    let candidates = detect(path)?;
    if candidates.is_empty() {
        return Err(Error::UnrecognizedFormat(path.display().to_string()));
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_catalog_sorted_by_priority() {
        let priorities: Vec<u8> = CATALOG.iter().map(|d| d.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable();
        assert_eq!(priorities, sorted, "catalog must stay priority-sorted");
    }

    #[test]
    fn test_detect_canonical_jsonl() {
        let (_dir, path) = temp_file(
            "export.jsonl",
            r#"{"record":"header","version":1,"name":"My Group","platform":"qq","chat_kind":"group"}"#,
        );
        let matches = detect(&path).unwrap();
        assert_eq!(matches[0].id, FormatId::CanonicalJsonl);
    }

    #[test]
    fn test_detect_discord_before_telegram() {
        // A Discord export also carries a "messages" array, so Telegram's
        // signature matches too; priority must put Discord first.
        let (_dir, path) = temp_file(
            "channel.json",
            r#"{"guild":{"id":"1","name":"G"},"channel":{"id":"2","name":"general"},"messages":[]}"#,
        );
        let matches = detect(&path).unwrap();
        assert!(matches.len() >= 2);
        assert_eq!(matches[0].id, FormatId::DiscordJson);
        assert_eq!(matches[1].id, FormatId::TelegramJson);
    }

    #[test]
    fn test_detect_whatsapp_by_line_shape() {
        let (_dir, path) = temp_file(
            "WhatsApp Chat with Alice.txt",
            "[1/15/24, 10:30:45 AM] Alice: Hello\n[1/15/24, 10:31:00 AM] Bob: Hi\n",
        );
        let matches = detect(&path).unwrap();
        assert_eq!(matches[0].id, FormatId::WhatsAppText);
    }

    #[test]
    fn test_detect_qq_text() {
        let (_dir, path) = temp_file(
            "history.txt",
            "消息记录\n2023-05-01 12:00:00 张三(10001)\n你好\n",
        );
        let matches = detect(&path).unwrap();
        assert_eq!(matches[0].id, FormatId::QqText);
    }

    #[test]
    fn test_unmatched_file_diagnostics() {
        let (_dir, path) = temp_file("data.bin", "nothing recognizable here");
        let matches = detect(&path).unwrap();
        assert!(matches.is_empty());

        let report = diagnose(&path).unwrap();
        assert_eq!(report.len(), CATALOG.len());
        let discord = report
            .iter()
            .find(|d| d.format == FormatId::DiscordJson)
            .unwrap();
        assert!(discord.missing_fields.contains(&"guild"));
        assert!(discord.extension_rejected);
    }

    #[test]
    fn test_detect_required_errors_on_no_match() {
        let (_dir, path) = temp_file("data.bin", "garbage");
        let err = detect_required(&path).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat(_)));
    }
}
