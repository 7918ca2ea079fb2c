//! Preprocessing for pathological exports
//!
//! QQ exporter JSON embeds every avatar as a base64 data URI, routinely
//! inflating a chat with a few thousand messages to hundreds of megabytes.
//! Deserializing that whole document costs several times the file size in
//! memory, so files over a threshold get a byte-level rewrite first:
//! avatar string values are replaced with `null`, everything else is copied
//! untouched. The rewrite streams source to temp copy in one buffered pass;
//! it never builds a JSON tree and never holds the file in memory.
//!
//! The stripped copy lives in a temp file that is removed when the returned
//! handle drops, including on error paths.

use crate::error::Result;
use crate::format::FormatId;
use crate::progress::{ImportStage, ProgressEvent, ProgressSink};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// JSON keys whose string values get dropped.
const STRIPPED_KEYS: &[&str] = &["avatar", "group_avatar"];

/// Longest string token that could still be a stripped key. Anything longer
/// stops being buffered and is copied straight through.
const MAX_KEY_LEN: usize = 64;

/// Input to hand to the parser: either the original file or a stripped
/// temp copy that is deleted on drop.
pub enum ParseInput {
    Original(PathBuf),
    Stripped(tempfile::NamedTempFile),
}

impl ParseInput {
    pub fn path(&self) -> &Path {
        match self {
            ParseInput::Original(path) => path,
            ParseInput::Stripped(temp) => temp.path(),
        }
    }
}

/// Whether `path` should be preprocessed before parsing as `format`.
pub fn needs_preprocess(path: &Path, format: FormatId, threshold_bytes: u64) -> Result<bool> {
    if format != FormatId::QqJson {
        return Ok(false);
    }
    let size = std::fs::metadata(path)?.len();
    Ok(size >= threshold_bytes)
}

/// Produce the parser input for `path`, stripping avatars when warranted.
pub fn prepare(
    path: &Path,
    format: FormatId,
    threshold_bytes: u64,
    progress: &dyn ProgressSink,
) -> Result<ParseInput> {
    if !needs_preprocess(path, format, threshold_bytes)? {
        return Ok(ParseInput::Original(path.to_path_buf()));
    }

    let size = std::fs::metadata(path)?.len();
    tracing::info!(
        path = %path.display(),
        size,
        "Stripping inline avatars before parse"
    );
    progress.report(
        &ProgressEvent::stage(ImportStage::Saving)
            .with_message("Stripping embedded avatars".to_string()),
    );

    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut temp = tempfile::NamedTempFile::new()?;
    {
        let mut writer = std::io::BufWriter::new(temp.as_file_mut());
        strip_avatar_values(&mut reader, &mut writer)?;
        writer.flush()?;
    }

    tracing::info!(
        before = size,
        after = temp.as_file().metadata()?.len(),
        "Avatar strip complete"
    );
    Ok(ParseInput::Stripped(temp))
}

fn read_byte<R: BufRead>(src: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match src.read(&mut byte)? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

/// Copy the remainder of a string token (opening quote already emitted)
/// through to `out`, honoring escapes.
fn copy_string_tail<R: BufRead, W: Write>(src: &mut R, out: &mut W) -> Result<()> {
    let mut escaped = false;
    while let Some(byte) = read_byte(src)? {
        out.write_all(&[byte])?;
        if escaped {
            escaped = false;
        } else if byte == b'\\' {
            escaped = true;
        } else if byte == b'"' {
            break;
        }
    }
    Ok(())
}

/// Consume the remainder of a string token without emitting it.
fn skip_string_tail<R: BufRead>(src: &mut R) -> Result<()> {
    let mut escaped = false;
    while let Some(byte) = read_byte(src)? {
        if escaped {
            escaped = false;
        } else if byte == b'\\' {
            escaped = true;
        } else if byte == b'"' {
            break;
        }
    }
    Ok(())
}

/// Read a string token whose opening quote was just consumed. Returns the
/// token bytes when it closes within [`MAX_KEY_LEN`]; longer tokens cannot
/// be keys we care about, so they are streamed straight to `out` instead.
fn read_short_string<R: BufRead, W: Write>(src: &mut R, out: &mut W) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let mut escaped = false;
    while let Some(byte) = read_byte(src)? {
        if !escaped && byte == b'"' {
            return Ok(Some(buf));
        }
        if escaped {
            escaped = false;
        } else if byte == b'\\' {
            escaped = true;
        }
        buf.push(byte);
        // Flush only between escape sequences so the tail copier starts clean
        if buf.len() > MAX_KEY_LEN && !escaped {
            out.write_all(b"\"")?;
            out.write_all(&buf)?;
            copy_string_tail(src, out)?;
            return Ok(None);
        }
    }
    // EOF inside the string
    out.write_all(b"\"")?;
    out.write_all(&buf)?;
    Ok(None)
}

/// Stream `src` to `out` replacing `"avatar": "<...>"` values with `null`.
/// Operates on raw bytes; string tokens are handled atomically so
/// avatar-like text inside message content is never touched.
fn strip_avatar_values<R: BufRead, W: Write>(src: &mut R, out: &mut W) -> Result<()> {
    while let Some(byte) = read_byte(src)? {
        if byte != b'"' {
            out.write_all(&[byte])?;
            continue;
        }
        let Some(token) = read_short_string(src, out)? else {
            continue;
        };
        if !STRIPPED_KEYS.iter().any(|k| k.as_bytes() == token.as_slice()) {
            out.write_all(b"\"")?;
            out.write_all(&token)?;
            out.write_all(b"\"")?;
            continue;
        }

        // Lookahead for `: "<string>"`; anything else means this was a
        // value that merely spells "avatar". Consumed bytes are replayed
        // verbatim on a miss.
        let mut pending: Vec<u8> = Vec::new();
        let mut cur = read_byte(src)?;
        while let Some(b) = cur {
            if !b.is_ascii_whitespace() {
                break;
            }
            pending.push(b);
            cur = read_byte(src)?;
        }
        if cur == Some(b':') {
            pending.push(b':');
            cur = read_byte(src)?;
            while let Some(b) = cur {
                if !b.is_ascii_whitespace() {
                    break;
                }
                pending.push(b);
                cur = read_byte(src)?;
            }
            if cur == Some(b'"') {
                skip_string_tail(src)?;
                out.write_all(b"\"")?;
                out.write_all(&token)?;
                out.write_all(b"\": null")?;
                continue;
            }
        }

        out.write_all(b"\"")?;
        out.write_all(&token)?;
        out.write_all(b"\"")?;
        out.write_all(&pending)?;
        match cur {
            Some(b'"') => {
                out.write_all(b"\"")?;
                copy_string_tail(src, out)?;
            }
            Some(b) => out.write_all(&[b])?,
            None => {}
        }
    }
    Ok(())
}
