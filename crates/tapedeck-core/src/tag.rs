//! ID3v2 tag reading: header, title/artist text frames, display names.
//!
//! Only reads. All multi-byte reads go through [`ByteCursor`], which checks the remaining
//! length first, so truncated or lying tags end the walk instead of reading out of bounds.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

/// Size of the fixed tag header that prefixes the audio payload.
pub const TAG_HEADER_LEN: usize = 10;
const TAG_MAGIC: &[u8; 3] = b"ID3";
const SUBFRAME_HEADER_LEN: usize = 10;
const FLAG_EXTENDED_HEADER: u8 = 0x40;
const FLAG_FOOTER: u8 = 0x10;
const TAG_FOOTER_LEN: usize = 10;

const FRAME_TITLE: &[u8; 4] = b"TIT2";
const FRAME_ARTIST: &[u8; 4] = b"TPE1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("tag data truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("unknown text encoding byte {0:#04x}")]
    UnknownEncoding(u8),
    #[error("text frame is not valid {0}")]
    InvalidText(&'static str),
    #[error("empty text frame")]
    Empty,
}

/// Bounds-checked reader over an owned or borrowed byte slice.
struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TagError> {
        if n > self.remaining() {
            return Err(TagError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<(), TagError> {
        self.take(n).map(|_| ())
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn u32_be(&mut self) -> Result<u32, TagError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32_synchsafe(&mut self) -> Result<u32, TagError> {
        Ok(synchsafe(self.take(4)?))
    }
}

/// Reassemble a 28-bit integer from four 7-bit bytes (top bit of each byte ignored).
pub fn synchsafe(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, b| (acc << 7) | u32::from(b & 0x7F))
}

/// Fixed 10-byte tag header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub flags: u8,
    /// Size of the tag body following the header.
    pub tag_size: u32,
}

impl TagHeader {
    /// Parse the header at the start of `bytes`. Returns `None` if the magic does not match
    /// or fewer than 10 bytes are available.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let b = bytes.get(..TAG_HEADER_LEN)?;
        if &b[..3] != TAG_MAGIC {
            return None;
        }
        Some(Self {
            version_major: b[3],
            version_minor: b[4],
            flags: b[5],
            tag_size: synchsafe(&b[6..10]),
        })
    }

    /// Header, body and (v2.4) footer length in bytes.
    pub fn total_len(&self) -> usize {
        let footer = if self.version_major >= 4 && self.flags & FLAG_FOOTER != 0 {
            TAG_FOOTER_LEN
        } else {
            0
        };
        TAG_HEADER_LEN + self.tag_size as usize + footer
    }
}

/// Byte offset of the audio payload: just past the tag, or `0` when there is none.
pub fn audio_payload_offset(data: &[u8]) -> usize {
    TagHeader::parse(data)
        .map(|h| h.total_len().min(data.len()))
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextEncoding {
    Latin1,
    /// UTF-16 with an optional byte-order mark (little-endian when absent).
    Utf16,
    Utf16Be,
    Utf8,
}

impl TryFrom<u8> for TextEncoding {
    type Error = TagError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Latin1),
            1 => Ok(Self::Utf16),
            2 => Ok(Self::Utf16Be),
            3 => Ok(Self::Utf8),
            other => Err(TagError::UnknownEncoding(other)),
        }
    }
}

/// Decode a text frame payload: one encoding byte, then the encoded text.
pub fn decode_text(payload: &[u8]) -> Result<String, TagError> {
    let (&enc, body) = payload.split_first().ok_or(TagError::Empty)?;
    let text = match TextEncoding::try_from(enc)? {
        TextEncoding::Latin1 => body.iter().map(|&b| char::from(b)).collect(),
        TextEncoding::Utf8 => String::from_utf8(body.to_vec())
            .map_err(|_| TagError::InvalidText("UTF-8"))?,
        TextEncoding::Utf16 => match body {
            [0xFE, 0xFF, rest @ ..] => utf16(rest, true)?,
            [0xFF, 0xFE, rest @ ..] => utf16(rest, false)?,
            _ => utf16(body, false)?,
        },
        TextEncoding::Utf16Be => utf16(body, true)?,
    };
    Ok(text.trim_end_matches('\0').to_string())
}

fn utf16(bytes: &[u8], big_endian: bool) -> Result<String, TagError> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16(&units).map_err(|_| TagError::InvalidText("UTF-16"))
}

/// Title and artist recovered from a tag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl TrackTags {
    /// `"Artist - Title"`, the title alone, or `None` when there is no title.
    pub fn display_name(&self) -> Option<String> {
        let title = self.title.as_deref().filter(|t| !t.is_empty())?;
        match self.artist.as_deref().filter(|a| !a.is_empty()) {
            Some(artist) => Some(format!("{artist} - {title}")),
            None => Some(title.to_string()),
        }
    }
}

/// Walk the tag body (everything after the 10-byte header) and collect title/artist.
///
/// The walk stops at padding (first id byte not alphanumeric) or at a sub-frame that does
/// not fit in the remaining bytes. A text field that fails to decode is left unset.
pub fn parse_tag_body(header: &TagHeader, body: &[u8]) -> TrackTags {
    let mut tags = TrackTags::default();
    if header.version_major < 3 {
        tracing::debug!(version = header.version_major, "unsupported tag version; no fields read");
        return tags;
    }

    let mut cur = ByteCursor::new(body);
    if header.flags & FLAG_EXTENDED_HEADER != 0 && skip_extended_header(&mut cur, header).is_err() {
        return tags;
    }

    while cur.remaining() >= SUBFRAME_HEADER_LEN {
        if !cur.peek().is_some_and(|b| b.is_ascii_alphanumeric()) {
            break;
        }
        let Ok(id) = cur.take(4) else { break };
        let size = if header.version_major >= 4 {
            cur.u32_synchsafe()
        } else {
            cur.u32_be()
        };
        let Ok(size) = size else { break };
        if cur.skip(2).is_err() {
            break;
        }
        let Ok(payload) = cur.take(size as usize) else {
            tracing::debug!(
                id = %String::from_utf8_lossy(id),
                size,
                "tag sub-frame runs past end of tag"
            );
            break;
        };

        let slot = if id == FRAME_TITLE {
            &mut tags.title
        } else if id == FRAME_ARTIST {
            &mut tags.artist
        } else {
            continue;
        };
        match decode_text(payload) {
            Ok(text) => *slot = Some(text),
            Err(e) => tracing::warn!(id = %String::from_utf8_lossy(id), "tag text decode failed: {e}"),
        }
    }

    tags
}

fn skip_extended_header(cur: &mut ByteCursor<'_>, header: &TagHeader) -> Result<(), TagError> {
    if header.version_major >= 4 {
        // v2.4 size is synchsafe and counts itself.
        let size = cur.u32_synchsafe()? as usize;
        cur.skip(size.saturating_sub(4))
    } else {
        let size = cur.u32_be()? as usize;
        cur.skip(size)
    }
}

/// Read the tag of the file at `path`. `Ok(None)` when the file has no tag.
pub fn read_tags(path: &Path) -> Result<Option<TrackTags>> {
    let mut file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut head = [0u8; TAG_HEADER_LEN];
    if file.read_exact(&mut head).is_err() {
        return Ok(None);
    }
    let Some(header) = TagHeader::parse(&head) else {
        return Ok(None);
    };

    let mut body = Vec::new();
    file.take(u64::from(header.tag_size))
        .read_to_end(&mut body)
        .with_context(|| format!("read tag {:?}", path))?;
    Ok(Some(parse_tag_body(&header, &body)))
}

/// Human-readable name for a track: tag-derived when possible, otherwise the file name.
pub fn display_name(path: &Path) -> String {
    let from_tags = match read_tags(path) {
        Ok(Some(tags)) => tags.display_name(),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(path = ?path, "tag read failed: {e:#}");
            None
        }
    };
    from_tags.unwrap_or_else(|| file_name(path))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Build a tag (header + text sub-frames) for tests and fixtures.
#[cfg(test)]
pub(crate) fn build_tag(major: u8, frames: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (id, payload) in frames {
        body.extend_from_slice(*id);
        let len = payload.len() as u32;
        if major >= 4 {
            body.extend_from_slice(&encode_synchsafe(len));
        } else {
            body.extend_from_slice(&len.to_be_bytes());
        }
        body.extend_from_slice(&[0, 0]);
        body.extend_from_slice(payload);
    }
    // Padding, as written by most taggers.
    body.extend_from_slice(&[0u8; 16]);

    let mut out = Vec::with_capacity(TAG_HEADER_LEN + body.len());
    out.extend_from_slice(TAG_MAGIC);
    out.extend_from_slice(&[major, 0, 0]);
    out.extend_from_slice(&encode_synchsafe(body.len() as u32));
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
pub(crate) fn encode_synchsafe(v: u32) -> [u8; 4] {
    [
        ((v >> 21) & 0x7F) as u8,
        ((v >> 14) & 0x7F) as u8,
        ((v >> 7) & 0x7F) as u8,
        (v & 0x7F) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn latin1(s: &str) -> Vec<u8> {
        let mut v = vec![0];
        v.extend(s.chars().map(|c| c as u8));
        v
    }

    fn utf16_bom_le(s: &str) -> Vec<u8> {
        let mut v = vec![1, 0xFF, 0xFE];
        v.extend(s.encode_utf16().flat_map(|u| u.to_le_bytes()));
        v
    }

    fn utf16_bom_be(s: &str) -> Vec<u8> {
        let mut v = vec![1, 0xFE, 0xFF];
        v.extend(s.encode_utf16().flat_map(|u| u.to_be_bytes()));
        v
    }

    fn utf16_be(s: &str) -> Vec<u8> {
        let mut v = vec![2];
        v.extend(s.encode_utf16().flat_map(|u| u.to_be_bytes()));
        v
    }

    fn utf8(s: &str) -> Vec<u8> {
        let mut v = vec![3];
        v.extend_from_slice(s.as_bytes());
        v
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn synchsafe_ignores_top_bits() {
        assert_eq!(synchsafe(&[0x00, 0x00, 0x02, 0x01]), 257);
        assert_eq!(synchsafe(&[0x80, 0x80, 0x82, 0x81]), 257);
        assert_eq!(synchsafe(&[0x7F, 0x7F, 0x7F, 0x7F]), (1 << 28) - 1);
    }

    #[test]
    fn header_requires_magic() {
        assert!(TagHeader::parse(b"TAG\x03\x00\x00\x00\x00\x00\x10").is_none());
        assert!(TagHeader::parse(b"ID3").is_none());
        let h = TagHeader::parse(b"ID3\x03\x00\x40\x00\x00\x01\x00").unwrap();
        assert_eq!(h.version_major, 3);
        assert_eq!(h.flags, 0x40);
        assert_eq!(h.tag_size, 128);
        assert_eq!(h.total_len(), 138);
    }

    #[test]
    fn payload_offset_clamps_to_data() {
        let tag = build_tag(3, &[(FRAME_TITLE, latin1("x"))]);
        let mut data = tag.clone();
        data.extend_from_slice(&[0xFF, 0xFB]);
        assert_eq!(audio_payload_offset(&data), tag.len());
        assert_eq!(audio_payload_offset(&tag[..12]), 12);
        assert_eq!(audio_payload_offset(&[0xFF, 0xFB, 0x90, 0x00]), 0);
    }

    #[test]
    fn v24_footer_is_part_of_the_tag() {
        let mut data = build_tag(4, &[(FRAME_TITLE, latin1("x"))]);
        let tag_len = data.len();
        data[5] |= FLAG_FOOTER;
        let size = data[6..10].to_vec();
        data.extend_from_slice(b"3DI\x04\x00\x10");
        data.extend_from_slice(&size);
        data.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        assert_eq!(audio_payload_offset(&data), tag_len + TAG_FOOTER_LEN);

        // The footer flag is not defined before v2.4.
        let mut v23 = build_tag(3, &[(FRAME_TITLE, latin1("x"))]);
        let v23_len = v23.len();
        v23[5] |= FLAG_FOOTER;
        v23.extend_from_slice(&[0u8; 16]);
        assert_eq!(audio_payload_offset(&v23), v23_len);
    }

    #[test]
    fn every_encoding_decodes_to_the_same_text() {
        let text = "Sigur Rós - Hoppípolla";
        let latin = "Sigur Rós";
        assert_eq!(decode_text(&latin1(latin)).unwrap(), latin);
        assert_eq!(decode_text(&utf16_bom_le(text)).unwrap(), text);
        assert_eq!(decode_text(&utf16_bom_be(text)).unwrap(), text);
        assert_eq!(decode_text(&utf16_be(text)).unwrap(), text);
        assert_eq!(decode_text(&utf8(text)).unwrap(), text);
    }

    #[test]
    fn decode_text_trims_terminator_and_rejects_unknown_encoding() {
        assert_eq!(decode_text(b"\x00Title\x00").unwrap(), "Title");
        assert_eq!(decode_text(&[4, b'a']), Err(TagError::UnknownEncoding(4)));
        assert_eq!(decode_text(&[]), Err(TagError::Empty));
        assert_eq!(
            decode_text(&[3, 0xC3, 0x28]),
            Err(TagError::InvalidText("UTF-8"))
        );
    }

    #[test]
    fn body_walk_extracts_title_and_artist_skipping_others() {
        let tag = build_tag(
            3,
            &[
                (b"TALB", latin1("Album")),
                (FRAME_ARTIST, utf8("Artist")),
                (b"COMM", vec![0; 12]),
                (FRAME_TITLE, utf16_bom_le("Title")),
            ],
        );
        let header = TagHeader::parse(&tag).unwrap();
        let tags = parse_tag_body(&header, &tag[TAG_HEADER_LEN..]);
        assert_eq!(tags.artist.as_deref(), Some("Artist"));
        assert_eq!(tags.title.as_deref(), Some("Title"));
        assert_eq!(tags.display_name().as_deref(), Some("Artist - Title"));
    }

    #[test]
    fn v24_uses_synchsafe_frame_sizes() {
        let long_title = "t".repeat(200);
        let tag = build_tag(4, &[(FRAME_TITLE, latin1(&long_title)), (FRAME_ARTIST, latin1("A"))]);
        let header = TagHeader::parse(&tag).unwrap();
        let tags = parse_tag_body(&header, &tag[TAG_HEADER_LEN..]);
        assert_eq!(tags.title.as_deref(), Some(long_title.as_str()));
        assert_eq!(tags.artist.as_deref(), Some("A"));
    }

    #[test]
    fn truncated_frame_ends_walk_without_panic() {
        let tag = build_tag(3, &[(FRAME_ARTIST, latin1("Artist")), (FRAME_TITLE, latin1("Title"))]);
        let header = TagHeader::parse(&tag).unwrap();
        // Cut in the middle of the title payload.
        let body = &tag[TAG_HEADER_LEN..tag.len() - 16 - 2];
        let tags = parse_tag_body(&header, body);
        assert_eq!(tags.artist.as_deref(), Some("Artist"));
        assert!(tags.title.is_none());
    }

    #[test]
    fn unknown_encoding_leaves_field_unset() {
        let tag = build_tag(3, &[(FRAME_ARTIST, vec![7, b'x']), (FRAME_TITLE, latin1("Title"))]);
        let header = TagHeader::parse(&tag).unwrap();
        let tags = parse_tag_body(&header, &tag[TAG_HEADER_LEN..]);
        assert!(tags.artist.is_none());
        assert_eq!(tags.display_name().as_deref(), Some("Title"));
    }

    #[test]
    fn extended_header_is_skipped() {
        let plain = build_tag(3, &[(FRAME_TITLE, latin1("Title"))]);
        let mut body = vec![0, 0, 0, 6, 0, 0, 0, 0, 0, 0];
        body.extend_from_slice(&plain[TAG_HEADER_LEN..]);
        let header = TagHeader {
            version_major: 3,
            version_minor: 0,
            flags: FLAG_EXTENDED_HEADER,
            tag_size: body.len() as u32,
        };
        let tags = parse_tag_body(&header, &body);
        assert_eq!(tags.title.as_deref(), Some("Title"));
    }

    #[test]
    fn display_name_falls_back_to_file_name() {
        let dir = tempfile::tempdir().unwrap();

        let untagged = write_file(&dir, "plain.mp3", &[0xFF, 0xFB, 0x90, 0x00]);
        assert_eq!(display_name(&untagged), "plain.mp3");

        let no_title = write_file(&dir, "artist_only.mp3", &build_tag(3, &[(FRAME_ARTIST, latin1("A"))]));
        assert_eq!(display_name(&no_title), "artist_only.mp3");

        let title_only = write_file(&dir, "t.mp3", &build_tag(3, &[(FRAME_TITLE, utf16_be("Song"))]));
        assert_eq!(display_name(&title_only), "Song");

        let full = write_file(
            &dir,
            "full.mp3",
            &build_tag(3, &[(FRAME_TITLE, utf8("Song")), (FRAME_ARTIST, utf16_bom_be("Band"))]),
        );
        assert_eq!(display_name(&full), "Band - Song");

        assert_eq!(display_name(&dir.path().join("missing.mp3")), "missing.mp3");
    }

    #[test]
    fn v22_tags_yield_no_fields() {
        let tag = build_tag(2, &[(FRAME_TITLE, latin1("Title"))]);
        let header = TagHeader::parse(&tag).unwrap();
        assert_eq!(parse_tag_body(&header, &tag[TAG_HEADER_LEN..]), TrackTags::default());
    }
}
