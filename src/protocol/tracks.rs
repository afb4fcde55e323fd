use std::io::{self, Cursor, Read, Write};
use std::time::Duration;

use base64::prelude::*;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

/// Lavaplayer message flag: a version byte follows the header.
const TRACK_INFO_VERSIONED: u32 = 1;

/// Highest track info version this codec understands.
const TRACK_INFO_VERSION: u8 = 3;

/// A single audio track with encoded data and metadata, as reported by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Base64-encoded track data.
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default = "default_json_object")]
    pub plugin_info: serde_json::Value,
    /// User-provided data attached to the track. The player stores the
    /// requester here so it survives the round trip through the node.
    #[serde(default = "default_json_object")]
    pub user_data: serde_json::Value,
}

fn default_json_object() -> serde_json::Value {
    serde_json::json!({})
}

impl Track {
    /// Create a new Track from info and encode it.
    pub fn new(info: TrackInfo) -> Self {
        let mut track = Self {
            encoded: String::new(),
            info,
            plugin_info: default_json_object(),
            user_data: default_json_object(),
        };
        track.encoded = track.encode();
        track
    }

    /// Known playable length. `None` for streams and tracks without a length.
    pub fn duration(&self) -> Option<Duration> {
        if self.info.is_stream || self.info.length == 0 {
            None
        } else {
            Some(Duration::from_millis(self.info.length))
        }
    }

    /// Encode the track into a base64 string (Lavaplayer message format, version 3).
    ///
    ///   [u32 header: payload_size | (flags << 30)]
    ///   [u8 version] [utf title] [utf author] [u64 length] [utf identifier]
    ///   [u8 is_stream] [opt_utf uri] [opt_utf artwork_url] [opt_utf isrc]
    ///   [utf source_name] [u64 position]
    pub fn encode(&self) -> String {
        self.to_bytes()
            .map(|bytes| BASE64_STANDARD.encode(bytes))
            .unwrap_or_default()
    }

    fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut payload = Vec::new();
        payload.write_u8(TRACK_INFO_VERSION)?;
        write_utf(&mut payload, &self.info.title)?;
        write_utf(&mut payload, &self.info.author)?;
        payload.write_u64::<BigEndian>(self.info.length)?;
        write_utf(&mut payload, &self.info.identifier)?;
        payload.write_u8(u8::from(self.info.is_stream))?;
        write_opt_utf(&mut payload, self.info.uri.as_deref())?;
        write_opt_utf(&mut payload, self.info.artwork_url.as_deref())?;
        write_opt_utf(&mut payload, self.info.isrc.as_deref())?;
        write_utf(&mut payload, &self.info.source_name)?;
        payload.write_u64::<BigEndian>(self.info.position)?;

        let header = payload.len() as u32 | (TRACK_INFO_VERSIONED << 30);
        let mut out = Vec::with_capacity(payload.len() + 4);
        out.write_u32::<BigEndian>(header)?;
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a track from a base64 string. Supports versions 1 to 3.
    pub fn decode(encoded: &str) -> Option<Self> {
        let data = BASE64_STANDARD.decode(encoded).ok()?;
        if data.len() < 4 {
            return None;
        }

        let mut cursor = Cursor::new(data);
        let header = cursor.read_u32::<BigEndian>().ok()?;
        let flags = (header >> 30) & 0x03;

        let version = if flags & TRACK_INFO_VERSIONED != 0 {
            cursor.read_u8().ok()?
        } else {
            1
        };
        if version > TRACK_INFO_VERSION {
            return None;
        }

        let title = read_utf(&mut cursor)?;
        let author = read_utf(&mut cursor)?;
        let length = cursor.read_u64::<BigEndian>().ok()?;
        let identifier = read_utf(&mut cursor)?;
        let is_stream = cursor.read_u8().ok()? != 0;
        let uri = if version >= 2 {
            read_opt_utf(&mut cursor)
        } else {
            None
        };
        let (artwork_url, isrc) = if version >= 3 {
            (read_opt_utf(&mut cursor), read_opt_utf(&mut cursor))
        } else {
            (None, None)
        };
        let source_name = read_utf(&mut cursor)?;
        let position = cursor.read_u64::<BigEndian>().unwrap_or(0);

        Some(Self {
            encoded: encoded.to_string(),
            info: TrackInfo {
                identifier,
                is_seekable: !is_stream,
                author,
                length,
                is_stream,
                position,
                title,
                uri,
                artwork_url,
                isrc,
                source_name,
            },
            plugin_info: default_json_object(),
            user_data: default_json_object(),
        })
    }
}

fn write_utf<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string too long"))?;
    w.write_u16::<BigEndian>(len)?;
    w.write_all(bytes)
}

fn write_opt_utf<W: Write>(w: &mut W, s: Option<&str>) -> io::Result<()> {
    match s {
        Some(s) => {
            w.write_u8(1)?;
            write_utf(w, s)
        }
        None => w.write_u8(0),
    }
}

fn read_utf<R: Read>(r: &mut R) -> Option<String> {
    let len = r.read_u16::<BigEndian>().ok()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).ok()?;
    String::from_utf8(buf).ok()
}

fn read_opt_utf<R: Read>(r: &mut R) -> Option<String> {
    let present = r.read_u8().ok()? != 0;
    if present { read_utf(r) } else { None }
}

/// Metadata for an audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Duration in milliseconds. 0 for live streams.
    pub length: u64,
    pub is_stream: bool,
    /// Playback position in milliseconds.
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub isrc: Option<String>,
    pub source_name: String,
}
