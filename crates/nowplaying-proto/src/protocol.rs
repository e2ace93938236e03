use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this in the `hello` they receive on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames larger than this are treated as a broken peer, not as data.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Identity of one reporting context (one browser tab).  Handed out by the
/// hub per connection; reporters never choose their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Spotify,
    Youtube,
}

/// Report as it arrives from a reporter.  Every field is optional on the
/// wire; validation happens in [`MediaReport::into_snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReport {
    pub title: Option<String>,
    pub is_playing: Option<bool>,
    /// Capture time on the reporter side, milliseconds since the epoch.
    pub timestamp: Option<u64>,
    pub image: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<MediaKind>,
    pub video_id: Option<String>,
}

impl MediaReport {
    pub fn new(title: impl Into<String>, is_playing: bool, timestamp: u64) -> Self {
        Self {
            title: Some(title.into()),
            is_playing: Some(is_playing),
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    /// A report that says "this reporter has no media".
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Field deserializer for `updateInfo`: a missing, null or ill-typed
    /// report reads as "no media" instead of failing the whole frame.
    fn lenient<'de, D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    /// Validate into a held record.  `None` means "no media": a blank or
    /// missing title, or a missing play state or timestamp.
    pub fn into_snapshot(self, source_id: SourceId) -> Option<MediaSnapshot> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;
        Some(MediaSnapshot {
            source_id,
            title,
            is_playing: self.is_playing?,
            timestamp: self.timestamp?,
            image: self.image.filter(|i| !i.is_empty()),
            kind: self.kind,
            video_id: self.video_id,
        })
    }
}

/// The record the hub holds as "now playing".  `title` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSnapshot {
    pub source_id: SourceId,
    pub title: String,
    pub is_playing: bool,
    pub timestamp: u64,
    pub image: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<MediaKind>,
    pub video_id: Option<String>,
}

/// Everything a watcher needs.  `rev` is bumped on every change of `media`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubState {
    pub rev: u64,
    pub media: Option<MediaSnapshot>,
}

/// Playback command relayed to the authoritative reporter.  The hub never
/// interprets these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerCommand {
    PlayPause,
    Rewind,
    Forward,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown command {0:?} (expected playpause, rewind or forward)")]
pub struct UnknownCommand(pub String);

impl FromStr for PlayerCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playpause" => Ok(PlayerCommand::PlayPause),
            "rewind" => Ok(PlayerCommand::Rewind),
            "forward" => Ok(PlayerCommand::Forward),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            PlayerCommand::PlayPause => "playpause",
            PlayerCommand::Rewind => "rewind",
            PlayerCommand::Forward => "forward",
        };
        f.write_str(token)
    }
}

/// Messages sent from a reporter or control surface to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    UpdateInfo {
        #[serde(default, deserialize_with = "MediaReport::lenient")]
        info: MediaReport,
    },
    GetInfo,
    SendCommand { command: PlayerCommand },
    /// Ask the hub to push a `state` reply on every change.
    Watch,
}

/// Messages sent from the hub to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Reply {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        source_id: SourceId,
        state: HubState,
    },
    Ack {
        status: String,
    },
    Info {
        media: Option<MediaSnapshot>,
    },
    State {
        data: HubState,
    },
    /// A routed playback command; only the authoritative reporter gets these.
    Command {
        command: PlayerCommand,
    },
    Error {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Reply(Reply),
}

// Dispatch on the tag key so a bad frame reports what is actually wrong
// with it rather than "did not match any variant".
impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let parsed = if value.get("reply").is_some() {
            Reply::deserialize(value).map(Message::Reply)
        } else {
            Request::deserialize(value).map(Message::Request)
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame incomplete")]
    Incomplete,
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),
    /// The frame was well delimited but its body did not parse.  `consumed`
    /// bytes can be dropped and the stream continues.
    #[error("malformed frame: {source}")]
    Malformed {
        consumed: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the connection must be dropped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::Malformed { .. } | FrameError::Incomplete)
    }
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let json = serde_json::to_vec(self).map_err(FrameError::Encode)?;
        if json.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(json.len()));
        }
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> Result<(Self, usize), FrameError> {
        if data.len() < 4 {
            return Err(FrameError::Incomplete);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        if data.len() < 4 + len {
            return Err(FrameError::Incomplete);
        }
        match serde_json::from_slice(&data[4..4 + len]) {
            Ok(msg) => Ok((msg, 4 + len)),
            Err(source) => Err(FrameError::Malformed {
                consumed: 4 + len,
                source,
            }),
        }
    }
}

/// Accumulates bytes from a stream and yields whole messages.
///
/// `next` is cancel-safe: the only await point is the socket read, and any
/// bytes it returns are buffered before the next decode attempt.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4096),
        }
    }

    /// Next message, or `Ok(None)` once the peer closed the stream.  A
    /// malformed frame is skipped and reported; the reader stays usable.
    pub async fn next<R>(&mut self, reader: &mut R) -> Result<Option<Message>, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut tmp = [0u8; 4096];
        loop {
            match Message::decode(&self.buf) {
                Ok((msg, consumed)) => {
                    self.buf.drain(..consumed);
                    return Ok(Some(msg));
                }
                Err(FrameError::Malformed { consumed, source }) => {
                    self.buf.drain(..consumed);
                    return Err(FrameError::Malformed { consumed, source });
                }
                Err(FrameError::Incomplete) => {}
                Err(e) => return Err(e),
            }

            let n = reader.read(&mut tmp).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }
}
