//! HTTP/2 frame header layout and stream state machine (component H3, §4.5).

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::net::Conn;

/// The 24-byte client connection preface.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame type byte values (RFC 7540 §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    pub fn to_byte(self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> FrameType {
        match b {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }
}

pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

/// One parsed (or about-to-be-written) HTTP/2 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub flags: u8,
    /// The full 32-bit stream id field as read/written; bit 31 (reserved)
    /// is preserved so deliberately malformed frames can set it.
    pub stream_id: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, flags: u8, stream_id: u32, payload: Vec<u8>) -> Frame {
        Frame {
            frame_type,
            flags,
            stream_id,
            payload,
        }
    }

    /// Write this frame's 9-byte header and payload verbatim -- the
    /// "raw-write" API the spec calls for, letting callers request
    /// attacker-chosen length/flags/stream ids for malformed frames.
    pub async fn write(&self, conn: &mut Conn) -> Result<()> {
        let mut header = [0u8; 9];
        let len = self.payload.len() as u32;
        header[0] = (len >> 16) as u8;
        header[1] = (len >> 8) as u8;
        header[2] = len as u8;
        header[3] = self.frame_type.to_byte();
        header[4] = self.flags;
        header[5..9].copy_from_slice(&self.stream_id.to_be_bytes());
        conn.write_all(&header).await?;
        conn.write_all(&self.payload).await?;
        Ok(())
    }

    pub async fn read(conn: &mut Conn) -> Result<Frame> {
        let mut header = [0u8; 9];
        conn.read_exact(&mut header).await?;
        let len = ((header[0] as usize) << 16) | ((header[1] as usize) << 8) | header[2] as usize;
        let frame_type = FrameType::from_byte(header[3]);
        let flags = header[4];
        let stream_id = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);
        let mut payload = vec![0u8; len];
        conn.read_exact(&mut payload).await?;
        Ok(Frame {
            frame_type,
            flags,
            stream_id,
            payload,
        })
    }
}

/// Build a SETTINGS frame payload from `(id, value)` pairs.
pub fn encode_settings(settings: &[(u16, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(settings.len() * 6);
    for (id, value) in settings {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

pub fn decode_settings(payload: &[u8]) -> Result<Vec<(u16, u32)>> {
    if !payload.len().is_multiple_of(6) {
        return Err(Error::http2("malformed SETTINGS frame: length not a multiple of 6"));
    }
    Ok(payload
        .chunks(6)
        .map(|c| {
            let id = u16::from_be_bytes([c[0], c[1]]);
            let value = u32::from_be_bytes([c[2], c[3], c[4], c[5]]);
            (id, value)
        })
        .collect())
}

/// §4.5's stream state machine. `Peer` tracks each half (local/remote)
/// independently so a stream can be half-closed in only one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// An event that can move a stream between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    SendHeaders { end_stream: bool },
    RecvHeaders { end_stream: bool },
    SendEndStream,
    RecvEndStream,
    Rst,
}

impl StreamState {
    /// Apply one event, per the table in §4.5. Invalid transitions are left
    /// unchanged rather than erroring -- malformed scripts are expected to
    /// exercise exactly these paths, and rejecting them outright would make
    /// fuzzing scripts unable to observe what the peer does.
    pub fn apply(self, event: StreamEvent) -> StreamState {
        use StreamEvent::*;
        use StreamState::*;
        match (self, event) {
            (_, Rst) => Closed,
            (Idle, SendHeaders { end_stream: false }) => Open,
            (Idle, RecvHeaders { end_stream: false }) => Open,
            (Idle, SendHeaders { end_stream: true }) => HalfClosedLocal,
            (Idle, RecvHeaders { end_stream: true }) => HalfClosedRemote,
            (Open, SendEndStream) => HalfClosedLocal,
            (Open, RecvEndStream) => HalfClosedRemote,
            (Open, SendHeaders { end_stream: true }) => HalfClosedLocal,
            (Open, RecvHeaders { end_stream: true }) => HalfClosedRemote,
            (HalfClosedLocal, RecvEndStream) => Closed,
            (HalfClosedLocal, RecvHeaders { end_stream: true }) => Closed,
            (HalfClosedRemote, SendEndStream) => Closed,
            (HalfClosedRemote, SendHeaders { end_stream: true }) => Closed,
            (state, _) => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_payload_round_trips() {
        let pairs = vec![(0x1u16, 4096u32), (0x4, 65535)];
        let encoded = encode_settings(&pairs);
        let decoded = decode_settings(&encoded).unwrap();
        assert_eq!(decoded, pairs);
    }

    #[test]
    fn malformed_settings_length_is_an_error() {
        assert!(decode_settings(&[0, 1, 2]).is_err());
    }

    #[test]
    fn idle_to_open_to_closed_via_both_ends() {
        let s = StreamState::Idle;
        let s = s.apply(StreamEvent::SendHeaders { end_stream: false });
        assert_eq!(s, StreamState::Open);
        let s = s.apply(StreamEvent::SendEndStream);
        assert_eq!(s, StreamState::HalfClosedLocal);
        let s = s.apply(StreamEvent::RecvEndStream);
        assert_eq!(s, StreamState::Closed);
    }

    #[test]
    fn rst_stream_closes_from_any_state() {
        for state in [
            StreamState::Idle,
            StreamState::Open,
            StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote,
        ] {
            assert_eq!(state.apply(StreamEvent::Rst), StreamState::Closed);
        }
    }

    #[test]
    fn closed_never_reopens() {
        let s = StreamState::Closed.apply(StreamEvent::SendHeaders { end_stream: false });
        assert_eq!(s, StreamState::Closed);
    }

    #[test]
    fn single_headers_frame_with_end_stream_half_closes_immediately() {
        let s = StreamState::Idle.apply(StreamEvent::RecvHeaders { end_stream: true });
        assert_eq!(s, StreamState::HalfClosedRemote);
    }
}
