// Binary frame codec.
//
// Layout: varint tag, then the family payload. Sync and awareness frames are
// byte-compatible with y-protocols so stock Yjs providers can talk to the
// relay; signaling uses its own tag with a length-prefixed JSON body.

use std::fmt;

use thiserror::Error;
use yrs::encoding::read::{self, Cursor, Read};
use yrs::encoding::write::Write;
use yrs::sync::{AwarenessUpdate, Message, SyncMessage};
use yrs::updates::decoder::{Decode, DecoderV1};
use yrs::updates::encoder::Encode;
use yrs::StateVector;

use super::signal::SignalEnvelope;

pub const MSG_SYNC: u32 = 0;
pub const MSG_AWARENESS: u32 = 1;
/// y-protocols auth message. Reserved, never accepted.
pub const MSG_AUTH: u32 = 2;
/// y-protocols awareness query. Reserved, never accepted.
pub const MSG_QUERY_AWARENESS: u32 = 3;
pub const MSG_SIGNAL: u32 = 4;

/// Message family of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameClass {
    Sync,
    Awareness,
    Signal,
}

impl FrameClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Awareness => "awareness",
            Self::Signal => "signal",
        }
    }

    pub const fn tag(self) -> u32 {
        match self {
            Self::Sync => MSG_SYNC,
            Self::Awareness => MSG_AWARENESS,
            Self::Signal => MSG_SIGNAL,
        }
    }
}

impl fmt::Display for FrameClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded inbound frame.
#[derive(Debug)]
pub enum Frame {
    Sync(SyncMessage),
    Awareness(AwarenessUpdate),
    Signal(SignalEnvelope),
}

impl Frame {
    pub fn class(&self) -> FrameClass {
        match self {
            Self::Sync(_) => FrameClass::Sync,
            Self::Awareness(_) => FrameClass::Awareness,
            Self::Signal(_) => FrameClass::Signal,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is empty")]
    Empty,

    #[error("frame tag is not a valid varint: {0}")]
    Tag(#[source] read::Error),

    #[error("unknown frame tag {0}")]
    UnknownTag(u32),

    #[error("malformed {class} payload: {source}")]
    Payload {
        class: FrameClass,
        #[source]
        source: read::Error,
    },

    #[error("malformed signal envelope: {0}")]
    Signal(#[from] serde_json::Error),
}

impl FrameError {
    /// Signaling errors are dropped quietly; everything else is a framing or
    /// protocol problem worth a warning.
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::Signal(_) | Self::Payload { class: FrameClass::Signal, .. })
    }
}

/// Decode one frame. The tag alone selects the interpretation.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }

    let mut cursor = Cursor::new(bytes);
    let tag: u32 = cursor.read_var().map_err(FrameError::Tag)?;
    match tag {
        MSG_SYNC => {
            let mut decoder = DecoderV1::new(cursor);
            SyncMessage::decode(&mut decoder)
                .map(Frame::Sync)
                .map_err(|source| FrameError::Payload { class: FrameClass::Sync, source })
        }
        MSG_AWARENESS => {
            let payload = cursor
                .read_buf()
                .map_err(|source| FrameError::Payload { class: FrameClass::Awareness, source })?;
            AwarenessUpdate::decode_v1(payload)
                .map(Frame::Awareness)
                .map_err(|source| FrameError::Payload { class: FrameClass::Awareness, source })
        }
        MSG_SIGNAL => {
            let payload = cursor
                .read_buf()
                .map_err(|source| FrameError::Payload { class: FrameClass::Signal, source })?;
            Ok(Frame::Signal(SignalEnvelope::from_json(payload)?))
        }
        other => Err(FrameError::UnknownTag(other)),
    }
}

pub fn encode_sync(message: SyncMessage) -> Vec<u8> {
    Message::Sync(message).encode_v1()
}

/// Sync step 1 carrying the replica's state vector.
pub fn encode_state_summary(state_vector: StateVector) -> Vec<u8> {
    encode_sync(SyncMessage::SyncStep1(state_vector))
}

pub fn encode_update(update: Vec<u8>) -> Vec<u8> {
    encode_sync(SyncMessage::Update(update))
}

pub fn encode_awareness(update: AwarenessUpdate) -> Vec<u8> {
    Message::Awareness(update).encode_v1()
}

pub fn encode_signal(envelope: &SignalEnvelope) -> Result<Vec<u8>, serde_json::Error> {
    let json = envelope.to_json()?;
    let mut frame = Vec::with_capacity(json.len() + 6);
    frame.write_var(MSG_SIGNAL);
    frame.write_buf(&json);
    Ok(frame)
}
