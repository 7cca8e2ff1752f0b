// Room protocol: one binary WebSocket frame per message, tagged by family.

pub mod frame;
pub mod signal;

pub use frame::{decode_frame, Frame, FrameClass, FrameError};
pub use signal::{SignalEnvelope, SignalKind};
