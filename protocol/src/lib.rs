//! Ratewire Protocol
//!
//! Messages exchanged between clients and the rate server, and the framing
//! that carries them: one JSON object per line over a byte stream.
//!
//! A connection carries both operations. `get_rate` frames are answered
//! with a `rate` frame echoing the caller's `request_id`; `subscribe`
//! frames add a pair to the connection's subscription, after which the
//! server pushes `rate_update` frames on every rate refresh.

pub mod messages;
pub mod codec;

pub use messages::*;
pub use codec::{FrameReader, FrameWriter, ProtocolError, MAX_FRAME_LEN};
