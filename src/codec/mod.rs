//! Frame codec
//!
//! Pure conversions between float sample buffers and the 16-bit
//! little-endian PCM carried on the wire.

pub mod decoder;
pub mod encoder;

pub use decoder::{decode, decode_base64};
pub use encoder::{encode, RealtimeInput, WireFrame};
