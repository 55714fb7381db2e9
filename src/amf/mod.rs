//! AMF0 (Action Message Format) support
//!
//! RTMP commands (`connect`, `createStream`, `play`, `onStatus`) and stream
//! metadata (`onMetaData`) are AMF0-encoded.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::AmfValue;
