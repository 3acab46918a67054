//! sbgECom framing layer.
//!
//! - [`crc`]: frame CRC
//! - [`frame`]: frame layout and encoder
//! - [`parser`]: resynchronizing byte-by-byte decoder
//! - [`pump`]: [`Protocol`], which ties a transport to the parser with
//!   timeouts, large transfer paging and input purging

pub mod crc;
pub mod frame;
pub mod parser;
pub mod pump;

pub use frame::{
    encode, encode_extended, AckPayload, Frame, PageInfo, MAX_BUFFER_SIZE,
    MAX_EXTENDED_PAYLOAD_SIZE, MAX_PAYLOAD_SIZE,
};
pub use parser::{FrameParser, FramingFault, ParseEvent};
pub use pump::{Protocol, ProtocolStats};
