//! WireRPC Transport Layer
//!
//! This module provides the binary wire codec and the async TCP transport.
//!
//! # Architecture
//!
//! - **Codec**: length-prefixed frames with a message-kind byte, see [`codec`]
//! - **Decoder**: [`FrameDecoder`] is resumable across partial reads
//! - **Transport**: [`TcpTransportAsync`] connects and performs one-shot exchanges
//!
//! # Frame Size Limits
//!
//! Both directions enforce [`CodecConfig::max_frame_len`] (16 MB by default).
//! An oversized frame is a protocol error; the connection carrying it is closed.

pub mod codec;
pub mod tcp;

pub use codec::{
    encode, encode_request, encode_response, CodecConfig, FrameDecoder, Message, MessageKind,
    DEFAULT_MAX_FRAME_LEN, HEADER_LEN, LENGTH_PREFIX_LEN,
};
pub use tcp::{map_io_error, TcpTransportAsync, DEFAULT_CONNECT_TIMEOUT};
