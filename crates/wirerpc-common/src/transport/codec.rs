//! Framing and body encoding for WireRPC messages.
//!
//! # Frame
//!
//! ```text
//! [u32 BE length][u8 kind][body]
//! ```
//!
//! `length` counts the kind byte plus the body, i.e. every byte after the
//! length prefix. `kind` is `1` for a request and `2` for a response.
//!
//! # Body
//!
//! Strings are `[u32 BE len][UTF-8]`, values are `[u32 BE len][JSON]`, and
//! lists are `[u32 BE count][items]`. Every field is self-delimiting, so
//! decoding never looks past the declared frame length.
//!
//! ```text
//! REQUEST  = id, service, method, [type descriptors], [values], [(key, value)]
//! RESPONSE = id, status u8 (0 = OK, 1 = ERROR), OK: value | ERROR: type, message
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

use crate::protocol::{
    Metadata, Outcome, RemoteError, Request, Response, Result, RpcError, RpcValue,
};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Size of the fixed frame header (length prefix + kind byte)
pub const HEADER_LEN: usize = LENGTH_PREFIX_LEN + 1;

/// Default maximum frame length (16 MB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const KIND_REQUEST: u8 = 1;
const KIND_RESPONSE: u8 = 2;

const STATUS_OK: u8 = 0;
const STATUS_ERROR: u8 = 1;

/// Message-kind discriminator carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    fn as_byte(self) -> u8 {
        match self {
            MessageKind::Request => KIND_REQUEST,
            MessageKind::Response => KIND_RESPONSE,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            KIND_REQUEST => Ok(MessageKind::Request),
            KIND_RESPONSE => Ok(MessageKind::Response),
            other => Err(RpcError::DecodeFailure(format!(
                "Unknown message kind: {}",
                other
            ))),
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Request(_) => MessageKind::Request,
            Message::Response(_) => MessageKind::Response,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Message::Request(request) => &request.correlation_id,
            Message::Response(response) => &response.correlation_id,
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

/// Codec limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Largest accepted value of the length prefix
    pub max_frame_len: usize,
}

impl CodecConfig {
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Encodes a message into one complete frame.
///
/// # Errors
///
/// Returns [`RpcError::EncodeFailure`] when the frame would exceed
/// `config.max_frame_len` or a value cannot be serialized.
///
/// # Example
///
/// ```
/// use wirerpc_common::transport::{encode, CodecConfig, FrameDecoder, Message};
/// use wirerpc_common::protocol::Response;
/// use serde_json::json;
///
/// let config = CodecConfig::default();
/// let frame = encode(&Message::from(Response::success("c-1", json!(1))), &config).unwrap();
///
/// let mut decoder = FrameDecoder::new(config);
/// decoder.extend(&frame);
/// assert!(decoder.decode().unwrap().is_some());
/// ```
pub fn encode(message: &Message, config: &CodecConfig) -> Result<Bytes> {
    match message {
        Message::Request(request) => encode_request(request, config),
        Message::Response(response) => encode_response(response, config),
    }
}

/// Encodes a request frame without wrapping it in a [`Message`].
pub fn encode_request(request: &Request, config: &CodecConfig) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(128);
    encode_request_body(&mut body, request)?;
    frame(MessageKind::Request, &body, config)
}

/// Encodes a response frame without wrapping it in a [`Message`].
pub fn encode_response(response: &Response, config: &CodecConfig) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(64);
    encode_response_body(&mut body, response)?;
    frame(MessageKind::Response, &body, config)
}

fn frame(kind: MessageKind, body: &[u8], config: &CodecConfig) -> Result<Bytes> {
    let frame_len = body.len() + 1;
    if frame_len > config.max_frame_len {
        return Err(RpcError::EncodeFailure(format!(
            "Frame too large: {} bytes (max {} bytes)",
            frame_len, config.max_frame_len
        )));
    }
    let prefix = u32::try_from(frame_len).map_err(|_| {
        RpcError::EncodeFailure(format!("Frame length {} does not fit the prefix", frame_len))
    })?;

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_LEN + frame_len);
    frame.put_u32(prefix);
    frame.put_u8(kind.as_byte());
    frame.extend_from_slice(body);
    Ok(frame.freeze())
}

/// Resumable frame decoder.
///
/// Bytes are appended as they arrive with [`extend`](Self::extend);
/// [`decode`](Self::decode) yields one message per complete frame,
/// `Ok(None)` when more data is needed, and an error for a malformed or
/// oversized frame. After an error the stream is out of sync and the
/// connection should be closed.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    config: CodecConfig,
}

impl FrameDecoder {
    pub fn new(config: CodecConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            config,
        }
    }

    /// Appends bytes read from the transport.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes buffered but not yet consumed by a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn decode(&mut self) -> Result<Option<Message>> {
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let frame_len = (&self.buf[..LENGTH_PREFIX_LEN]).get_u32() as usize;
        if frame_len == 0 {
            return Err(RpcError::DecodeFailure(
                "Empty frame: missing message kind".to_string(),
            ));
        }
        if frame_len > self.config.max_frame_len {
            return Err(RpcError::DecodeFailure(format!(
                "Frame too large: {} bytes (max {} bytes)",
                frame_len, self.config.max_frame_len
            )));
        }

        let total = LENGTH_PREFIX_LEN + frame_len;
        if self.buf.len() < total {
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_LEN);
        let mut frame = self.buf.split_to(frame_len).freeze();
        let kind = MessageKind::from_byte(frame.get_u8())?;

        let mut reader = BodyReader::new(frame);
        let message = match kind {
            MessageKind::Request => Message::Request(decode_request_body(&mut reader)?),
            MessageKind::Response => Message::Response(decode_response_body(&mut reader)?),
        };
        reader.finish()?;

        Ok(Some(message))
    }
}

fn encode_request_body(buf: &mut BytesMut, request: &Request) -> Result<()> {
    if request.parameter_types.len() != request.parameters.len() {
        return Err(RpcError::EncodeFailure(format!(
            "Request {} has {} type descriptors for {} parameters",
            request.correlation_id,
            request.parameter_types.len(),
            request.parameters.len()
        )));
    }

    put_str(buf, &request.correlation_id)?;
    put_str(buf, &request.service_name)?;
    put_str(buf, &request.method_name)?;

    put_count(buf, request.parameter_types.len())?;
    for descriptor in &request.parameter_types {
        put_str(buf, descriptor)?;
    }

    put_count(buf, request.parameters.len())?;
    for value in &request.parameters {
        put_value(buf, value)?;
    }

    // Sorted so equal requests always encode to equal bytes
    let metadata: BTreeMap<_, _> = request.metadata.iter().collect();
    put_count(buf, metadata.len())?;
    for (key, value) in metadata {
        put_str(buf, key)?;
        put_value(buf, value)?;
    }

    Ok(())
}

fn encode_response_body(buf: &mut BytesMut, response: &Response) -> Result<()> {
    put_str(buf, &response.correlation_id)?;
    match &response.outcome {
        Outcome::Success(value) => {
            buf.put_u8(STATUS_OK);
            put_value(buf, value)?;
        }
        Outcome::Failure(err) => {
            buf.put_u8(STATUS_ERROR);
            put_str(buf, &err.error_type)?;
            put_str(buf, &err.message)?;
        }
    }
    Ok(())
}

fn decode_request_body(reader: &mut BodyReader) -> Result<Request> {
    let correlation_id = reader.get_str("correlation id")?;
    let service_name = reader.get_str("service name")?;
    let method_name = reader.get_str("method name")?;

    let type_count = reader.get_u32("parameter descriptor count")?;
    let mut parameter_types = Vec::new();
    for _ in 0..type_count {
        parameter_types.push(reader.get_str("parameter descriptor")?);
    }

    let value_count = reader.get_u32("parameter count")?;
    let mut parameters = Vec::new();
    for _ in 0..value_count {
        parameters.push(reader.get_value("parameter value")?);
    }

    if parameter_types.len() != parameters.len() {
        return Err(RpcError::DecodeFailure(format!(
            "Request {} has {} type descriptors for {} parameters",
            correlation_id,
            parameter_types.len(),
            parameters.len()
        )));
    }

    let metadata_count = reader.get_u32("metadata count")?;
    let mut metadata = Metadata::new();
    for _ in 0..metadata_count {
        let key = reader.get_str("metadata key")?;
        let value = reader.get_value("metadata value")?;
        metadata.insert(key, value);
    }

    Ok(Request {
        correlation_id,
        service_name,
        method_name,
        parameter_types,
        parameters,
        metadata,
    })
}

fn decode_response_body(reader: &mut BodyReader) -> Result<Response> {
    let correlation_id = reader.get_str("correlation id")?;
    let outcome = match reader.get_u8("status")? {
        STATUS_OK => Outcome::Success(reader.get_value("result")?),
        STATUS_ERROR => {
            let error_type = reader.get_str("error type")?;
            let message = reader.get_str("error message")?;
            Outcome::Failure(RemoteError::new(error_type, message))
        }
        other => {
            return Err(RpcError::DecodeFailure(format!(
                "Unknown response status: {}",
                other
            )))
        }
    };

    Ok(Response {
        correlation_id,
        outcome,
    })
}

fn put_count(buf: &mut BytesMut, count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| RpcError::EncodeFailure(format!("Too many items: {}", count)))?;
    buf.put_u32(count);
    Ok(())
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    put_count(buf, data.len())?;
    buf.extend_from_slice(data);
    Ok(())
}

fn put_str(buf: &mut BytesMut, value: &str) -> Result<()> {
    put_bytes(buf, value.as_bytes())
}

fn put_value(buf: &mut BytesMut, value: &RpcValue) -> Result<()> {
    let json = serde_json::to_vec(value)
        .map_err(|e| RpcError::EncodeFailure(format!("Failed to serialize value: {}", e)))?;
    put_bytes(buf, &json)
}

/// Bounds-checked reader over one frame body.
struct BodyReader {
    body: Bytes,
}

impl BodyReader {
    fn new(body: Bytes) -> Self {
        Self { body }
    }

    fn ensure(&self, needed: usize, what: &str) -> Result<()> {
        if self.body.remaining() < needed {
            return Err(RpcError::DecodeFailure(format!(
                "Truncated {}: need {} bytes, {} left in frame",
                what,
                needed,
                self.body.remaining()
            )));
        }
        Ok(())
    }

    fn get_u8(&mut self, what: &str) -> Result<u8> {
        self.ensure(1, what)?;
        Ok(self.body.get_u8())
    }

    fn get_u32(&mut self, what: &str) -> Result<u32> {
        self.ensure(4, what)?;
        Ok(self.body.get_u32())
    }

    fn get_bytes(&mut self, what: &str) -> Result<Bytes> {
        let len = self.get_u32(what)? as usize;
        self.ensure(len, what)?;
        Ok(self.body.split_to(len))
    }

    fn get_str(&mut self, what: &str) -> Result<String> {
        let raw = self.get_bytes(what)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| RpcError::DecodeFailure(format!("Invalid UTF-8 in {}: {}", what, e)))
    }

    fn get_value(&mut self, what: &str) -> Result<RpcValue> {
        let raw = self.get_bytes(what)?;
        serde_json::from_slice(&raw)
            .map_err(|e| RpcError::DecodeFailure(format!("Invalid {}: {}", what, e)))
    }

    fn finish(self) -> Result<()> {
        if self.body.has_remaining() {
            return Err(RpcError::DecodeFailure(format!(
                "{} trailing bytes after message body",
                self.body.remaining()
            )));
        }
        Ok(())
    }
}
