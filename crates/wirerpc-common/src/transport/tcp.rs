use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};

use crate::protocol::{Request, Response, Result, RpcError};
use crate::transport::codec::{encode, CodecConfig, FrameDecoder, Message};

/// Default timeout for establishing a connection (3 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

const READ_CHUNK: usize = 8 * 1024;

/// Async TCP transport for WireRPC frames.
///
/// Used for connection establishment by the client and for one-shot
/// request/response exchanges (health probes, diagnostics). Multiplexed
/// traffic goes through the client's connection manager instead.
///
/// # Example
///
/// ```no_run
/// use wirerpc_common::transport::TcpTransportAsync;
/// use wirerpc_common::protocol::Request;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransportAsync::default();
/// let mut stream = transport.connect("127.0.0.1:9000").await?;
///
/// let request = Request::new("probe-1", "EchoService", "_info");
/// let response = transport.send_request(&mut stream, &request).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransportAsync {
    codec: CodecConfig,
    connect_timeout: Duration,
}

impl TcpTransportAsync {
    pub fn new(codec: CodecConfig, connect_timeout: Duration) -> Self {
        Self {
            codec,
            connect_timeout,
        }
    }

    pub fn codec(&self) -> &CodecConfig {
        &self.codec
    }

    /// Connects to a remote endpoint.
    ///
    /// Every resolved address is tried in turn within the connect timeout.
    /// Failure is reported as [`RpcError::ConnectFailure`] and never retried.
    pub async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let attempt = async {
            let socket_addrs: Vec<SocketAddr> = lookup_host(addr)
                .await
                .map_err(|e| connect_failure(addr, format!("Invalid address: {}", e)))?
                .collect();

            let mut last_err = None;
            for socket_addr in socket_addrs {
                match TcpStream::connect(socket_addr).await {
                    Ok(stream) => {
                        // Requests are small and latency-sensitive
                        stream
                            .set_nodelay(true)
                            .map_err(|e| connect_failure(addr, e.to_string()))?;
                        tracing::debug!(addr, peer = %socket_addr, "Connected");
                        return Ok(stream);
                    }
                    Err(e) => last_err = Some(e),
                }
            }

            Err(connect_failure(
                addr,
                last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "No addresses resolved".to_string()),
            ))
        };

        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(connect_failure(
                addr,
                format!("Timed out after {}ms", self.connect_timeout.as_millis()),
            )),
        }
    }

    /// Sends one request and waits for the response with the same correlation id.
    pub async fn send_request<S>(&self, stream: &mut S, request: &Request) -> Result<Response>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.write_message(stream, &Message::Request(request.clone()))
            .await?;

        let mut decoder = FrameDecoder::new(self.codec);
        match Self::read_message(stream, &mut decoder).await? {
            Some(Message::Response(response)) if response.correlation_id == request.correlation_id => {
                Ok(response)
            }
            Some(Message::Response(response)) => Err(RpcError::DecodeFailure(format!(
                "Expected response to {}, got {}",
                request.correlation_id, response.correlation_id
            ))),
            Some(Message::Request(_)) => Err(RpcError::DecodeFailure(
                "Expected a response frame, got a request".to_string(),
            )),
            None => Err(RpcError::ConnectionClosed(
                "Peer closed the connection before responding".to_string(),
            )),
        }
    }

    /// Encodes and writes one message.
    pub async fn write_message<W>(&self, writer: &mut W, message: &Message) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = encode(message, &self.codec)?;
        Self::write_frame(writer, &frame).await
    }

    /// Writes an already-encoded frame.
    pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer
            .write_all(frame)
            .await
            .map_err(|e| map_io_error(e, "writing frame"))?;
        writer
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))?;
        Ok(())
    }

    /// Reads until `decoder` yields a complete message.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames. EOF in the middle
    /// of a frame is [`RpcError::ConnectionClosed`].
    pub async fn read_message<R>(reader: &mut R, decoder: &mut FrameDecoder) -> Result<Option<Message>>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(message) = decoder.decode()? {
                return Ok(Some(message));
            }

            let n = reader
                .read(&mut chunk)
                .await
                .map_err(|e| map_io_error(e, "reading frame"))?;
            if n == 0 {
                if decoder.buffered() == 0 {
                    return Ok(None);
                }
                return Err(RpcError::ConnectionClosed(format!(
                    "Connection closed with {} bytes of an incomplete frame",
                    decoder.buffered()
                )));
            }
            decoder.extend(&chunk[..n]);
        }
    }
}

impl Default for TcpTransportAsync {
    fn default() -> Self {
        Self::new(CodecConfig::default(), DEFAULT_CONNECT_TIMEOUT)
    }
}

fn connect_failure(addr: &str, reason: impl Into<String>) -> RpcError {
    RpcError::ConnectFailure {
        addr: addr.to_string(),
        reason: reason.into(),
    }
}

/// Maps I/O errors on an established stream onto `RpcError` variants.
pub fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => {
            RpcError::ConnectionClosed(format!("{}: {}", context, err))
        }
        _ => RpcError::Io(err),
    }
}
