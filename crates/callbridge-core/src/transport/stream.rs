//! Length-prefixed stream transport
//!
//! Each frame is a 4-byte big-endian length followed by the payload. A clean
//! end of stream between frames closes the channel; an end of stream inside a
//! frame, or a length above the limit, is a framing error.

use super::{Channel, FrameSink, FrameSource};
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

/// How long a spawned child gets to exit after its stdin closes
const CHILD_EXIT_GRACE_SECS: u64 = 5;

fn io_to_bridge(err: io::Error) -> BridgeError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected => BridgeError::ChannelClosed,
        _ => BridgeError::from(err),
    }
}

/// Reads length-prefixed frames
pub struct FrameReader<R> {
    reader: R,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(reader: R, max_frame: usize) -> Self {
        Self { reader, max_frame }
    }

    /// Read one frame. `Ok(None)` on end of stream at a frame boundary.
    pub async fn read_frame(&mut self) -> BridgeResult<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            let n = self
                .reader
                .read(&mut len_buf[filled..])
                .await
                .map_err(io_to_bridge)?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(BridgeError::framing(format!(
                    "stream ended inside a length prefix ({} of 4 bytes)",
                    filled
                )));
            }
            filled += n;
        }

        let length = u32::from_be_bytes(len_buf) as usize;
        if length > self.max_frame {
            return Err(BridgeError::framing(format!(
                "frame of {} bytes exceeds limit of {}",
                length, self.max_frame
            )));
        }

        let mut payload = vec![0u8; length];
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => BridgeError::framing(format!(
                    "stream ended inside a {} byte frame",
                    length
                )),
                _ => io_to_bridge(e),
            })?;

        Ok(Some(payload))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for FrameReader<R> {
    async fn receive(&mut self) -> BridgeResult<Option<Vec<u8>>> {
        self.read_frame().await
    }
}

/// Writes length-prefixed frames
pub struct FrameWriter<W> {
    writer: W,
    max_frame: usize,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(writer: W, max_frame: usize) -> Self {
        Self { writer, max_frame }
    }

    /// Write one frame and flush
    pub async fn write_frame(&mut self, frame: &[u8]) -> BridgeResult<()> {
        if frame.len() > self.max_frame {
            return Err(BridgeError::framing(format!(
                "frame of {} bytes exceeds limit of {}",
                frame.len(),
                self.max_frame
            )));
        }

        let len = frame.len() as u32;
        self.writer
            .write_all(&len.to_be_bytes())
            .await
            .map_err(io_to_bridge)?;
        self.writer.write_all(frame).await.map_err(io_to_bridge)?;
        self.writer.flush().await.map_err(io_to_bridge)?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for FrameWriter<W> {
    async fn send(&mut self, frame: Vec<u8>) -> BridgeResult<()> {
        self.write_frame(&frame).await
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.writer.shutdown().await.map_err(io_to_bridge)
    }
}

/// Sink that owns a spawned child process
struct ChildSink {
    writer: Option<FrameWriter<ChildStdin>>,
    child: Option<Child>,
}

#[async_trait]
impl FrameSink for ChildSink {
    async fn send(&mut self, frame: Vec<u8>) -> BridgeResult<()> {
        let writer = self.writer.as_mut().ok_or(BridgeError::ChannelClosed)?;
        writer.write_frame(&frame).await
    }

    async fn close(&mut self) -> BridgeResult<()> {
        // Closing stdin is the child's signal to exit
        self.writer.take();

        if let Some(mut child) = self.child.take() {
            tokio::select! {
                status = child.wait() => {
                    let status = status?;
                    debug!("Bridge child exited with {}", status);
                }
                _ = tokio::time::sleep(Duration::from_secs(CHILD_EXIT_GRACE_SECS)) => {
                    warn!("Bridge child did not exit after {}s, killing it", CHILD_EXIT_GRACE_SECS);
                    child.kill().await.ok();
                }
            }
        }
        Ok(())
    }
}

/// Constructors for length-prefixed stream channels
pub struct StreamTransport;

impl StreamTransport {
    /// Channel over any reader/writer pair
    pub fn new<R, W>(reader: R, writer: W, max_frame: usize) -> Channel
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Channel::new(
            FrameWriter::new(writer, max_frame),
            FrameReader::new(reader, max_frame),
        )
        .with_label("stream")
    }

    /// Channel over an established TCP connection
    pub fn tcp(stream: TcpStream, max_frame: usize) -> Channel {
        let label = stream
            .peer_addr()
            .map(|addr| format!("tcp:{}", addr))
            .unwrap_or_else(|_| "tcp".to_string());
        // Frames are flushed one by one; don't let Nagle hold them back
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, max_frame).with_label(label)
    }

    /// Connect to a listening peer
    pub async fn connect(addr: impl ToSocketAddrs, max_frame: usize) -> BridgeResult<Channel> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::tcp(stream, max_frame))
    }

    /// Accept one peer from a listener
    pub async fn accept(listener: &TcpListener, max_frame: usize) -> BridgeResult<Channel> {
        let (stream, addr) = listener.accept().await?;
        debug!("Accepted bridge peer {}", addr);
        Ok(Self::tcp(stream, max_frame))
    }

    /// Channel over this process's stdin/stdout
    pub fn stdio(max_frame: usize) -> Channel {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), max_frame).with_label("stdio")
    }

    /// Spawn `command` and talk to it over its stdin/stdout
    pub fn spawn(
        command: impl AsRef<str>,
        args: &[impl AsRef<str>],
        max_frame: usize,
    ) -> BridgeResult<Channel> {
        let mut cmd = Command::new(command.as_ref());
        cmd.args(args.iter().map(|a| a.as_ref()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::Io(format!(
                "failed to spawn bridge peer '{}': {}",
                command.as_ref(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Io("failed to get child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Io("failed to get child stdout".into()))?;

        let sink = ChildSink {
            writer: Some(FrameWriter::new(stdin, max_frame)),
            child: Some(child),
        };
        Ok(Channel::new(sink, FrameReader::new(stdout, max_frame))
            .with_label(format!("child:{}", command.as_ref())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1024;

    #[tokio::test]
    async fn test_frames_survive_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let mut writer = FrameWriter::new(client_write, LIMIT);
        let mut reader = FrameReader::new(server_read, LIMIT);
        drop((client_read, server_write));

        let writes = tokio::spawn(async move {
            writer.write_frame(b"hello").await.unwrap();
            writer.write_frame(b"").await.unwrap();
            writer.write_frame(&[7u8; 300]).await.unwrap();
            writer.close().await.unwrap();
        });

        assert_eq!(reader.read_frame().await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(reader.read_frame().await.unwrap(), Some(Vec::new()));
        assert_eq!(reader.read_frame().await.unwrap(), Some(vec![7u8; 300]));
        assert_eq!(reader.read_frame().await.unwrap(), None);
        writes.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_payload_is_framing_error() {
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"short");
        let mut reader = FrameReader::new(&bytes[..], LIMIT);

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, BridgeError::Framing { .. }));
    }

    #[tokio::test]
    async fn test_truncated_prefix_is_framing_error() {
        let bytes = [0u8, 0];
        let mut reader = FrameReader::new(&bytes[..], LIMIT);

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, BridgeError::Framing { .. }));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_framing_error() {
        let bytes = ((LIMIT + 1) as u32).to_be_bytes();
        let mut reader = FrameReader::new(&bytes[..], LIMIT);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));

        let mut writer = FrameWriter::new(Vec::new(), LIMIT);
        let err = writer.write_frame(&vec![0u8; LIMIT + 1]).await.unwrap_err();
        assert!(matches!(err, BridgeError::Framing { .. }));
    }

    #[tokio::test]
    async fn test_writer_prefixes_length() {
        let mut writer = FrameWriter::new(Vec::new(), LIMIT);
        writer.write_frame(b"abc").await.unwrap();
        assert_eq!(writer.writer, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { StreamTransport::accept(&listener, LIMIT).await });
        let client = StreamTransport::connect(addr, LIMIT).await.unwrap();
        let server = accept.await.unwrap().unwrap();
        assert!(client.label().starts_with("tcp:"));

        let (_, mut client_sink, _client_source) = client.into_parts();
        let (_, _server_sink, mut server_source) = server.into_parts();

        client_sink.send(b"ping".to_vec()).await.unwrap();
        client_sink.close().await.unwrap();
        assert_eq!(server_source.receive().await.unwrap(), Some(b"ping".to_vec()));
        assert_eq!(server_source.receive().await.unwrap(), None);
    }
}
