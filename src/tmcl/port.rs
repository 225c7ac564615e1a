// Transport ports: the byte pipe underneath a command channel
//
// A port only moves bytes. Framing, timeouts and correlation live in the
// channel, so a new medium needs nothing more than these methods.
//
// The channel may drop a `receive` future when its timeout fires. Ports must
// not lose bytes they already took off the medium when that happens, or every
// later frame would be misaligned.

use std::future::{Future, poll_fn};
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::Poll;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

use crate::config::{DEFAULT_BAUDRATE, DEFAULT_TIMEOUT_MS};

/// Minimal transport contract consumed by [`CommandChannel`](super::CommandChannel)
pub trait Port: Send {
    /// Write a whole frame
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Fill `buf` completely with received bytes
    fn receive(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Release the medium. Calling it again must be harmless.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Drop received bytes nobody asked for yet, without waiting for more
    fn discard_input(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Port over any async byte stream (TCP bridge, pipe, in-memory duplex)
pub struct StreamPort<S> {
    stream: Option<S>,
    /// Bytes of a frame whose receive was cancelled part way
    partial: Vec<u8>,
}

impl<S> StreamPort<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            partial: Vec::new(),
        }
    }

    fn stream(&mut self) -> io::Result<&mut S> {
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "port closed")
}

impl<S> Port for StreamPort<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let stream = self.stream()?;
        stream.write_all(frame).await?;
        stream.flush().await
    }

    async fn receive(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let Self { stream, partial } = self;
        let stream = stream.as_mut().ok_or_else(not_connected)?;

        // `read` is cancel-safe; `read_exact` is not. Collect into `partial`
        // so a cancelled receive resumes where it stopped.
        while partial.len() < buf.len() {
            let mut chunk = vec![0u8; buf.len() - partial.len()];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed mid-frame",
                ));
            }
            partial.extend_from_slice(&chunk[..n]);
        }

        buf.copy_from_slice(&partial[..buf.len()]);
        partial.drain(..buf.len());
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.partial.clear();
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    async fn discard_input(&mut self) -> io::Result<()> {
        let Self { stream, partial } = self;
        let stream = stream.as_mut().ok_or_else(not_connected)?;
        let mut discarded = partial.len();
        partial.clear();

        let mut scratch = [0u8; 64];
        loop {
            // One poll: bytes already buffered are read, anything else stops the drain
            let read = poll_fn(|cx| {
                let mut read_buf = ReadBuf::new(&mut scratch);
                match Pin::new(&mut *stream).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().len())),
                    Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                    Poll::Pending => Poll::Ready(Ok(0)),
                }
            })
            .await?;
            if read == 0 {
                break;
            }
            discarded += read;
        }

        if discarded > 0 {
            debug!("Discarded {} stale input bytes", discarded);
        }
        Ok(())
    }
}

/// Port over a serial device (USB-CDC, RS-232, RS-485 adapters)
///
/// The `serialport` handle is blocking, so each transfer runs on tokio's
/// blocking pool. The handle is shared with that pool task: if the channel
/// gives up waiting, the task still finishes on the port's own read timeout
/// and hands the lock back.
pub struct SerialTransport {
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
    name: String,
}

impl SerialTransport {
    /// Open a serial port at the default data rate
    pub fn open(port_name: &str) -> Result<Self, serialport::Error> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with a custom data rate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self, serialport::Error> {
        Self::open_with(
            port_name,
            baudrate,
            Duration::from_millis(DEFAULT_TIMEOUT_MS),
        )
    }

    pub fn open_with(
        port_name: &str,
        baudrate: u32,
        timeout: Duration,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baudrate)
            .timeout(timeout)
            .open()?;
        debug!("Opened serial port {} at {} baud", port_name, baudrate);

        Ok(Self {
            port: Some(Arc::new(Mutex::new(port))),
            name: port_name.to_string(),
        })
    }

    /// Names of the serial ports present on this machine
    pub fn available() -> Result<Vec<String>, serialport::Error> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|info| info.port_name)
            .collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self) -> io::Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

fn lock_poisoned() -> io::Error {
    io::Error::other("serial port lock poisoned")
}

impl Port for SerialTransport {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let handle = self.handle()?;
        let frame = frame.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut port = handle.lock().map_err(|_| lock_poisoned())?;
            port.write_all(&frame)?;
            port.flush()
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn receive(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let handle = self.handle()?;
        let len = buf.len();
        let bytes = tokio::task::spawn_blocking(move || {
            let mut port = handle.lock().map_err(|_| lock_poisoned())?;
            let mut bytes = vec![0u8; len];
            port.read_exact(&mut bytes)?;
            Ok::<_, io::Error>(bytes)
        })
        .await
        .map_err(io::Error::other)??;

        buf.copy_from_slice(&bytes);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.name);
        }
        Ok(())
    }

    async fn discard_input(&mut self) -> io::Result<()> {
        let handle = self.handle()?;
        tokio::task::spawn_blocking(move || {
            let port = handle.lock().map_err(|_| lock_poisoned())?;
            port.clear(ClearBuffer::Input)?;
            Ok::<_, io::Error>(())
        })
        .await
        .map_err(io::Error::other)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_port_moves_bytes() {
        let (host, mut device) = tokio::io::duplex(64);
        let mut port = StreamPort::new(host);

        port.send(&[1, 2, 3]).await.unwrap();
        let mut seen = [0u8; 3];
        device.read_exact(&mut seen).await.unwrap();
        assert_eq!(seen, [1, 2, 3]);

        device.write_all(&[9, 8]).await.unwrap();
        let mut reply = [0u8; 2];
        port.receive(&mut reply).await.unwrap();
        assert_eq!(reply, [9, 8]);
    }

    #[tokio::test]
    async fn test_stream_port_close_is_idempotent() {
        let (host, _device) = tokio::io::duplex(64);
        let mut port = StreamPort::new(host);

        port.close().await.unwrap();
        port.close().await.unwrap();

        let err = port.send(&[0]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_discard_input_drops_buffered_bytes() {
        let (host, mut device) = tokio::io::duplex(64);
        let mut port = StreamPort::new(host);

        device.write_all(&[0xAA; 13]).await.unwrap();
        port.discard_input().await.unwrap();
        // Nothing buffered: returns at once
        port.discard_input().await.unwrap();

        device.write_all(&[1, 2, 3]).await.unwrap();
        let mut buf = [0u8; 3];
        port.receive(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cancelled_receive_keeps_partial_frame() {
        let (host, mut device) = tokio::io::duplex(64);
        let mut port = StreamPort::new(host);

        device.write_all(&[1, 2, 3, 4]).await.unwrap();
        let mut buf = [0u8; 9];
        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), port.receive(&mut buf)).await;
        assert!(cancelled.is_err());

        device.write_all(&[5, 6, 7, 8, 9]).await.unwrap();
        port.receive(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_stream_port_reports_eof() {
        let (host, device) = tokio::io::duplex(64);
        let mut port = StreamPort::new(host);
        drop(device);

        let mut buf = [0u8; 9];
        let err = port.receive(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
