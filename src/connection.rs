// ABOUTME: Frame-based I/O over any async byte stream for SMPP v3.4 sessions
// ABOUTME: Buffered reads with incremental parsing, plus split halves for concurrent read/write

use crate::codec::{CodecError, Encodable, Frame};
use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};

const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Transport layer for one SMPP session.
///
/// `Connection` moves whole PDUs in and out of a stream; it does not track
/// the bind state machine. Sessions that read and write from different tasks
/// call [`Connection::into_split`] and keep the halves apart.
#[derive(Debug)]
pub struct Connection<S> {
    stream: BufWriter<S>,
    buffer: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(socket: S) -> Connection<S> {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Read a single frame, waiting until enough bytes have arrived.
    ///
    /// Returns `None` when the peer closed cleanly between frames. A close in
    /// the middle of a frame is a "connection reset by peer" error.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        loop {
            if let Some(frame) = parse_frame(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return closed(&self.buffer);
            }
        }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), CodecError> {
        let bytes = frame.to_bytes()?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn write_pdu<T: Encodable>(&mut self, pdu: &T) -> Result<(), CodecError> {
        let bytes = pdu.to_bytes()?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Split into independently owned read and write halves.
    ///
    /// Bytes already buffered for reading move to the reader.
    pub fn into_split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        let (read, write) = tokio::io::split(self.stream.into_inner());
        (
            FrameReader {
                reader: read,
                buffer: self.buffer,
            },
            FrameWriter {
                stream: BufWriter::new(write),
            },
        )
    }
}

/// Read half of a split [`Connection`]
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        loop {
            if let Some(frame) = parse_frame(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return closed(&self.buffer);
            }
        }
    }
}

/// Write half of a split [`Connection`]
#[derive(Debug)]
pub struct FrameWriter<W> {
    stream: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            stream: BufWriter::new(writer),
        }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), CodecError> {
        let bytes = frame.to_bytes()?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn write_pdu<T: Encodable>(&mut self, pdu: &T) -> Result<(), CodecError> {
        let bytes = pdu.to_bytes()?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Flush and close the write direction
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

/// Parse one frame from the front of `buffer` and discard its bytes.
///
/// `Ok(None)` means more data is needed. Any other error leaves the stream
/// unsynchronised and the caller must drop the connection.
fn parse_frame(buffer: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    let mut buf = Cursor::new(&buffer[..]);

    match Frame::check(&mut buf) {
        Ok(len) => {
            let frame = Frame::parse(&mut buf)?;
            buffer.advance(len);
            Ok(Some(frame))
        }
        Err(CodecError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

fn closed(buffer: &BytesMut) -> Result<Option<Frame>, CodecError> {
    if buffer.is_empty() {
        Ok(None)
    } else {
        Err(CodecError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }
}
