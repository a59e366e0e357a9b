//! Frame sockets and the stream handshake.

use crate::*;
use bytes::Bytes;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use syzygy_api::{SzgError, SzgResult};

/// Largest dictionary a handshake may announce.
pub const MAX_DICTIONARY_LEN: usize = 1024 * 1024;

/// Default for [FrameStreamReader::with_max_frame_len].
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Read exactly `len` bytes, growing the buffer as data actually
/// arrives instead of trusting `len` up front.
fn read_len<R: Read>(
    r: &mut R,
    len: usize,
    out: &mut Vec<u8>,
) -> SzgResult<()> {
    let want = out.len() + len;
    r.by_ref().take(len as u64).read_to_end(out)?;
    if out.len() != want {
        return Err(std::io::Error::from(
            std::io::ErrorKind::UnexpectedEof,
        )
        .into());
    }
    Ok(())
}

/// Identifies a socket within one [DataServer].
pub type SocketId = u64;

/// A connection frames can be written to.
pub trait FrameSocket: 'static + Send + Sync + std::fmt::Debug {
    /// This socket's id.
    fn id(&self) -> SocketId;

    /// Write one whole frame.
    fn write_frame(&self, frame: &[u8]) -> std::io::Result<()>;
}

/// Trait-object [FrameSocket].
pub type DynFrameSocket = Arc<dyn FrameSocket>;

/// A [FrameSocket] over tcp.
#[derive(Debug)]
pub struct TcpFrameSocket {
    id: SocketId,
    peer: SocketAddr,
    stream: Mutex<TcpStream>,
}

impl TcpFrameSocket {
    /// Wrap a connected stream.
    pub fn new(id: SocketId, stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            id,
            peer,
            stream: Mutex::new(stream),
        })
    }

    /// The remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl FrameSocket for TcpFrameSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn write_frame(&self, frame: &[u8]) -> std::io::Result<()> {
        let mut stream = self.stream.lock().unwrap();
        stream.write_all(frame)?;
        stream.flush()
    }
}

/// Sent once, first thing on every data connection.
///
/// ```text
/// [u8 byte_order_tag][u32 dictionary_len][dictionary json]
/// ```
///
/// `dictionary_len` is in the announced byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// The sender's byte order.
    pub byte_order: ByteOrder,

    /// The record dictionary frames are encoded against.
    pub dictionary: serde_json::Value,
}

impl StreamConfig {
    /// A config announcing this machine's byte order.
    pub fn native(dictionary: serde_json::Value) -> Self {
        Self {
            byte_order: ByteOrder::native(),
            dictionary,
        }
    }

    /// Encode the handshake.
    pub fn encode(&self) -> SzgResult<Bytes> {
        let dict = serde_json::to_vec(&self.dictionary)
            .map_err(|e| SzgError::other_src("encode dictionary", e))?;
        let mut out = Vec::with_capacity(5 + dict.len());
        out.push(self.byte_order.tag());
        out.extend_from_slice(&self.byte_order.write_u32(dict.len() as u32));
        out.extend_from_slice(&dict);
        Ok(out.into())
    }

    /// Read a handshake off a stream.
    pub fn read_from<R: Read>(r: &mut R) -> SzgResult<Self> {
        let mut tag = [0_u8; 1];
        r.read_exact(&mut tag)?;
        let byte_order = ByteOrder::from_tag(tag[0]).ok_or_else(|| {
            SzgError::other(format!("unknown byte order tag {}", tag[0]))
        })?;

        let mut len = [0_u8; 4];
        r.read_exact(&mut len)?;
        let len = byte_order.read_u32(len) as usize;
        if len > MAX_DICTIONARY_LEN {
            return Err(SzgError::other(format!(
                "dictionary of {len} bytes is over {MAX_DICTIONARY_LEN}"
            )));
        }

        let mut dict = Vec::new();
        read_len(r, len, &mut dict)?;
        let dictionary = serde_json::from_slice(&dict)
            .map_err(|e| SzgError::other_src("decode dictionary", e))?;

        Ok(Self {
            byte_order,
            dictionary,
        })
    }
}

/// The receiving end of a frame stream.
#[derive(Debug)]
pub struct FrameStreamReader<R> {
    inner: R,
    config: StreamConfig,
    max_frame_len: usize,
}

impl FrameStreamReader<TcpStream> {
    /// Connect to a listening [SyncDataServer] and read its handshake.
    pub fn connect(addr: SocketAddr) -> SzgResult<Self> {
        Self::new(TcpStream::connect(addr)?)
    }
}

impl<R: Read> FrameStreamReader<R> {
    /// Read the handshake off `inner`.
    pub fn new(mut inner: R) -> SzgResult<Self> {
        let config = StreamConfig::read_from(&mut inner)?;
        tracing::debug!(byte_order = ?config.byte_order, "stream handshake");
        Ok(Self {
            inner,
            config,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        })
    }

    /// Refuse frames announcing more than `max_frame_len` bytes.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// The sender's handshake.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Read the next whole frame. `None` on a clean end of stream.
    pub fn read_frame(&mut self) -> SzgResult<Option<Bytes>> {
        let mut total = [0_u8; 4];
        match self.inner.read_exact(&mut total) {
            Ok(()) => (),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        }

        let len = self.config.byte_order.read_u32(total) as usize;
        if len < FRAME_HEADER_LEN {
            return Err(SzgError::other(format!(
                "frame length {len} too short"
            )));
        }
        if len > self.max_frame_len {
            return Err(SzgError::other(format!(
                "frame length {len} over {}",
                self.max_frame_len
            )));
        }

        let mut frame = total.to_vec();
        read_len(&mut self.inner, len - total.len(), &mut frame)?;
        Ok(Some(frame.into()))
    }

    /// Read the next frame and split it into records.
    pub fn read_records(&mut self) -> SzgResult<Option<Vec<Bytes>>> {
        match self.read_frame()? {
            None => Ok(None),
            Some(frame) => {
                decode_frame(&frame, self.config.byte_order).map(Some)
            }
        }
    }
}
