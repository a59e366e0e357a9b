//! Double-buffered frame queue and the frame codec.
//!
//! A frame is laid out as:
//!
//! ```text
//! [u32 total_len][u32 record_count] ([u32 record_len][record bytes])*
//! ```
//!
//! where `total_len` includes the 8 byte header. Integers are written in
//! the sender's native byte order; the receiver learns that order from
//! the stream handshake.

use bytes::{BufMut, Bytes, BytesMut};
use syzygy_api::{SzgError, SzgResult};

/// Size of the frame header.
pub const FRAME_HEADER_LEN: usize = 8;

/// Size of the per-record length prefix.
const RECORD_HEADER_LEN: usize = 4;

/// The largest frame the u32 header can describe.
pub const MAX_FRAME_LEN: usize = u32::MAX as usize;

/// Byte order of the integers in a frame stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ByteOrder {
    /// Least significant byte first.
    Little,

    /// Most significant byte first.
    Big,
}

impl ByteOrder {
    /// The byte order of this machine.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    /// One byte wire tag.
    pub fn tag(self) -> u8 {
        match self {
            Self::Little => 0,
            Self::Big => 1,
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Little),
            1 => Some(Self::Big),
            _ => None,
        }
    }

    /// Read a u32 in this byte order.
    pub fn read_u32(self, b: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(b),
            Self::Big => u32::from_be_bytes(b),
        }
    }

    /// Encode a u32 in this byte order.
    pub fn write_u32(self, v: u32) -> [u8; 4] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }
}

/// A frame under construction.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    count: u32,
    limit: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// An empty frame.
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_LEN)
    }

    /// An empty frame that refuses to grow past `limit` bytes (capped
    /// at [MAX_FRAME_LEN]).
    pub fn with_limit(limit: usize) -> Self {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_bytes(0, FRAME_HEADER_LEN);
        Self {
            buf,
            count: 0,
            limit: limit.clamp(FRAME_HEADER_LEN, MAX_FRAME_LEN),
        }
    }

    /// Append one record. A record that would take the frame past its
    /// limit is rejected and the frame is left untouched.
    pub fn push_record(&mut self, record: &[u8]) -> SzgResult<()> {
        self.buf
            .len()
            .checked_add(RECORD_HEADER_LEN + record.len())
            .filter(|grown| *grown <= self.limit)
            .ok_or_else(|| {
                SzgError::other(format!(
                    "record of {} bytes does not fit in a {} byte frame",
                    record.len(),
                    self.limit
                ))
            })?;

        // the frame stays within MAX_FRAME_LEN, so the length fits a u32
        self.buf.put_u32_ne(record.len() as u32);
        self.buf.put_slice(record);
        self.count += 1;
        Ok(())
    }

    /// Encoded size so far, header included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if no records have been pushed.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of records pushed.
    pub fn record_count(&self) -> usize {
        self.count as usize
    }

    /// Seal the frame and reset this buffer for the next one.
    pub fn finish(&mut self) -> Bytes {
        // push_record keeps the frame within MAX_FRAME_LEN
        let total = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&total.to_ne_bytes());
        self.buf[4..8].copy_from_slice(&self.count.to_ne_bytes());
        let out = self.buf.split().freeze();
        self.buf.put_bytes(0, FRAME_HEADER_LEN);
        self.count = 0;
        out
    }
}

/// The producer fills the back buffer while the front buffer is sent.
///
/// [QueuedData::swap_buffers] is the only hand-off point. The caller
/// serializes it with producer writes (one lock around the queue).
#[derive(Debug)]
pub struct QueuedData {
    front: Bytes,
    back: FrameBuffer,
}

impl Default for QueuedData {
    fn default() -> Self {
        Self::new()
    }
}

impl QueuedData {
    /// Both buffers empty.
    pub fn new() -> Self {
        Self {
            front: FrameBuffer::new().finish(),
            back: FrameBuffer::new(),
        }
    }

    /// Append a record to the back buffer.
    pub fn queue_record(&mut self, record: &[u8]) -> SzgResult<()> {
        self.back.push_record(record)
    }

    /// Bytes in the back buffer, header included.
    pub fn back_buffer_size(&self) -> usize {
        self.back.len()
    }

    /// Records in the back buffer.
    pub fn back_buffer_records(&self) -> usize {
        self.back.record_count()
    }

    /// Seal the back buffer as the new front frame and start an empty
    /// back buffer.
    pub fn swap_buffers(&mut self) {
        self.front = self.back.finish();
    }

    /// The frame being sent.
    pub fn front_buffer(&self) -> Bytes {
        self.front.clone()
    }

    /// Bytes in the front frame, header included.
    pub fn front_buffer_size(&self) -> usize {
        self.front.len()
    }
}

fn take4(frame: &[u8], at: usize) -> SzgResult<[u8; 4]> {
    frame
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| SzgError::other(format!("frame truncated at {at}")))
}

/// Split a frame into its records.
pub fn decode_frame(frame: &Bytes, order: ByteOrder) -> SzgResult<Vec<Bytes>> {
    let total = order.read_u32(take4(frame, 0)?) as usize;
    if total != frame.len() {
        return Err(SzgError::other(format!(
            "frame header says {total} bytes, got {}",
            frame.len()
        )));
    }
    let count = order.read_u32(take4(frame, 4)?) as usize;

    let mut out = Vec::with_capacity(count);
    let mut at = FRAME_HEADER_LEN;
    for _ in 0..count {
        let len = order.read_u32(take4(frame, at)?) as usize;
        at += RECORD_HEADER_LEN;
        if at + len > frame.len() {
            return Err(SzgError::other(format!(
                "record of {len} bytes overruns frame at {at}"
            )));
        }
        out.push(frame.slice(at..at + len));
        at += len;
    }

    if at != frame.len() {
        return Err(SzgError::other("trailing bytes after last record"));
    }

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn swap_seals_back_and_resets() {
        let mut q = QueuedData::new();
        assert_eq!(FRAME_HEADER_LEN, q.front_buffer_size());
        assert_eq!(FRAME_HEADER_LEN, q.back_buffer_size());

        q.queue_record(b"hello").unwrap();
        q.queue_record(b"").unwrap();
        assert_eq!(FRAME_HEADER_LEN + 4 + 5 + 4, q.back_buffer_size());
        assert_eq!(2, q.back_buffer_records());

        q.swap_buffers();
        assert_eq!(FRAME_HEADER_LEN, q.back_buffer_size());
        assert_eq!(FRAME_HEADER_LEN + 13, q.front_buffer_size());

        let recs =
            decode_frame(&q.front_buffer(), ByteOrder::native()).unwrap();
        assert_eq!(
            vec![b"hello".to_vec(), Vec::new()],
            recs.iter().map(|r| r.to_vec()).collect::<Vec<_>>()
        );

        // an idle swap produces an empty frame
        q.swap_buffers();
        assert!(decode_frame(&q.front_buffer(), ByteOrder::native())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn foreign_byte_order_decodes() {
        let other = match ByteOrder::native() {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        };

        let mut raw = Vec::new();
        raw.extend_from_slice(&other.write_u32(8 + 4 + 3));
        raw.extend_from_slice(&other.write_u32(1));
        raw.extend_from_slice(&other.write_u32(3));
        raw.extend_from_slice(b"abc");

        let recs = decode_frame(&Bytes::from(raw), other).unwrap();
        assert_eq!(1, recs.len());
        assert_eq!(&b"abc"[..], &recs[0][..]);
    }

    #[test]
    fn corrupt_frames_are_rejected() {
        let mut f = FrameBuffer::new();
        f.push_record(b"abcdef").unwrap();
        let good = f.finish();
        let order = ByteOrder::native();

        assert!(decode_frame(&good.slice(..good.len() - 1), order).is_err());
        assert!(decode_frame(&Bytes::from_static(b"\x01\x02"), order).is_err());

        let mut lying = good.to_vec();
        lying[8..12].copy_from_slice(&100u32.to_ne_bytes());
        assert!(decode_frame(&Bytes::from(lying), order).is_err());
    }

    #[test]
    fn oversized_record_is_rejected_whole() {
        let mut f = FrameBuffer::with_limit(20);
        f.push_record(b"12345").unwrap();
        assert_eq!(17, f.len());

        assert!(f.push_record(b"6789").is_err());
        assert_eq!(17, f.len());
        assert_eq!(1, f.record_count());

        let frame = f.finish();
        let recs = decode_frame(&frame, ByteOrder::native()).unwrap();
        assert_eq!(1, recs.len());
        assert_eq!(&b"12345"[..], &recs[0][..]);

        // a fresh frame starts from the limit again
        f.push_record(b"6789").unwrap();
    }

    #[test]
    fn byte_order_tags() {
        for o in [ByteOrder::Little, ByteOrder::Big] {
            assert_eq!(Some(o), ByteOrder::from_tag(o.tag()));
            assert_eq!(0x01020304, o.read_u32(o.write_u32(0x01020304)));
        }
        assert_eq!(None, ByteOrder::from_tag(7));
    }
}
