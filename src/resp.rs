//! RESP2 wire codec: decodes one multibulk array of bulk strings per request,
//! and encodes the reply shapes the dispatcher produces.
//!
//! The decoder follows the `BufSplit`-over-`BytesMut` technique (find a
//! `\r\n`-terminated word with `memchr`, remember its offsets, only copy out
//! bytes once a full frame is known to be present): an incomplete frame
//! yields `Ok(None)` and leaves the buffer untouched for the next read. The
//! connection loop drives `decode`/`encode` directly rather than wrapping
//! the socket in a `Framed` transport, so it can drain every already-buffered
//! frame before issuing another read.

use crate::error::ProtocolError;
use bytes::{Bytes, BytesMut};
use memchr::memchr;
use tokio_util::codec::{Decoder, Encoder};

/// A decoded client request: the ordered bulk-string arguments of one command.
pub type Request = Vec<Bytes>;

/// A reply value the dispatcher hands back to the connection loop for encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(Bytes),
    Error(String),
    Int(i64),
    Bulk(Bytes),
    NullBulk,
    Array(Vec<Reply>),
}

impl Reply {
    pub fn simple(s: impl Into<Bytes>) -> Self {
        Reply::Simple(s.into())
    }

    pub fn bulk(s: impl Into<Bytes>) -> Self {
        Reply::Bulk(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }
}

struct BufSplit(usize, usize);

impl BufSplit {
    fn as_slice<'a>(&self, buf: &'a BytesMut) -> &'a [u8] {
        &buf[self.0..self.1]
    }

    fn as_bytes(&self, buf: &Bytes) -> Bytes {
        buf.slice(self.0..self.1)
    }
}

/// Finds the `\r\n`-terminated word starting at `pos`. Returns the offset just
/// past the terminator and the span of the word itself, or `None` if the
/// buffer doesn't yet contain a full line.
fn word(buf: &BytesMut, pos: usize) -> Option<(usize, BufSplit)> {
    if buf.len() <= pos {
        return None;
    }
    memchr(b'\r', &buf[pos..]).and_then(|rel| {
        let end = pos + rel;
        if end + 1 < buf.len() {
            Some((end + 2, BufSplit(pos, end)))
        } else {
            None
        }
    })
}

/// Parses a non-negative decimal integer (no sign, no leading/trailing junk).
fn non_negative_decimal(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

type FrameResult = Result<Option<(usize, Vec<BufSplit>)>, ProtocolError>;

/// Decodes one `*<N>\r\n ( $<Li>\r\n <Li bytes>\r\n )^N` frame starting at byte 0.
fn decode_frame(buf: &BytesMut) -> FrameResult {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != b'*' {
        return Err(ProtocolError::InvalidMultibulkLength);
    }

    let Some((mut pos, count_word)) = word(buf, 1) else {
        return Ok(None);
    };
    let count = non_negative_decimal(count_word.as_slice(buf))
        .ok_or(ProtocolError::InvalidMultibulkLength)?;

    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let Some((after_len, len_word)) = word(buf, pos) else {
            return Ok(None);
        };
        if len_word.as_slice(buf).first() != Some(&b'$') {
            return Err(ProtocolError::InvalidMultibulkFormat);
        }
        let len = non_negative_decimal(&len_word.as_slice(buf)[1..])
            .ok_or(ProtocolError::InvalidMultibulkFormat)?;

        let data_start = after_len;
        let data_end = data_start + len as usize;
        if buf.len() < data_end + 2 {
            return Ok(None);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(ProtocolError::InvalidMultibulkFormat);
        }

        args.push(BufSplit(data_start, data_end));
        pos = data_end + 2;
    }

    Ok(Some((pos, args)))
}

#[derive(Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = Request;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_frame(buf)? {
            Some((consumed, splits)) => {
                let frame = buf.split_to(consumed).freeze();
                Ok(Some(splits.into_iter().map(|s| s.as_bytes(&frame)).collect()))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Reply> for RespCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_reply(&item, dst);
        Ok(())
    }
}

fn encode_reply(item: &Reply, dst: &mut BytesMut) {
    match item {
        Reply::Simple(s) => {
            dst.extend_from_slice(b"+");
            dst.extend_from_slice(s);
            dst.extend_from_slice(b"\r\n");
        }
        Reply::Error(e) => {
            dst.extend_from_slice(b"-");
            dst.extend_from_slice(e.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
        Reply::Int(n) => {
            dst.extend_from_slice(b":");
            dst.extend_from_slice(n.to_string().as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(b) => {
            dst.extend_from_slice(b"$");
            dst.extend_from_slice(b.len().to_string().as_bytes());
            dst.extend_from_slice(b"\r\n");
            dst.extend_from_slice(b);
            dst.extend_from_slice(b"\r\n");
        }
        Reply::NullBulk => dst.extend_from_slice(b"$-1\r\n"),
        Reply::Array(items) => {
            dst.extend_from_slice(b"*");
            dst.extend_from_slice(items.len().to_string().as_bytes());
            dst.extend_from_slice(b"\r\n");
            for item in items {
                encode_reply(item, dst);
            }
        }
    }
}
