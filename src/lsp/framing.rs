//! Content-Length framing for LSP byte streams.
//!
//! Every LSP message travels as `Content-Length: <n>\r\n\r\n<body>` where
//! `n` is the byte length of the UTF-8 body. The decoder is incremental:
//! feed it chunks as they arrive and drain complete frames, regardless of
//! where read boundaries fall.

use bytes::{Buf, BytesMut};

/// Encode a JSON body into a single framed message.
pub fn encode_frame(body: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body.as_bytes());
    out
}

/// Incremental decoder for a stream of framed messages.
///
/// Bytes consumed by a yielded frame (or dropped as garbage) are advanced
/// out of the buffer and never re-scanned. Incomplete input stalls safely:
/// `next_frame` returns `None` until more bytes arrive.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly-read bytes to the internal buffer.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pull the next complete message body, if one is buffered.
    ///
    /// A header block without a parseable `Content-Length` is dropped and
    /// scanning continues after it, so one corrupt frame cannot wedge the
    /// stream.
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let headers_end = find_headers_end(&self.buf)?;

            let Some(content_length) = parse_content_length(&self.buf[..headers_end]) else {
                tracing::warn!("Dropping {headers_end} bytes with no parseable Content-Length");
                self.buf.advance(headers_end);
                continue;
            };

            if self.buf.len() < headers_end + content_length {
                // Body not fully buffered yet.
                return None;
            }

            self.buf.advance(headers_end);
            let body = self.buf.split_to(content_length);
            match String::from_utf8(body.to_vec()) {
                Ok(s) => return Some(s),
                Err(e) => {
                    tracing::warn!("Dropping frame with invalid UTF-8 body: {e}");
                    continue;
                }
            }
        }
    }

}

/// Find the end of the header block (index just past `\r\n\r\n`).
fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Scan a header block for a `Content-Length` value (case-insensitive).
fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(headers).ok()?;
    for line in text.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}
