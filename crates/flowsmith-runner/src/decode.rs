//! Line framing for child process output.
//!
//! Output is decoded as UTF-8; undecodable bytes become U+FFFD and the line is
//! flagged so the run can report it. Decoding never fails.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use flowsmith_core::error::RunnerError;
use flowsmith_core::OutputStream;

/// Lines longer than this are emitted in pieces.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine {
    pub text: String,
    /// Some bytes were replaced.
    pub degraded: bool,
}

impl DecodedLine {
    fn from_bytes(raw: &[u8]) -> Self {
        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        match std::str::from_utf8(raw) {
            Ok(text) => Self {
                text: text.to_string(),
                degraded: false,
            },
            Err(_) => Self {
                text: String::from_utf8_lossy(raw).into_owned(),
                degraded: true,
            },
        }
    }
}

/// Splits a byte stream on `\n` without requiring valid UTF-8.
#[derive(Debug, Clone)]
pub struct LossyLinesCodec {
    // Bytes already scanned for a newline.
    scanned: usize,
    max_length: usize,
}

impl LossyLinesCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            scanned: 0,
            max_length: max_length.max(1),
        }
    }
}

impl Default for LossyLinesCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LossyLinesCodec {
    type Item = DecodedLine;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<DecodedLine>, Self::Error> {
        let window = buf.len().min(self.max_length);
        let start = self.scanned.min(window);
        let newline = buf[start..window].iter().position(|b| *b == b'\n');
        if let Some(offset) = newline {
            let end = start + offset + 1;
            self.scanned = 0;
            let line = buf.split_to(end);
            return Ok(Some(DecodedLine::from_bytes(&line)));
        }
        if buf.len() >= self.max_length {
            self.scanned = 0;
            let mut cut = self.max_length;
            // Keep a multi-byte sequence together when the cut lands inside one.
            while cut > 0 && cut < buf.len() && (buf[cut] & 0xC0) == 0x80 {
                cut -= 1;
            }
            if cut == 0 {
                cut = self.max_length;
            }
            let piece = buf.split_to(cut);
            return Ok(Some(DecodedLine::from_bytes(&piece)));
        }
        self.scanned = window;
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<DecodedLine>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.scanned = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split_to(buf.len());
        Ok(Some(DecodedLine::from_bytes(&rest)))
    }
}

/// The degradation record for a stream, if any chunk was replaced.
pub fn degradation(stream: OutputStream, chunks: usize) -> Option<RunnerError> {
    (chunks > 0).then_some(RunnerError::DecodeDegradation { stream, chunks })
}
