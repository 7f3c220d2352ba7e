//! Turning the device byte stream into frame texts.

use serde::de::IgnoredAny;
use tracing::{trace, warn};

use crate::config::{FramingMode, LinkConfig};

/// Splits raw reads into frame texts.
#[derive(Debug)]
pub enum Framer {
    /// Each non-empty read is one frame.
    Chunk,
    /// Complete top-level JSON objects, reassembled across reads.
    Json(JsonFramer),
}

impl Framer {
    /// Build the framer selected by the link configuration.
    #[must_use]
    pub fn from_config(config: &LinkConfig) -> Self {
        match config.framing {
            FramingMode::Chunk => Self::Chunk,
            FramingMode::Json => Self::Json(JsonFramer::new(config.max_frame_bytes)),
        }
    }

    /// Feed one read and collect every frame it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        match self {
            Self::Chunk => {
                let text = String::from_utf8_lossy(bytes);
                let text = text.trim();
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![text.to_string()]
                }
            }
            Self::Json(framer) => framer.push(bytes),
        }
    }
}

/// Splitter for concatenated JSON objects.
///
/// Each object is delimited by `serde_json`'s stream deserializer. Bytes
/// before an object start are discarded, as is any object that fails to
/// parse. An object that grows past `max_frame_bytes` is dropped and the
/// rest of it is skipped without buffering.
#[derive(Debug)]
pub struct JsonFramer {
    buf: Vec<u8>,
    skip: Option<Skip>,
    max_frame_bytes: usize,
    dropped: u64,
}

impl JsonFramer {
    /// Create a splitter that drops objects larger than `max_frame_bytes`.
    #[must_use]
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            skip: None,
            max_frame_bytes,
            dropped: 0,
        }
    }

    /// Number of oversized objects discarded so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Bytes of the object currently being assembled.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Feed one read and collect every object it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();
        let mut input = bytes;

        if let Some(skip) = &mut self.skip {
            match skip.advance(input) {
                Some(consumed) => {
                    self.skip = None;
                    self.dropped += 1;
                    input = &input[consumed..];
                }
                None => return frames,
            }
        }
        self.buf.extend_from_slice(input);

        loop {
            match self.buf.iter().position(|&b| b == b'{') {
                Some(0) => {}
                Some(start) => self.discard(start),
                None => {
                    let len = self.buf.len();
                    self.discard(len);
                    break;
                }
            }

            let mut stream =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<IgnoredAny>();
            match stream.next() {
                Some(Ok(_)) => {
                    let end = stream.byte_offset();
                    if end > self.max_frame_bytes {
                        warn!(
                            limit = self.max_frame_bytes,
                            size = end,
                            "Frame exceeds size limit, dropping"
                        );
                        self.dropped += 1;
                    } else {
                        frames.push(String::from_utf8_lossy(&self.buf[..end]).into_owned());
                    }
                    self.buf.drain(..end);
                }
                Some(Err(e)) if e.is_eof() => {
                    if self.buf.len() > self.max_frame_bytes {
                        warn!(
                            limit = self.max_frame_bytes,
                            "Frame exceeds size limit, dropping"
                        );
                        let mut skip = Skip::default();
                        if skip.advance(&self.buf).is_some() {
                            self.dropped += 1;
                        } else {
                            self.skip = Some(skip);
                        }
                        self.buf.clear();
                    }
                    break;
                }
                Some(Err(e)) => {
                    trace!(error = %e, "Discarding malformed object");
                    self.buf.drain(..1);
                }
                None => break,
            }
        }

        frames
    }

    fn discard(&mut self, n: usize) {
        if self.buf[..n].iter().any(|b| !b.is_ascii_whitespace()) {
            trace!(bytes = n, "Discarding bytes outside frame");
        }
        self.buf.drain(..n);
    }
}

/// Position inside an object being skipped. Quotes and escapes are tracked
/// so braces inside string values do not count.
#[derive(Debug, Default)]
struct Skip {
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Skip {
    /// Consume bytes until the object closes. Returns the offset just past
    /// the closing brace, or `None` if `bytes` ends inside the object.
    fn advance(&mut self, bytes: &[u8]) -> Option<usize> {
        for (i, &b) in bytes.iter().enumerate() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        None
    }
}
