//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks; only complete lines are decoded, so a
//! multi-byte character split across two chunks is never mangled.

use serde_json::json;

use crate::logging::{log, obj, Domain, Level};

/// Longest partial line held while waiting for a newline.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Where one frame ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Standard SSE: `data:` lines accumulate until an empty line.
    BlankLine,
    /// Every `data:` line is a frame on its own.
    Line,
}

impl Framing {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blank" | "blankline" | "blank_line" | "event" => Some(Framing::BlankLine),
            "line" => Some(Framing::Line),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buf: Vec<u8>,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
            event: None,
            id: None,
            data: Vec::new(),
        }
    }

    /// Feed a chunk and collect every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            self.process_line(&line, &mut out);
        }
        if self.buf.len() > MAX_PENDING_BYTES {
            log(
                Level::Warn,
                Domain::Stream,
                "line_too_long",
                obj(&[("pending_bytes", json!(self.buf.len()))]),
            );
            self.reset();
        }
        out
    }

    /// Bytes held back waiting for a newline.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial line and frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.event = None;
        self.id = None;
        self.data.clear();
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<Frame>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        // Comment / keep-alive
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(i) => {
                let v = &line[i + 1..];
                (&line[..i], v.strip_prefix(' ').unwrap_or(v))
            }
            None => (line, ""),
        };

        match field {
            "data" => match self.framing {
                Framing::Line => {
                    let data = value.trim();
                    if !data.is_empty() {
                        out.push(Frame {
                            event: self.event.clone(),
                            id: self.id.clone(),
                            data: data.to_string(),
                        });
                    }
                }
                Framing::BlankLine => self.data.push(value.to_string()),
            },
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self, out: &mut Vec<Frame>) {
        let event = self.event.take();
        if self.data.is_empty() {
            return;
        }
        let data = self.data.join("\n");
        self.data.clear();
        out.push(Frame {
            event,
            id: self.id.clone(),
            data,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line_frames() {
        let mut d = FrameDecoder::new(Framing::BlankLine);
        let frames = d.push(b"event: status\ndata: {\"battPct\":80}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("status"));
        assert_eq!(frames[0].data, "{\"battPct\":80}");
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut d = FrameDecoder::new(Framing::BlankLine);
        assert!(d.push(b"data: hel").is_empty());
        assert!(d.pending_bytes() > 0);
        assert!(d.push(b"lo\r\n").is_empty());
        let frames = d.push(b"\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "hello");
        assert_eq!(d.pending_bytes(), 0);
    }

    #[test]
    fn test_multi_data_lines_joined() {
        let mut d = FrameDecoder::new(Framing::BlankLine);
        let frames = d.push(b"data: a\ndata: b\n\n");
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn test_utf8_split_is_preserved() {
        let mut d = FrameDecoder::new(Framing::Line);
        let text = "data: caf\u{e9}\n".as_bytes();
        let (a, b) = text.split_at(10);
        assert!(d.push(a).is_empty());
        let frames = d.push(b);
        assert_eq!(frames[0].data, "caf\u{e9}");
    }

    #[test]
    fn test_line_mode_emits_per_data_line() {
        let mut d = FrameDecoder::new(Framing::Line);
        let frames = d.push(b"data: one\ndata:   two  \ndata:\n");
        let data: Vec<&str> = frames.iter().map(|f| f.data.as_str()).collect();
        assert_eq!(data, vec!["one", "two"]);
    }

    #[test]
    fn test_comments_and_empty_frames_ignored() {
        let mut d = FrameDecoder::new(Framing::BlankLine);
        let frames = d.push(b":ok\n\nevent: x\n\ndata: y\n\n");
        assert_eq!(frames.len(), 1);
        // event name is reset by the empty frame
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[0].data, "y");
    }

    #[test]
    fn test_overlong_line_is_dropped() {
        let mut d = FrameDecoder::new(Framing::BlankLine);
        assert!(d.push(b"data: kept\n").is_empty());
        let junk = vec![b'x'; MAX_PENDING_BYTES + 1];
        assert!(d.push(&junk).is_empty());
        assert_eq!(d.pending_bytes(), 0);
        // the partial frame went with it; decoding resumes cleanly
        let frames = d.push(b"\ndata: next\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "next");
    }

    #[test]
    fn test_framing_parse() {
        assert_eq!(Framing::parse("line"), Some(Framing::Line));
        assert_eq!(Framing::parse("Blank"), Some(Framing::BlankLine));
        assert_eq!(Framing::parse("?"), None);
    }
}
