//! Newline-delimited JSON framing.
//!
//! Each frame is one UTF-8 JSON value terminated by `\n`: either a single
//! action object or an array of action objects.  The receiver accumulates
//! raw reads in a [`FrameDecoder`] and only decodes complete lines, so a
//! frame split across reads, or several frames in one read, decode the same
//! as one frame per read.
//!
//! A malformed frame is reported as a [`FrameError`] and discarded; the
//! frames after it are unaffected.
//!
//! # Example
//!
//! ```rust
//! use armlink_middleware::framing::{encode_frame, FrameDecoder};
//! use armlink_types::RawAction;
//!
//! let bytes = encode_frame(&vec![RawAction::named("reset_pose")]).unwrap();
//! let (head, tail) = bytes.split_at(5);
//!
//! let mut decoder = FrameDecoder::default();
//! assert!(decoder.push(head).is_empty()); // incomplete
//! let frames = decoder.push(tail);
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].as_ref().unwrap().len(), 1);
//! ```

use armlink_types::RawAction;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Bytes requested per socket read.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Longest accepted frame, excluding the terminator.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const DELIMITER: u8 = b'\n';

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is a JSON {0}, expected an action object or an array of them")]
    NotAnAction(&'static str),
    #[error("frame exceeds the {limit}-byte limit")]
    TooLarge { limit: usize },
    #[error("connection closed with {0} bytes of an unterminated frame")]
    Truncated(usize),
}

/// Serialize `value` as one frame (compact JSON + `\n`).
pub fn encode_frame<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(DELIMITER);
    Ok(bytes)
}

/// Decode one frame body (without its terminator) into its actions.
///
/// A single object becomes a one-element batch.
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<RawAction>, FrameError> {
    let text = std::str::from_utf8(bytes)?;
    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(_) => serde_json::from_value(item).map_err(FrameError::from),
                other => Err(FrameError::NotAnAction(json_kind(&other))),
            })
            .collect(),
        object @ Value::Object(_) => Ok(vec![serde_json::from_value(object)?]),
        other => Err(FrameError::NotAnAction(json_kind(&other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Incremental decoder for a byte stream of frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
    /// Set after an oversize frame was reported; bytes are dropped until the
    /// next delimiter.
    discarding: bool,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes,
            discarding: false,
        }
    }

    /// Feed one read's worth of bytes; returns one result per frame completed
    /// by this read, in wire order.  Blank lines produce nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Vec<RawAction>, FrameError>> {
        let mut out = Vec::new();
        let scan_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        let mut search = scan_from;
        while let Some(offset) = self.buffer[search..].iter().position(|b| *b == DELIMITER) {
            let end = search + offset;
            let line = &self.buffer[start..end];
            if self.discarding {
                self.discarding = false;
            } else if line.len() > self.max_frame_bytes {
                out.push(Err(FrameError::TooLarge {
                    limit: self.max_frame_bytes,
                }));
            } else {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                if !line.trim_ascii().is_empty() {
                    out.push(decode_frame(line));
                }
            }
            start = end + 1;
            search = start;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_frame_bytes {
            if !self.discarding {
                out.push(Err(FrameError::TooLarge {
                    limit: self.max_frame_bytes,
                }));
                self.discarding = true;
            }
            self.buffer.clear();
        }
        out
    }

    /// Bytes of the current, still-unterminated frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Call once the stream has ended.  Reports a trailing frame that never
    /// received its terminator.
    pub fn finish(self) -> Option<FrameError> {
        if self.discarding || self.buffer.trim_ascii().is_empty() {
            None
        } else {
            Some(FrameError::Truncated(self.buffer.len()))
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CUP_FRAME: &str = r#"{"pos_end_effector":[0,0,0,0,0,0],"gripper":220,"objects_detected":{"cup":[640,360,0.42]}}"#;

    fn ok_batches(results: Vec<Result<Vec<RawAction>, FrameError>>) -> Vec<Vec<RawAction>> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn single_object_is_one_element_batch() {
        let actions = decode_frame(CUP_FRAME.as_bytes()).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].gripper, json!(220));
    }

    #[test]
    fn array_frame_keeps_order() {
        let frame = br#"[{"pos_end_effector":"a"},{"pos_end_effector":"b"}]"#;
        let actions = decode_frame(frame).unwrap();
        assert_eq!(actions[0].pos_end_effector, json!("a"));
        assert_eq!(actions[1].pos_end_effector, json!("b"));
    }

    #[test]
    fn bare_pose_list_is_not_an_action() {
        let err = decode_frame(b"[0.16, 0.96, 0.426, 3.131, -0.396, 0.009]").unwrap_err();
        assert!(matches!(err, FrameError::NotAnAction("number")));
    }

    #[test]
    fn scalar_frame_is_rejected() {
        assert!(matches!(decode_frame(b"42"), Err(FrameError::NotAnAction("number"))));
    }

    #[test]
    fn frame_split_across_reads_decodes_once_complete() {
        let bytes = format!("{CUP_FRAME}\n");
        let mut decoder = FrameDecoder::default();
        let mut results = Vec::new();
        for chunk in bytes.as_bytes().chunks(7) {
            results.extend(decoder.push(chunk));
        }
        let batches = ok_batches(results);
        assert_eq!(batches.len(), 1);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn several_frames_in_one_read() {
        let bytes = b"{\"pos_end_effector\":\"a\"}\n[{\"pos_end_effector\":\"b\"}]\n{\"pos_end_effector\":\"c\"";
        let mut decoder = FrameDecoder::default();
        let batches = ok_batches(decoder.push(bytes));
        assert_eq!(batches.len(), 2);
        assert_eq!(decoder.pending(), 23);
        let batches = ok_batches(decoder.push(b"}\n"));
        assert_eq!(batches[0][0].pos_end_effector, json!("c"));
    }

    #[test]
    fn malformed_frame_does_not_poison_the_next() {
        let mut decoder = FrameDecoder::default();
        let results = decoder.push(b"{\"pos_end_eff\n{\"pos_end_effector\":\"reset_pose\"}\n");
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(FrameError::Json(_))));
        let good = results[1].as_ref().unwrap();
        assert_eq!(good[0].pos_end_effector, json!("reset_pose"));
    }

    #[test]
    fn blank_lines_and_crlf_are_tolerated() {
        let mut decoder = FrameDecoder::default();
        let batches = ok_batches(decoder.push(b"\n  \n{\"gripper\":30}\r\n"));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].gripper, json!(30));
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let mut decoder = FrameDecoder::default();
        let results = decoder.push(&[0xff, 0xfe, b'\n']);
        assert!(matches!(results[0], Err(FrameError::Utf8(_))));
    }

    #[test]
    fn oversize_frame_is_reported_once_and_skipped() {
        let mut decoder = FrameDecoder::new(16);
        let mut results = decoder.push(&[b'x'; 20]);
        results.extend(decoder.push(&[b'x'; 20]));
        results.extend(decoder.push(b"xx\n{\"gripper\":220}\n"));

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(FrameError::TooLarge { limit: 16 })));
        assert_eq!(results[1].as_ref().unwrap()[0].gripper, json!(220));
    }

    #[test]
    fn oversize_frame_within_one_read_is_reported() {
        let mut decoder = FrameDecoder::new(8);
        let results = decoder.push(b"[{\"gripper\":220}]\n");
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(FrameError::TooLarge { limit: 8 })));
    }

    #[test]
    fn unterminated_tail_is_reported_on_finish() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.push(b"{\"gripper\":").is_empty());
        assert!(matches!(decoder.finish(), Some(FrameError::Truncated(11))));
    }

    #[test]
    fn encode_then_decode_preserves_batch() {
        let batch = vec![
            RawAction::pose(&[0.1, 0.2, 0.3, 0.0, 0.0, 0.0]).with_gripper(220),
            RawAction::named("reset_pose").with_gripper(30),
        ];
        let bytes = encode_frame(&batch).unwrap();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        let mut decoder = FrameDecoder::default();
        let decoded = ok_batches(decoder.push(&bytes));
        assert_eq!(decoded[0], batch);
    }
}
