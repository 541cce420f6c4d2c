//! Incremental JSON writer over a growable byte buffer.
//!
//! The buffer holds one record at a time between flushes. Primitives are
//! written without intermediate allocation; the frame stack tracks comma and
//! name placement so callers never emit separators themselves. A record that
//! outgrows the hard per-record cap fails the record, not the export: callers
//! take a `Mark` before a record and rewind to it on failure.

use std::io::{self, Write};

#[derive(Debug, thiserror::Error)]
pub enum JsonBufError {
    #[error("record exceeds the per-record cap of {cap} bytes")]
    RecordTooLarge { cap: usize },
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Object {
        has_entries: bool,
        awaiting_value: bool,
    },
    Array {
        has_items: bool,
    },
}

/// A rewind point: buffer length and frame depth at the time of the mark.
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    len: usize,
    frames: usize,
}

#[derive(Debug)]
pub struct JsonBuf {
    buf: Vec<u8>,
    frames: Vec<Frame>,
    record_start: usize,
    max_record_bytes: usize,
}

impl JsonBuf {
    pub fn new(initial_capacity: usize, max_record_bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(initial_capacity),
            frames: Vec::with_capacity(16),
            record_start: 0,
            max_record_bytes,
        }
    }

    /// Bytes appended since the last flush or explicit record reset.
    pub fn bytes_written_since_last_reset(&self) -> usize {
        self.buf.len() - self.record_start
    }

    pub fn mark(&self) -> Mark {
        Mark {
            len: self.buf.len(),
            frames: self.frames.len(),
        }
    }

    /// Discard everything written after `mark`.
    pub fn rewind(&mut self, mark: Mark) {
        self.buf.truncate(mark.len);
        self.frames.truncate(mark.frames);
    }

    /// Bytes appended since `mark`.
    pub fn bytes_since(&self, mark: Mark) -> usize {
        self.buf.len() - mark.len
    }

    /// The raw bytes appended since `mark`; used for per-line validation.
    pub fn slice_since(&self, mark: Mark) -> &[u8] {
        &self.buf[mark.len..]
    }

    /// The full buffered contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn open_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn begin_object(&mut self) -> Result<(), JsonBufError> {
        self.before_value();
        self.buf.push(b'{');
        self.frames.push(Frame::Object {
            has_entries: false,
            awaiting_value: false,
        });
        self.check_cap()
    }

    pub fn end_object(&mut self) -> Result<(), JsonBufError> {
        debug_assert!(matches!(self.frames.last(), Some(Frame::Object { .. })));
        self.frames.pop();
        self.buf.push(b'}');
        self.check_cap()
    }

    pub fn begin_array(&mut self) -> Result<(), JsonBufError> {
        self.before_value();
        self.buf.push(b'[');
        self.frames.push(Frame::Array { has_items: false });
        self.check_cap()
    }

    pub fn end_array(&mut self) -> Result<(), JsonBufError> {
        debug_assert!(matches!(self.frames.last(), Some(Frame::Array { .. })));
        self.frames.pop();
        self.buf.push(b']');
        self.check_cap()
    }

    /// Write an object member name. Must be followed by exactly one value.
    pub fn name(&mut self, key: &str) -> Result<(), JsonBufError> {
        if let Some(Frame::Object {
            has_entries,
            awaiting_value,
        }) = self.frames.last_mut()
        {
            if *has_entries {
                self.buf.push(b',');
            }
            *has_entries = true;
            *awaiting_value = true;
        } else {
            debug_assert!(false, "name() outside of an object");
        }
        escape_into(key, &mut self.buf);
        self.buf.push(b':');
        self.check_cap()
    }

    pub fn write_string(&mut self, s: &str) -> Result<(), JsonBufError> {
        self.before_value();
        escape_into(s, &mut self.buf);
        self.check_cap()
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), JsonBufError> {
        self.before_value();
        let _ = write!(self.buf, "{v}");
        self.check_cap()
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), JsonBufError> {
        self.before_value();
        let _ = write!(self.buf, "{v}");
        self.check_cap()
    }

    /// `v` must be finite; non-finite floats are serialized as strings by the
    /// layer above.
    pub fn write_f64(&mut self, v: f64) -> Result<(), JsonBufError> {
        debug_assert!(v.is_finite());
        self.before_value();
        let _ = write!(self.buf, "{v}");
        self.check_cap()
    }

    pub fn write_bool(&mut self, v: bool) -> Result<(), JsonBufError> {
        self.before_value();
        self.buf
            .extend_from_slice(if v { b"true" } else { b"false" });
        self.check_cap()
    }

    pub fn write_null(&mut self) -> Result<(), JsonBufError> {
        self.before_value();
        self.buf.extend_from_slice(b"null");
        self.check_cap()
    }

    /// Close every frame opened after `mark`, supplying `null` for a dangling
    /// member name. Used by failure isolation to keep a partially-written
    /// record syntactically valid.
    pub fn close_frames_to(&mut self, mark: Mark) -> Result<(), JsonBufError> {
        while self.frames.len() > mark.frames {
            match self.frames.last() {
                Some(Frame::Object { awaiting_value, .. }) => {
                    if *awaiting_value {
                        self.write_null()?;
                    }
                    self.end_object()?;
                }
                Some(Frame::Array { .. }) => self.end_array()?,
                None => break,
            }
        }
        Ok(())
    }

    /// Terminate the current record with a newline.
    pub fn newline(&mut self) -> Result<(), JsonBufError> {
        debug_assert!(self.frames.is_empty());
        self.buf.push(b'\n');
        self.check_cap()
    }

    /// Write buffered bytes to `w` and reset for the next record.
    pub fn flush_to<W: io::Write>(&mut self, w: &mut W) -> io::Result<usize> {
        let len = self.buf.len();
        w.write_all(&self.buf)?;
        self.buf.clear();
        self.record_start = 0;
        Ok(len)
    }

    fn before_value(&mut self) {
        match self.frames.last_mut() {
            Some(Frame::Array { has_items }) => {
                if *has_items {
                    self.buf.push(b',');
                }
                *has_items = true;
            }
            Some(Frame::Object { awaiting_value, .. }) => {
                debug_assert!(*awaiting_value, "object value without a preceding name");
                *awaiting_value = false;
            }
            None => {}
        }
    }

    fn check_cap(&self) -> Result<(), JsonBufError> {
        if self.buf.len() - self.record_start > self.max_record_bytes {
            Err(JsonBufError::RecordTooLarge {
                cap: self.max_record_bytes,
            })
        } else {
            Ok(())
        }
    }
}

/// JSON string escaping straight into the byte buffer: quote, backslash, and
/// ASCII-safe `\u00XX` for control characters. Multi-byte UTF-8 passes
/// through untouched.
fn escape_into(s: &str, buf: &mut Vec<u8>) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    buf.push(b'"');
    for byte in s.bytes() {
        match byte {
            b'"' => buf.extend_from_slice(b"\\\""),
            b'\\' => buf.extend_from_slice(b"\\\\"),
            0x08 => buf.extend_from_slice(b"\\b"),
            0x0c => buf.extend_from_slice(b"\\f"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            b if b < 0x20 => {
                buf.extend_from_slice(b"\\u00");
                buf.push(HEX[(b >> 4) as usize]);
                buf.push(HEX[(b & 0xf) as usize]);
            }
            b => buf.push(b),
        }
    }
    buf.push(b'"');
}
