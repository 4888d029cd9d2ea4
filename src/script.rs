//! Script-item codec (spec §4.1).
//!
//! A `ScriptItem` is the smallest unit the envelope codec works with: a
//! push of raw bytes, a bare op-code, or a small signed integer pushed
//! using Bitcoin Script's minimal encoding. This mirrors the teacher's
//! small single-purpose binary readers (`Cursor`-driven, no derive
//! machinery) rather than a `serde` format, because the wire form mixes
//! variable-length pushes with fixed op-code bytes.

use thiserror::Error;

/// Maximum number of bytes a single push may carry (`MAX_SCRIPT_ELEMENT_SIZE`).
pub const MAX_PUSH_BYTES: usize = 520;

const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;

/// A single item in a script: push of bytes, a bare op-code, or a
/// minimally-encoded small integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptItem {
    PushData(Vec<u8>),
    OpCode(u8),
    Number(i64),
}

impl ScriptItem {
    pub fn push_data(bytes: impl Into<Vec<u8>>) -> Self {
        Self::PushData(bytes.into())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("truncated script: needed {needed} more byte(s)")]
    Truncated { needed: usize },
    #[error("push of {0} bytes exceeds the {MAX_PUSH_BYTES}-byte limit")]
    Oversize(usize),
}

/// Encode a signed integer using Bitcoin Script's minimal push encoding:
/// little-endian magnitude with a trailing sign bit. Returns an empty
/// vector for zero (the caller special-cases zero as `OP_0` instead of
/// emitting an empty push).
fn encode_number_bytes(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let neg = n < 0;
    let mut abs = n.unsigned_abs();
    let mut bytes = Vec::new();
    while abs > 0 {
        bytes.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if bytes.last().copied().unwrap_or(0) & 0x80 != 0 {
        bytes.push(if neg { 0x80 } else { 0x00 });
    } else if neg {
        *bytes.last_mut().unwrap() |= 0x80;
    }
    bytes
}

/// Inverse of [`encode_number_bytes`]: sign-magnitude little-endian bytes
/// back to a signed integer. Widens through `u128`/`i128` so a 9-byte
/// encoding of `i64::MIN` (whose magnitude is exactly `2^63`) decodes
/// without overflowing a shift or negation on the way back to `i64`.
fn decode_number_bytes(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let last = bytes.len() - 1;
    let negative = bytes[last] & 0x80 != 0;
    let mut magnitude: u128 = 0;
    for (i, &b) in bytes.iter().enumerate().take(16) {
        let byte = if i == last { b & 0x7f } else { b };
        magnitude |= (byte as u128) << (8 * i);
    }
    let signed = if negative {
        -(magnitude as i128)
    } else {
        magnitude as i128
    };
    signed as i64
}

/// Append the wire encoding of a single push (choosing the shortest
/// push op-code for the given length) to `out`.
fn write_push(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), ScriptError> {
    if bytes.len() > MAX_PUSH_BYTES {
        return Err(ScriptError::Oversize(bytes.len()));
    }
    if bytes.len() <= 0x4b {
        out.push(bytes.len() as u8);
    } else if bytes.len() <= 0xff {
        out.push(OP_PUSHDATA1);
        out.push(bytes.len() as u8);
    } else {
        out.push(OP_PUSHDATA2);
        out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    }
    out.extend_from_slice(bytes);
    Ok(())
}

/// Encode a single script item onto `out`.
pub fn write_item(out: &mut Vec<u8>, item: &ScriptItem) -> Result<(), ScriptError> {
    match item {
        ScriptItem::PushData(bytes) => write_push(out, bytes),
        ScriptItem::OpCode(op) => {
            out.push(*op);
            Ok(())
        }
        ScriptItem::Number(0) => {
            out.push(OP_0);
            Ok(())
        }
        ScriptItem::Number(n) if *n >= 1 && *n <= 16 => {
            out.push(OP_1 + (*n as u8 - 1));
            Ok(())
        }
        ScriptItem::Number(n) => write_push(out, &encode_number_bytes(*n)),
    }
}

/// Encode a whole sequence of items.
pub fn write_items(items: &[ScriptItem]) -> Result<Vec<u8>, ScriptError> {
    let mut out = Vec::new();
    for item in items {
        write_item(&mut out, item)?;
    }
    Ok(out)
}

/// A cursor over a script byte slice, used by both the script-item and
/// envelope readers.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ScriptError> {
        if self.remaining() < n {
            return Err(ScriptError::Truncated {
                needed: n - self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_byte(&mut self) -> Result<u8, ScriptError> {
        Ok(self.take(1)?[0])
    }

    /// Read one script item, advancing the cursor past it.
    pub fn read_item(&mut self) -> Result<ScriptItem, ScriptError> {
        let op = self.take_byte()?;
        match op {
            OP_0 => Ok(ScriptItem::Number(0)),
            OP_1..=OP_16 => Ok(ScriptItem::Number((op - OP_1 + 1) as i64)),
            OP_PUSHDATA1 => {
                let len = self.take_byte()? as usize;
                let bytes = self.read_push_body(len)?;
                Ok(ScriptItem::PushData(bytes))
            }
            OP_PUSHDATA2 => {
                let len_bytes = self.take(2)?;
                let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
                let bytes = self.read_push_body(len)?;
                Ok(ScriptItem::PushData(bytes))
            }
            OP_PUSHDATA4 => {
                let len_bytes = self.take(4)?;
                let len =
                    u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                        as usize;
                let bytes = self.read_push_body(len)?;
                Ok(ScriptItem::PushData(bytes))
            }
            0x01..=0x4b => {
                let bytes = self.read_push_body(op as usize)?;
                Ok(ScriptItem::PushData(bytes))
            }
            other => Ok(ScriptItem::OpCode(other)),
        }
    }

    fn read_push_body(&mut self, len: usize) -> Result<Vec<u8>, ScriptError> {
        if len > MAX_PUSH_BYTES {
            return Err(ScriptError::Oversize(len));
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Read every remaining item in the script.
    pub fn read_all(mut self) -> Result<Vec<ScriptItem>, ScriptError> {
        let mut items = Vec::new();
        while !self.is_empty() {
            items.push(self.read_item()?);
        }
        Ok(items)
    }
}

/// Parse a whole script into its sequence of items.
pub fn read_items(data: &[u8]) -> Result<Vec<ScriptItem>, ScriptError> {
    Reader::new(data).read_all()
}

/// Decode a number pushed as raw bytes (used by callers that already
/// hold a `PushData` item and want its integer value, e.g. the envelope
/// codec's protocol-id count).
pub fn number_from_push(bytes: &[u8]) -> i64 {
    decode_number_bytes(bytes)
}

/// Encode an `i64` the same way `ScriptItem::Number` would, but as a
/// bare byte vector (used where callers need the magnitude bytes rather
/// than a full script item, e.g. to embed a count inside a BSOR field).
pub fn number_to_push_bytes(n: i64) -> Vec<u8> {
    encode_number_bytes(n)
}
