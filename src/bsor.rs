//! BSOR - tagged binary object serialization (spec §4.3).
//!
//! Each field is written as `(tag: u8, length: u32 LE, value bytes)`.
//! Unknown tags encountered on read are skipped rather than rejected,
//! so a struct gains fields over time without breaking older readers.
//! There is no field-order dependency: a reader collects every entry
//! into a tag → bytes map before pulling typed values out of it.
//!
//! This mirrors the teacher's small hand-rolled binary formats (see
//! the script and envelope codecs) rather than reaching for `serde`,
//! because the forward-compatible skip-unknown-tags behavior doesn't
//! map onto a derive-based format.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BsorError {
    #[error("truncated BSOR entry")]
    Truncated,
    #[error("invalid UTF-8 in BSOR string field (tag {tag})")]
    InvalidUtf8 { tag: u8 },
    #[error("BSOR field (tag {tag}) has the wrong length for its type: {len}")]
    WrongLength { tag: u8, len: usize },
    #[error("required BSOR field (tag {tag}) is missing")]
    MissingField { tag: u8 },
}

/// Append-only writer building up a sequence of tagged entries.
#[derive(Debug, Default)]
pub struct BsorWriter {
    buf: Vec<u8>,
}

impl BsorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_entry(&mut self, tag: u8, value: &[u8]) {
        self.buf.push(tag);
        self.buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
    }

    pub fn write_u8(&mut self, tag: u8, value: u8) -> &mut Self {
        self.write_entry(tag, &[value]);
        self
    }

    pub fn write_bool(&mut self, tag: u8, value: bool) -> &mut Self {
        self.write_u8(tag, u8::from(value))
    }

    pub fn write_u32(&mut self, tag: u8, value: u32) -> &mut Self {
        self.write_entry(tag, &value.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, tag: u8, value: u64) -> &mut Self {
        self.write_entry(tag, &value.to_le_bytes());
        self
    }

    pub fn write_bytes(&mut self, tag: u8, value: &[u8]) -> &mut Self {
        self.write_entry(tag, value);
        self
    }

    pub fn write_str(&mut self, tag: u8, value: &str) -> &mut Self {
        self.write_entry(tag, value.as_bytes());
        self
    }

    /// Write an already-encoded nested `BsorWriter::finish()` blob.
    pub fn write_struct(&mut self, tag: u8, encoded: &[u8]) -> &mut Self {
        self.write_entry(tag, encoded);
        self
    }

    /// Write a homogeneous list of already-encoded elements (each
    /// itself a BSOR blob, or a raw byte string for leaf-typed lists).
    pub fn write_list(&mut self, tag: u8, items: &[Vec<u8>]) -> &mut Self {
        let mut value = Vec::new();
        value.extend_from_slice(&(items.len() as u32).to_le_bytes());
        for item in items {
            value.extend_from_slice(&(item.len() as u32).to_le_bytes());
            value.extend_from_slice(item);
        }
        self.write_entry(tag, &value);
        self
    }

    /// Only writes the field if present. Absence of the tag on read
    /// *is* the optional-presence bit, so there is no explicit flag byte.
    pub fn write_optional_bytes(&mut self, tag: u8, value: Option<&[u8]>) -> &mut Self {
        if let Some(bytes) = value {
            self.write_bytes(tag, bytes);
        }
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Parsed view over a BSOR blob: every entry has already been split
/// into its tag and value bytes, last-one-wins on duplicate tags.
pub struct BsorReader {
    entries: HashMap<u8, Vec<u8>>,
}

impl BsorReader {
    pub fn parse(data: &[u8]) -> Result<Self, BsorError> {
        let mut entries = HashMap::new();
        let mut pos = 0usize;
        while pos < data.len() {
            if data.len() - pos < 5 {
                return Err(BsorError::Truncated);
            }
            let tag = data[pos];
            let len = u32::from_le_bytes([
                data[pos + 1],
                data[pos + 2],
                data[pos + 3],
                data[pos + 4],
            ]) as usize;
            pos += 5;
            if data.len() - pos < len {
                return Err(BsorError::Truncated);
            }
            entries.insert(tag, data[pos..pos + len].to_vec());
            pos += len;
        }
        Ok(Self { entries })
    }

    pub fn has(&self, tag: u8) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn get_bytes(&self, tag: u8) -> Option<&[u8]> {
        self.entries.get(&tag).map(|v| v.as_slice())
    }

    pub fn require_bytes(&self, tag: u8) -> Result<&[u8], BsorError> {
        self.get_bytes(tag).ok_or(BsorError::MissingField { tag })
    }

    pub fn get_u8(&self, tag: u8) -> Result<Option<u8>, BsorError> {
        match self.entries.get(&tag) {
            None => Ok(None),
            Some(bytes) if bytes.len() == 1 => Ok(Some(bytes[0])),
            Some(bytes) => Err(BsorError::WrongLength {
                tag,
                len: bytes.len(),
            }),
        }
    }

    pub fn get_bool(&self, tag: u8) -> Result<Option<bool>, BsorError> {
        Ok(self.get_u8(tag)?.map(|b| b != 0))
    }

    pub fn get_u32(&self, tag: u8) -> Result<Option<u32>, BsorError> {
        match self.entries.get(&tag) {
            None => Ok(None),
            Some(bytes) if bytes.len() == 4 => {
                Ok(Some(u32::from_le_bytes(bytes.as_slice().try_into().unwrap())))
            }
            Some(bytes) => Err(BsorError::WrongLength {
                tag,
                len: bytes.len(),
            }),
        }
    }

    pub fn get_u64(&self, tag: u8) -> Result<Option<u64>, BsorError> {
        match self.entries.get(&tag) {
            None => Ok(None),
            Some(bytes) if bytes.len() == 8 => {
                Ok(Some(u64::from_le_bytes(bytes.as_slice().try_into().unwrap())))
            }
            Some(bytes) => Err(BsorError::WrongLength {
                tag,
                len: bytes.len(),
            }),
        }
    }

    pub fn get_str(&self, tag: u8) -> Result<Option<String>, BsorError> {
        match self.entries.get(&tag) {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.clone())
                .map(Some)
                .map_err(|_| BsorError::InvalidUtf8 { tag }),
        }
    }

    /// Parse a nested struct previously written with `write_struct`.
    pub fn get_struct(&self, tag: u8) -> Result<Option<BsorReader>, BsorError> {
        match self.entries.get(&tag) {
            None => Ok(None),
            Some(bytes) => BsorReader::parse(bytes).map(Some),
        }
    }

    /// Split a list previously written with `write_list` back into its
    /// raw element byte slices.
    pub fn get_list(&self, tag: u8) -> Result<Option<Vec<Vec<u8>>>, BsorError> {
        let bytes = match self.entries.get(&tag) {
            None => return Ok(None),
            Some(bytes) => bytes,
        };
        if bytes.len() < 4 {
            return Err(BsorError::Truncated);
        }
        let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mut pos = 4;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            if bytes.len() - pos < 4 {
                return Err(BsorError::Truncated);
            }
            let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if bytes.len() - pos < len {
                return Err(BsorError::Truncated);
            }
            items.push(bytes[pos..pos + len].to_vec());
            pos += len;
        }
        Ok(Some(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalar_fields() {
        let mut w = BsorWriter::new();
        w.write_u8(1, 7).write_u32(2, 42).write_u64(3, 1_000_000);
        w.write_bool(4, true).write_str(5, "hello");
        let data = w.finish();

        let r = BsorReader::parse(&data).unwrap();
        assert_eq!(r.get_u8(1).unwrap(), Some(7));
        assert_eq!(r.get_u32(2).unwrap(), Some(42));
        assert_eq!(r.get_u64(3).unwrap(), Some(1_000_000));
        assert_eq!(r.get_bool(4).unwrap(), Some(true));
        assert_eq!(r.get_str(5).unwrap(), Some("hello".to_string()));
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let mut w = BsorWriter::new();
        w.write_u8(1, 1).write_u32(99, 0xdead_beef).write_u8(2, 2);
        let data = w.finish();

        let r = BsorReader::parse(&data).unwrap();
        assert_eq!(r.get_u8(1).unwrap(), Some(1));
        assert_eq!(r.get_u8(2).unwrap(), Some(2));
        // tag 99 present but simply never queried by this reader.
        assert!(r.has(99));
    }

    #[test]
    fn absent_optional_field_reads_as_none() {
        let mut w = BsorWriter::new();
        w.write_optional_bytes(1, None);
        w.write_optional_bytes(2, Some(b"present"));
        let data = w.finish();

        let r = BsorReader::parse(&data).unwrap();
        assert_eq!(r.get_bytes(1), None);
        assert_eq!(r.get_bytes(2), Some(b"present".as_slice()));
    }

    #[test]
    fn nested_struct_round_trips() {
        let mut inner = BsorWriter::new();
        inner.write_str(1, "child");
        let inner_bytes = inner.finish();

        let mut outer = BsorWriter::new();
        outer.write_struct(1, &inner_bytes);
        let outer_bytes = outer.finish();

        let r = BsorReader::parse(&outer_bytes).unwrap();
        let nested = r.get_struct(1).unwrap().unwrap();
        assert_eq!(nested.get_str(1).unwrap(), Some("child".to_string()));
    }

    #[test]
    fn homogeneous_list_round_trips() {
        let items = vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()];
        let mut w = BsorWriter::new();
        w.write_list(1, &items);
        let data = w.finish();

        let r = BsorReader::parse(&data).unwrap();
        assert_eq!(r.get_list(1).unwrap(), Some(items));
    }

    #[test]
    fn truncated_input_rejected() {
        let data = [1u8, 0, 0, 0, 5, 1, 2]; // announces 5 bytes, has 2
        assert_eq!(BsorReader::parse(&data), Err(BsorError::Truncated));
    }

    #[test]
    fn wrong_length_scalar_rejected() {
        let mut w = BsorWriter::new();
        w.write_bytes(1, &[1, 2, 3]);
        let data = w.finish();
        let r = BsorReader::parse(&data).unwrap();
        assert_eq!(
            r.get_u32(1),
            Err(BsorError::WrongLength { tag: 1, len: 3 })
        );
    }
}
