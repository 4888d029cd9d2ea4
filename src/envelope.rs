//! Envelope codec (spec §4.2).
//!
//! The envelope is the outer frame of every message: an ordered,
//! non-empty list of protocol IDs followed by a payload of script
//! items. Wrapping protocols (signed, response) prepend their own
//! protocol ID and push their own header items in front of the inner
//! payload; terminal protocols consume the remaining payload entirely.
//! Built directly on [`crate::script`]'s item reader/writer.

use crate::script::{self, ScriptItem, ScriptError};
use thiserror::Error;

/// Opaque protocol label, e.g. `b"signed"` or `b"relationship"`.
pub type ProtocolId = Vec<u8>;

/// `envelope-version` pushed as the first item of every envelope.
pub const ENVELOPE_VERSION: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvelopeData {
    /// Non-empty on the wire; outermost protocol first.
    pub protocol_ids: Vec<ProtocolId>,
    pub payload: Vec<ScriptItem>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("envelope missing version marker")]
    MissingMarker,
    #[error("envelope carries an invalid protocol-id count")]
    InvalidCount,
    #[error("envelope's protocol-id list must not be empty")]
    EmptyProtocolIds,
    #[error("truncated protocol-id list: expected {expected}, found {found}")]
    TruncatedProtocolIds { expected: usize, found: usize },
}

impl EnvelopeData {
    pub fn new(protocol_ids: Vec<ProtocolId>, payload: Vec<ScriptItem>) -> Self {
        Self { protocol_ids, payload }
    }

    /// Protocol ID currently at the head of the list, if any.
    pub fn leading_protocol_id(&self) -> Option<&[u8]> {
        self.protocol_ids.first().map(|id| id.as_slice())
    }

    /// Strip the leading protocol ID, returning it. Used by the
    /// protocol registry while unwrapping nested wrappers.
    pub fn pop_leading_protocol_id(&mut self) -> Option<ProtocolId> {
        if self.protocol_ids.is_empty() {
            None
        } else {
            Some(self.protocol_ids.remove(0))
        }
    }

    /// Prepend a wrapper's protocol ID and its header items, leaving
    /// the current payload untouched behind them.
    pub fn prepend(&mut self, protocol_id: ProtocolId, mut header_items: Vec<ScriptItem>) {
        self.protocol_ids.insert(0, protocol_id);
        header_items.append(&mut self.payload);
        self.payload = header_items;
    }

    /// Encode this envelope to its wire form.
    pub fn write(&self) -> Result<Vec<u8>, EnvelopeError> {
        if self.protocol_ids.is_empty() {
            return Err(EnvelopeError::EmptyProtocolIds);
        }
        let mut items = Vec::with_capacity(2 + self.protocol_ids.len() + self.payload.len());
        items.push(ScriptItem::Number(ENVELOPE_VERSION));
        items.push(ScriptItem::Number(self.protocol_ids.len() as i64));
        for id in &self.protocol_ids {
            items.push(ScriptItem::push_data(id.clone()));
        }
        items.extend(self.payload.iter().cloned());
        Ok(script::write_items(&items)?)
    }

    /// Decode an envelope from its wire form.
    pub fn read(data: &[u8]) -> Result<Self, EnvelopeError> {
        let mut items = script::read_items(data)?.into_iter();

        match items.next() {
            Some(ScriptItem::Number(v)) if v == ENVELOPE_VERSION => {}
            _ => return Err(EnvelopeError::MissingMarker),
        }

        let count = match items.next() {
            Some(ScriptItem::Number(n)) if n >= 0 => n as usize,
            _ => return Err(EnvelopeError::InvalidCount),
        };
        if count == 0 {
            return Err(EnvelopeError::EmptyProtocolIds);
        }

        let mut protocol_ids = Vec::with_capacity(count);
        for i in 0..count {
            match items.next() {
                Some(ScriptItem::PushData(bytes)) => protocol_ids.push(bytes),
                _ => {
                    return Err(EnvelopeError::TruncatedProtocolIds {
                        expected: count,
                        found: i,
                    })
                }
            }
        }

        Ok(Self {
            protocol_ids,
            payload: items.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_structure() {
        let envelope = EnvelopeData::new(
            vec![b"T".to_vec()],
            vec![ScriptItem::push_data(vec![7u8; 25])],
        );
        let wire = envelope.write().unwrap();
        let parsed = EnvelopeData::read(&wire).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn wrap_then_unwrap_round_trips_protocol_ids() {
        let mut envelope = EnvelopeData::new(
            vec![b"T".to_vec()],
            vec![ScriptItem::push_data(vec![1, 2, 3])],
        );
        envelope.prepend(b"A".to_vec(), vec![ScriptItem::Number(0)]);
        assert_eq!(envelope.protocol_ids, vec![b"A".to_vec(), b"T".to_vec()]);

        let popped = envelope.pop_leading_protocol_id().unwrap();
        assert_eq!(popped, b"A".to_vec());
        assert_eq!(envelope.protocol_ids, vec![b"T".to_vec()]);
    }

    #[test]
    fn missing_marker_rejected() {
        let bytes = script::write_items(&[ScriptItem::Number(7)]).unwrap();
        assert_eq!(EnvelopeData::read(&bytes), Err(EnvelopeError::MissingMarker));
    }

    #[test]
    fn empty_protocol_ids_rejected() {
        let bytes = script::write_items(&[ScriptItem::Number(0), ScriptItem::Number(0)]).unwrap();
        assert_eq!(
            EnvelopeData::read(&bytes),
            Err(EnvelopeError::EmptyProtocolIds)
        );
    }

    #[test]
    fn truncated_protocol_id_list_rejected() {
        let bytes = script::write_items(&[
            ScriptItem::Number(ENVELOPE_VERSION),
            ScriptItem::Number(2),
            ScriptItem::push_data(vec![1]),
        ])
        .unwrap();
        assert_eq!(
            EnvelopeData::read(&bytes),
            Err(EnvelopeError::TruncatedProtocolIds {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn writing_with_no_protocol_ids_rejected() {
        let envelope = EnvelopeData::new(vec![], vec![]);
        assert_eq!(envelope.write(), Err(EnvelopeError::EmptyProtocolIds));
    }
}
