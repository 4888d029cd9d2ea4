//! Response-header protocol (spec §4.6): a non-cryptographic wrapper
//! that correlates a reply with a prior message id.

use crate::envelope::EnvelopeData;
use crate::script::ScriptItem;

use super::registry::{ProtocolError, ProtocolParser};
use super::{ProtocolLayer, PROTOCOL_ID_RESPONSE};

pub const VERSION: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok = 0,
    Reject = 1,
    Invalid = 2,
    UnsupportedProtocol = 3,
}

impl ResponseStatus {
    fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Reject),
            2 => Ok(Self::Invalid),
            3 => Ok(Self::UnsupportedProtocol),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unrecognized response status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHeader {
    pub referenced_id: u64,
    pub status: ResponseStatus,
    /// Protocol ID the reject/status code is scoped to, plus the code itself.
    pub code: Option<(Vec<u8>, u32)>,
    pub note: Option<String>,
}

/// Prepend a response header in front of `inner`.
pub fn wrap(
    mut inner: EnvelopeData,
    referenced_id: u64,
    status: ResponseStatus,
    code: Option<(Vec<u8>, u32)>,
    note: Option<String>,
) -> EnvelopeData {
    let mut header_items = vec![
        ScriptItem::Number(VERSION),
        ScriptItem::push_data(referenced_id.to_le_bytes().to_vec()),
        ScriptItem::Number(status as i64),
        ScriptItem::Number(i64::from(code.is_some())),
    ];
    if let Some((code_protocol_id, code_value)) = &code {
        header_items.push(ScriptItem::push_data(code_protocol_id.clone()));
        header_items.push(ScriptItem::push_data(code_value.to_le_bytes().to_vec()));
    }
    header_items.push(ScriptItem::Number(i64::from(note.is_some())));
    if let Some(note) = &note {
        header_items.push(ScriptItem::push_data(note.clone().into_bytes()));
    }
    inner.prepend(PROTOCOL_ID_RESPONSE.to_vec(), header_items);
    inner
}

fn take_number(payload: &mut Vec<ScriptItem>) -> Result<i64, ProtocolError> {
    match payload.first() {
        Some(ScriptItem::Number(_)) => match payload.remove(0) {
            ScriptItem::Number(n) => Ok(n),
            _ => unreachable!(),
        },
        _ => Err(ProtocolError::InvalidMessage(
            "expected a number item".into(),
        )),
    }
}

fn take_push(payload: &mut Vec<ScriptItem>) -> Result<Vec<u8>, ProtocolError> {
    match payload.first() {
        Some(ScriptItem::PushData(_)) => match payload.remove(0) {
            ScriptItem::PushData(bytes) => Ok(bytes),
            _ => unreachable!(),
        },
        _ => Err(ProtocolError::InvalidMessage(
            "expected a push-data item".into(),
        )),
    }
}

fn fixed_bytes<const N: usize>(bytes: Vec<u8>, what: &str) -> Result<[u8; N], ProtocolError> {
    bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidMessage(format!("{what} must be {N} bytes")))
}

pub struct ResponseParser;

impl ProtocolParser for ResponseParser {
    fn protocol_id(&self) -> &'static [u8] {
        PROTOCOL_ID_RESPONSE
    }

    fn parse(
        &self,
        mut envelope: EnvelopeData,
    ) -> Result<(ProtocolLayer, EnvelopeData), ProtocolError> {
        let version = take_number(&mut envelope.payload)?;
        if version != VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: VERSION,
                found: version,
            });
        }
        let referenced_id = u64::from_le_bytes(fixed_bytes(
            take_push(&mut envelope.payload)?,
            "referenced id",
        )?);
        let status = ResponseStatus::from_u8(take_number(&mut envelope.payload)? as u8)?;

        let has_code = take_number(&mut envelope.payload)? != 0;
        let code = if has_code {
            let code_protocol_id = take_push(&mut envelope.payload)?;
            let code_value =
                u32::from_le_bytes(fixed_bytes(take_push(&mut envelope.payload)?, "code")?);
            Some((code_protocol_id, code_value))
        } else {
            None
        };

        let has_note = take_number(&mut envelope.payload)? != 0;
        let note = if has_note {
            let bytes = take_push(&mut envelope.payload)?;
            Some(
                String::from_utf8(bytes)
                    .map_err(|_| ProtocolError::InvalidMessage("note is not valid utf-8".into()))?,
            )
        } else {
            None
        };

        let header = ResponseHeader {
            referenced_id,
            status,
            code,
            note,
        };
        Ok((ProtocolLayer::Response(header), envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inner_envelope() -> EnvelopeData {
        EnvelopeData::new(vec![b"relationship".to_vec()], vec![ScriptItem::Number(1)])
    }

    #[test]
    fn round_trips_with_code_and_note() {
        let wrapped = wrap(
            inner_envelope(),
            42,
            ResponseStatus::Reject,
            Some((b"signed".to_vec(), 2)),
            Some("invalid-signature".to_string()),
        );
        let mut envelope = wrapped;
        envelope.pop_leading_protocol_id();
        let (layer, remaining) = ResponseParser.parse(envelope).unwrap();
        let ProtocolLayer::Response(header) = layer else {
            panic!("expected response layer");
        };
        assert_eq!(header.referenced_id, 42);
        assert_eq!(header.status, ResponseStatus::Reject);
        assert_eq!(header.code, Some((b"signed".to_vec(), 2)));
        assert_eq!(header.note.as_deref(), Some("invalid-signature"));
        assert_eq!(remaining.protocol_ids, vec![b"relationship".to_vec()]);
    }

    #[test]
    fn round_trips_without_code_or_note() {
        let wrapped = wrap(inner_envelope(), 7, ResponseStatus::Ok, None, None);
        let mut envelope = wrapped;
        envelope.pop_leading_protocol_id();
        let (layer, _) = ResponseParser.parse(envelope).unwrap();
        let ProtocolLayer::Response(header) = layer else {
            panic!("expected response layer");
        };
        assert_eq!(header.referenced_id, 7);
        assert!(header.code.is_none());
        assert!(header.note.is_none());
    }
}
