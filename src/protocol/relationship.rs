//! Relationship protocol (spec §4.7): a terminal message family used to
//! establish a channel (`Initiation`/`Accept`) or refuse one (`Reject`).
//! Bodies are encoded with [`crate::bsor`].

use crate::bsor::{BsorReader, BsorWriter};
use crate::envelope::EnvelopeData;
use crate::script::ScriptItem;

use super::registry::{ProtocolError, ProtocolParser};
use super::{ProtocolLayer, PROTOCOL_ID_RELATIONSHIP};

pub const VERSION: i64 = 0;

const TYPE_INITIATION: i64 = 0;
const TYPE_ACCEPT: i64 = 1;
const TYPE_REJECT: i64 = 2;

/// A mailbox endpoint a peer can be reached at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxDescriptor {
    pub base_url: String,
    pub mailbox_id: String,
    pub write_token: Option<String>,
}

impl MailboxDescriptor {
    fn encode(&self) -> Vec<u8> {
        let mut w = BsorWriter::new();
        w.write_str(1, &self.base_url);
        w.write_str(2, &self.mailbox_id);
        if let Some(token) = &self.write_token {
            w.write_str(3, token);
        }
        w.finish()
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let r = BsorReader::parse(bytes)?;
        Ok(Self {
            base_url: r
                .get_str(1)?
                .ok_or_else(|| ProtocolError::InvalidMessage("mailbox missing base_url".into()))?,
            mailbox_id: r.get_str(2)?.ok_or_else(|| {
                ProtocolError::InvalidMessage("mailbox missing mailbox_id".into())
            })?,
            write_token: r.get_str(3)?,
        })
    }
}

/// Optional identity fields carried by an `Initiation`/`Accept`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub public_key: Option<Vec<u8>>,
    pub handle: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub postal_location: Option<String>,
}

impl Identity {
    fn encode(&self) -> Vec<u8> {
        let mut w = BsorWriter::new();
        w.write_optional_bytes(1, self.public_key.as_deref());
        if let Some(v) = &self.handle {
            w.write_str(2, v);
        }
        if let Some(v) = &self.name {
            w.write_str(3, v);
        }
        if let Some(v) = &self.email {
            w.write_str(4, v);
        }
        if let Some(v) = &self.postal_location {
            w.write_str(5, v);
        }
        w.finish()
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let r = BsorReader::parse(bytes)?;
        Ok(Self {
            public_key: r.get_bytes(1).map(|b| b.to_vec()),
            handle: r.get_str(2)?,
            name: r.get_str(3)?,
            email: r.get_str(4)?,
            postal_location: r.get_str(5)?,
        })
    }
}

/// Shared body of `Initiation` and `Accept`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipBody {
    pub identity: Identity,
    pub mailboxes: Vec<MailboxDescriptor>,
    pub supported_protocols: Vec<Vec<u8>>,
}

impl RelationshipBody {
    fn encode(&self) -> Vec<u8> {
        let mut w = BsorWriter::new();
        w.write_struct(1, &self.identity.encode());
        let mailbox_blobs: Vec<Vec<u8>> = self.mailboxes.iter().map(|m| m.encode()).collect();
        w.write_list(2, &mailbox_blobs);
        w.write_list(3, &self.supported_protocols);
        w.finish()
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let r = BsorReader::parse(bytes)?;
        let identity = r
            .get_bytes(1)
            .map(Identity::decode)
            .transpose()?
            .unwrap_or_default();
        let mailboxes = r
            .get_list(2)?
            .unwrap_or_default()
            .iter()
            .map(|bytes| MailboxDescriptor::decode(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        let supported_protocols = r.get_list(3)?.unwrap_or_default();
        Ok(Self {
            identity,
            mailboxes,
            supported_protocols,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InUse = 0,
    Unwanted = 1,
}

impl RejectReason {
    fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::InUse),
            1 => Ok(Self::Unwanted),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unrecognized reject reason {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectBody {
    pub reason: RejectReason,
    pub note: String,
}

impl RejectBody {
    fn encode(&self) -> Vec<u8> {
        let mut w = BsorWriter::new();
        w.write_u8(1, self.reason as u8);
        w.write_str(2, &self.note);
        w.finish()
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let r = BsorReader::parse(bytes)?;
        let reason = RejectReason::from_u8(
            r.get_u8(1)?
                .ok_or_else(|| ProtocolError::InvalidMessage("reject missing reason".into()))?,
        )?;
        let note = r.get_str(2)?.unwrap_or_default();
        Ok(Self { reason, note })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipMessage {
    Initiation(RelationshipBody),
    Accept(RelationshipBody),
    Reject(RejectBody),
}

/// Build the terminal envelope for a relationship message. There is no
/// inner envelope to wrap: the relationship payload is the whole thing.
pub fn wrap(message: &RelationshipMessage) -> EnvelopeData {
    let (type_code, body_bytes) = match message {
        RelationshipMessage::Initiation(body) => (TYPE_INITIATION, body.encode()),
        RelationshipMessage::Accept(body) => (TYPE_ACCEPT, body.encode()),
        RelationshipMessage::Reject(body) => (TYPE_REJECT, body.encode()),
    };
    EnvelopeData::new(
        vec![PROTOCOL_ID_RELATIONSHIP.to_vec()],
        vec![
            ScriptItem::Number(VERSION),
            ScriptItem::Number(type_code),
            ScriptItem::push_data(body_bytes),
        ],
    )
}

pub struct RelationshipParser;

impl ProtocolParser for RelationshipParser {
    fn protocol_id(&self) -> &'static [u8] {
        PROTOCOL_ID_RELATIONSHIP
    }

    fn parse(
        &self,
        mut envelope: EnvelopeData,
    ) -> Result<(ProtocolLayer, EnvelopeData), ProtocolError> {
        if envelope.payload.len() < 3 {
            return Err(ProtocolError::InvalidMessage(
                "relationship payload too short".into(),
            ));
        }
        let version = match envelope.payload.remove(0) {
            ScriptItem::Number(n) => n,
            _ => return Err(ProtocolError::InvalidMessage("expected version".into())),
        };
        if version != VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: VERSION,
                found: version,
            });
        }
        let type_code = match envelope.payload.remove(0) {
            ScriptItem::Number(n) => n,
            _ => return Err(ProtocolError::InvalidMessage("expected type code".into())),
        };
        let body_bytes = match envelope.payload.remove(0) {
            ScriptItem::PushData(bytes) => bytes,
            _ => return Err(ProtocolError::InvalidMessage("expected body bytes".into())),
        };

        let message = match type_code {
            TYPE_INITIATION => RelationshipMessage::Initiation(RelationshipBody::decode(&body_bytes)?),
            TYPE_ACCEPT => RelationshipMessage::Accept(RelationshipBody::decode(&body_bytes)?),
            TYPE_REJECT => RelationshipMessage::Reject(RejectBody::decode(&body_bytes)?),
            other => return Err(ProtocolError::UnsupportedMessage(other as u8)),
        };

        Ok((ProtocolLayer::Relationship(message), envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> RelationshipBody {
        RelationshipBody {
            identity: Identity {
                public_key: Some(vec![2; 33]),
                handle: Some("alice".to_string()),
                name: None,
                email: None,
                postal_location: None,
            },
            mailboxes: vec![MailboxDescriptor {
                base_url: "https://mailbox.example.com".to_string(),
                mailbox_id: "abc123".to_string(),
                write_token: Some("token".to_string()),
            }],
            supported_protocols: vec![b"signed".to_vec(), b"response".to_vec()],
        }
    }

    #[test]
    fn initiation_round_trips() {
        let message = RelationshipMessage::Initiation(sample_body());
        let envelope = wrap(&message);
        let mut envelope = envelope;
        envelope.pop_leading_protocol_id();
        let (layer, _) = RelationshipParser.parse(envelope).unwrap();
        let ProtocolLayer::Relationship(parsed) = layer else {
            panic!("expected relationship layer");
        };
        assert_eq!(parsed, message);
    }

    #[test]
    fn reject_round_trips() {
        let message = RelationshipMessage::Reject(RejectBody {
            reason: RejectReason::Unwanted,
            note: "no thanks".to_string(),
        });
        let mut envelope = wrap(&message);
        envelope.pop_leading_protocol_id();
        let (layer, _) = RelationshipParser.parse(envelope).unwrap();
        let ProtocolLayer::Relationship(parsed) = layer else {
            panic!("expected relationship layer");
        };
        assert_eq!(parsed, message);
    }
}
