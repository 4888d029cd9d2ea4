//! Authorize protocol (spec §6): a terminal payload carrying a generic
//! Bitcoin locking/unlocking script pair. Actual script execution is an
//! out-of-scope external collaborator (see [`ScriptVerifier`]); this
//! module only (de)serializes the payload and exposes the interface the
//! collaborator is invoked through.

use crate::bsor::{BsorReader, BsorWriter};
use crate::envelope::EnvelopeData;
use crate::script::ScriptItem;

use super::registry::{ProtocolError, ProtocolParser};
use super::{ProtocolLayer, PROTOCOL_ID_AUTHORIZE};

pub const VERSION: i64 = 0;

/// Reject codes scoped to the `authorize` protocol ID (spec §6).
pub const CODE_AUTHORIZE_REQUIRED: u32 = 1;
pub const CODE_NOT_UNLOCKED: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeMessage {
    pub locking: Vec<u8>,
    pub unlocking: Vec<u8>,
}

impl AuthorizeMessage {
    fn encode(&self) -> Vec<u8> {
        let mut w = BsorWriter::new();
        w.write_bytes(1, &self.locking);
        w.write_bytes(2, &self.unlocking);
        w.finish()
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let r = BsorReader::parse(bytes)?;
        Ok(Self {
            locking: r.require_bytes(1)?.to_vec(),
            unlocking: r.require_bytes(2)?.to_vec(),
        })
    }
}

/// External collaborator that re-executes Bitcoin script. Consumed only
/// at this interface; raw script execution itself is out of scope.
pub trait ScriptVerifier: Send + Sync {
    /// `preimage` is the concatenation of the enclosing envelope's
    /// protocol IDs and its remaining payload bytes.
    fn verify(&self, message: &AuthorizeMessage, preimage: &[u8]) -> Result<bool, ProtocolError>;
}

pub fn wrap(message: &AuthorizeMessage) -> EnvelopeData {
    EnvelopeData::new(
        vec![PROTOCOL_ID_AUTHORIZE.to_vec()],
        vec![ScriptItem::Number(VERSION), ScriptItem::push_data(message.encode())],
    )
}

pub struct AuthorizeParser;

impl ProtocolParser for AuthorizeParser {
    fn protocol_id(&self) -> &'static [u8] {
        PROTOCOL_ID_AUTHORIZE
    }

    fn parse(
        &self,
        mut envelope: EnvelopeData,
    ) -> Result<(ProtocolLayer, EnvelopeData), ProtocolError> {
        if envelope.payload.len() < 2 {
            return Err(ProtocolError::InvalidMessage(
                "authorize payload too short".into(),
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
        let body_bytes = match envelope.payload.remove(0) {
            ScriptItem::PushData(bytes) => bytes,
            _ => return Err(ProtocolError::InvalidMessage("expected body bytes".into())),
        };
        let message = AuthorizeMessage::decode(&body_bytes)?;
        Ok((ProtocolLayer::Authorize(message), envelope))
    }
}
