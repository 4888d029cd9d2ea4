//! Protocol registry: maps a protocol ID to the parser that understands
//! it, and drives the outside-in unwrap loop described in spec §4.4.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::bsor::BsorError;
use crate::envelope::{EnvelopeData, EnvelopeError};
use crate::script::ScriptError;

use super::ProtocolLayer;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Bsor(#[from] BsorError),
    #[error("unsupported protocol version {found}, expected {expected}")]
    UnsupportedVersion { expected: i64, found: i64 },
    #[error("wrong public key on signed message")]
    WrongPublicKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("signed payload body missing, preimage cannot be computed")]
    PayloadMissing,
    #[error("unrecognized relationship message type {0}")]
    UnsupportedMessage(u8),
    #[error("malformed message: {0}")]
    InvalidMessage(String),
    #[error("unsupported signed-message hash type {0}, only 0 (sign-all) is defined")]
    UnsupportedHashType(u8),
    #[error("relationship channel already has a bound public key")]
    AlreadyEstablished,
    #[error("relationship channel has no bound public key yet")]
    NotRelationship,
    #[error("referenced message id {0} not found in the outgoing log")]
    MessageNotFound(u64),
    #[error(transparent)]
    Secp256k1(#[from] secp256k1::Error),
}

/// A single protocol's parser. Implementors consume header items out of
/// the front of `envelope.payload` (the leading protocol ID has already
/// been popped by the registry) and return the typed layer plus the
/// still-wrapped remaining envelope.
pub trait ProtocolParser: Send + Sync {
    fn protocol_id(&self) -> &'static [u8];

    fn parse(&self, envelope: EnvelopeData) -> Result<(ProtocolLayer, EnvelopeData), ProtocolError>;
}

/// Result of an unwrap pass: every wrapper layer peeled off, in
/// outside-in order, plus whatever envelope remains (empty payload if
/// a terminal protocol consumed everything).
#[derive(Debug, Clone)]
pub struct UnwrapOutcome {
    pub layers: Vec<ProtocolLayer>,
    pub remaining: EnvelopeData,
}

#[derive(Default)]
pub struct ProtocolRegistry {
    parsers: HashMap<Vec<u8>, Arc<dyn ProtocolParser>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, parser: Arc<dyn ProtocolParser>) {
        self.parsers.insert(parser.protocol_id().to_vec(), parser);
    }

    pub fn is_registered(&self, id: &[u8]) -> bool {
        self.parsers.contains_key(id)
    }

    /// Unwrap while the envelope's leading protocol ID is registered.
    pub fn unwrap(&self, mut envelope: EnvelopeData) -> Result<UnwrapOutcome, ProtocolError> {
        let mut layers = Vec::new();
        loop {
            let Some(id) = envelope.leading_protocol_id().map(|s| s.to_vec()) else {
                break;
            };
            let Some(parser) = self.parsers.get(&id) else {
                break;
            };
            envelope.pop_leading_protocol_id();
            let (layer, remaining) = parser.parse(envelope)?;
            envelope = remaining;
            layers.push(layer);
            if envelope.protocol_ids.is_empty() {
                break;
            }
        }
        Ok(UnwrapOutcome {
            layers,
            remaining: envelope,
        })
    }
}
