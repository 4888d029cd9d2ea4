//! Protocol registry and the built-in protocols (spec §4.4-§4.7, §6).
//!
//! A protocol is identified by a short opaque byte string. Wrapping
//! protocols (`signed`, `response`) parse a header out of the front of
//! the payload and hand back the still-wrapped inner envelope; terminal
//! protocols (`relationship`, `authorize`) consume the payload entirely
//! and have no inner envelope.

pub mod authorize;
pub mod registry;
pub mod relationship;
pub mod response;
pub mod signed;
pub mod terminal;

pub use registry::{ProtocolError, ProtocolParser, ProtocolRegistry, UnwrapOutcome};

/// One parsed layer from an unwrap pass, in outside-in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolLayer {
    Signed(signed::SignedHeader),
    Response(response::ResponseHeader),
    Relationship(relationship::RelationshipMessage),
    Authorize(authorize::AuthorizeMessage),
    MerkleProof(terminal::MerkleProof),
    TransferAccept(terminal::TransferAccept),
}

pub const PROTOCOL_ID_SIGNED: &[u8] = b"signed";
pub const PROTOCOL_ID_RESPONSE: &[u8] = b"response";
pub const PROTOCOL_ID_RELATIONSHIP: &[u8] = b"relationship";
pub const PROTOCOL_ID_AUTHORIZE: &[u8] = b"authorize";

/// A default registry with every built-in protocol registered.
pub fn default_registry() -> ProtocolRegistry {
    let mut registry = ProtocolRegistry::new();
    registry.register(std::sync::Arc::new(signed::SignedParser));
    registry.register(std::sync::Arc::new(response::ResponseParser));
    registry.register(std::sync::Arc::new(relationship::RelationshipParser));
    registry.register(std::sync::Arc::new(authorize::AuthorizeParser));
    registry.register(std::sync::Arc::new(terminal::MerkleProofParser));
    registry.register(std::sync::Arc::new(terminal::TransferAcceptParser));
    registry
}
