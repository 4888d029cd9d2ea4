//! Terminal payloads dispatched straight to an external collaborator
//! (spec §4.9 step 6): merkle proofs handed to the wallet, and transfer
//! acceptances that either carry their own transaction or reference a
//! prior outgoing `Transfer` by response id. Both collaborators
//! (the wallet, the transfer source) are out of scope; this module only
//! defines the wire shape and the trait they're consumed through.

use crate::bsor::{BsorReader, BsorWriter};
use crate::envelope::EnvelopeData;
use crate::script::ScriptItem;

use super::registry::{ProtocolError, ProtocolParser};
use super::ProtocolLayer;

pub const PROTOCOL_ID_MERKLE_PROOF: &[u8] = b"merkle-proof";
pub const PROTOCOL_ID_TRANSFER_ACCEPT: &[u8] = b"transfer-accept";

pub const VERSION: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub tx_id: [u8; 32],
    pub proof_bytes: Vec<u8>,
}

impl MerkleProof {
    fn encode(&self) -> Vec<u8> {
        let mut w = BsorWriter::new();
        w.write_bytes(1, &self.tx_id);
        w.write_bytes(2, &self.proof_bytes);
        w.finish()
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let r = BsorReader::parse(bytes)?;
        let tx_id_bytes = r.require_bytes(1)?;
        Ok(Self {
            tx_id: tx_id_bytes
                .try_into()
                .map_err(|_| ProtocolError::InvalidMessage("tx_id must be 32 bytes".into()))?,
            proof_bytes: r.require_bytes(2)?.to_vec(),
        })
    }
}

/// Acceptance of a prior `Transfer`, either carrying its own
/// transaction or pointing back at the outgoing message it replies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAccept {
    pub referenced_id: Option<u64>,
    pub tx: Option<Vec<u8>>,
}

impl TransferAccept {
    fn encode(&self) -> Vec<u8> {
        let mut w = BsorWriter::new();
        if let Some(id) = self.referenced_id {
            w.write_u64(1, id);
        }
        w.write_optional_bytes(2, self.tx.as_deref());
        w.finish()
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let r = BsorReader::parse(bytes)?;
        Ok(Self {
            referenced_id: r.get_u64(1)?,
            tx: r.get_bytes(2).map(|b| b.to_vec()),
        })
    }
}

/// External collaborator: the wallet that consumes verified payment
/// material. Out of scope beyond this interface.
pub trait Wallet: Send + Sync {
    fn accept_merkle_proof(&self, proof: &MerkleProof) -> Result<(), ProtocolError>;
    fn accept_transfer_tx(&self, tx: &[u8]) -> Result<(), ProtocolError>;
}

pub fn wrap_merkle_proof(proof: &MerkleProof) -> EnvelopeData {
    EnvelopeData::new(
        vec![PROTOCOL_ID_MERKLE_PROOF.to_vec()],
        vec![ScriptItem::Number(VERSION), ScriptItem::push_data(proof.encode())],
    )
}

pub fn wrap_transfer_accept(accept: &TransferAccept) -> EnvelopeData {
    EnvelopeData::new(
        vec![PROTOCOL_ID_TRANSFER_ACCEPT.to_vec()],
        vec![ScriptItem::Number(VERSION), ScriptItem::push_data(accept.encode())],
    )
}

fn take_versioned_body(envelope: &mut EnvelopeData) -> Result<Vec<u8>, ProtocolError> {
    if envelope.payload.len() < 2 {
        return Err(ProtocolError::InvalidMessage("payload too short".into()));
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
    match envelope.payload.remove(0) {
        ScriptItem::PushData(bytes) => Ok(bytes),
        _ => Err(ProtocolError::InvalidMessage("expected body bytes".into())),
    }
}

pub struct MerkleProofParser;

impl ProtocolParser for MerkleProofParser {
    fn protocol_id(&self) -> &'static [u8] {
        PROTOCOL_ID_MERKLE_PROOF
    }

    fn parse(
        &self,
        mut envelope: EnvelopeData,
    ) -> Result<(ProtocolLayer, EnvelopeData), ProtocolError> {
        let body = take_versioned_body(&mut envelope)?;
        Ok((
            ProtocolLayer::MerkleProof(MerkleProof::decode(&body)?),
            envelope,
        ))
    }
}

pub struct TransferAcceptParser;

impl ProtocolParser for TransferAcceptParser {
    fn protocol_id(&self) -> &'static [u8] {
        PROTOCOL_ID_TRANSFER_ACCEPT
    }

    fn parse(
        &self,
        mut envelope: EnvelopeData,
    ) -> Result<(ProtocolLayer, EnvelopeData), ProtocolError> {
        let body = take_versioned_body(&mut envelope)?;
        Ok((
            ProtocolLayer::TransferAccept(TransferAccept::decode(&body)?),
            envelope,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merkle_proof_round_trips() {
        let proof = MerkleProof {
            tx_id: [9u8; 32],
            proof_bytes: vec![1, 2, 3],
        };
        let mut envelope = wrap_merkle_proof(&proof);
        envelope.pop_leading_protocol_id();
        let (layer, _) = MerkleProofParser.parse(envelope).unwrap();
        let ProtocolLayer::MerkleProof(parsed) = layer else {
            panic!("expected merkle proof layer");
        };
        assert_eq!(parsed, proof);
    }

    #[test]
    fn transfer_accept_with_referenced_id_round_trips() {
        let accept = TransferAccept {
            referenced_id: Some(5),
            tx: None,
        };
        let mut envelope = wrap_transfer_accept(&accept);
        envelope.pop_leading_protocol_id();
        let (layer, _) = TransferAcceptParser.parse(envelope).unwrap();
        let ProtocolLayer::TransferAccept(parsed) = layer else {
            panic!("expected transfer accept layer");
        };
        assert_eq!(parsed, accept);
    }

    #[test]
    fn transfer_accept_with_embedded_tx_round_trips() {
        let accept = TransferAccept {
            referenced_id: None,
            tx: Some(vec![0xde, 0xad, 0xbe, 0xef]),
        };
        let mut envelope = wrap_transfer_accept(&accept);
        envelope.pop_leading_protocol_id();
        let (layer, _) = TransferAcceptParser.parse(envelope).unwrap();
        let ProtocolLayer::TransferAccept(parsed) = layer else {
            panic!("expected transfer accept layer");
        };
        assert_eq!(parsed, accept);
    }
}
