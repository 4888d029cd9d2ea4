//! Signed-message protocol (spec §4.5): a terminal wrapper that binds
//! the inner envelope to a public key with an ECDSA signature.
//!
//! Grounded on the teacher's BIP-70 payment-protocol signing (its own
//! `Secp256k1::new()` / `sign_ecdsa` / `verify_ecdsa` pattern over a
//! SHA-256 digest), generalised from a fixed payment-details preimage
//! to an arbitrary wrapped envelope.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::envelope::EnvelopeData;
use crate::script::{self, ScriptItem};

use super::registry::{ProtocolError, ProtocolParser};
use super::{ProtocolLayer, PROTOCOL_ID_SIGNED};

pub const VERSION: i64 = 0;

/// Only hash type currently defined: sign the full preimage.
pub const HASH_TYPE_SIGN_ALL: u8 = 0;

/// Parsed signed-message header plus enough state to recompute the
/// preimage against a candidate public key at verify time.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedHeader {
    pub random_hash: [u8; 32],
    pub public_key: Option<PublicKey>,
    pub signature: Signature,
    pub hash_type: u8,
    preimage: Vec<u8>,
}

impl SignedHeader {
    /// Verify the signature against `expected_pubkey`. If the wire
    /// carried its own public key, it must equal `expected_pubkey`.
    pub fn verify(&self, expected_pubkey: &PublicKey) -> Result<(), ProtocolError> {
        if let Some(wire_key) = &self.public_key {
            if wire_key != expected_pubkey {
                return Err(ProtocolError::WrongPublicKey);
            }
        }
        let digest = Sha256::digest(&self.preimage);
        let msg = Message::from_digest_slice(&digest).expect("sha256 digest is 32 bytes");
        let secp = Secp256k1::verification_only();
        secp.verify_ecdsa(&msg, &self.signature, expected_pubkey)
            .map_err(|_| ProtocolError::InvalidSignature)
    }
}

fn compute_preimage(protocol_ids: &[Vec<u8>], payload: &[ScriptItem], random_hash: &[u8; 32]) -> Result<Vec<u8>, ProtocolError> {
    let mut preimage = Vec::new();
    for id in protocol_ids {
        preimage.extend_from_slice(id);
    }
    preimage.extend_from_slice(&script::write_items(payload)?);
    preimage.extend_from_slice(random_hash);
    Ok(preimage)
}

/// Wrap `inner` with a signature over `(inner.protocol_ids, inner.payload, random_hash)`.
pub fn wrap(
    inner: EnvelopeData,
    secret_key: &SecretKey,
    random_hash: [u8; 32],
    include_pubkey: bool,
) -> Result<EnvelopeData, ProtocolError> {
    let preimage = compute_preimage(&inner.protocol_ids, &inner.payload, &random_hash)?;
    let digest = Sha256::digest(&preimage);
    let msg = Message::from_digest_slice(&digest).expect("sha256 digest is 32 bytes");
    let secp = Secp256k1::signing_only();
    let signature = secp.sign_ecdsa(&msg, secret_key);

    let mut header_items = vec![
        ScriptItem::Number(VERSION),
        ScriptItem::push_data(random_hash.to_vec()),
        ScriptItem::Number(i64::from(include_pubkey)),
    ];
    if include_pubkey {
        let pubkey = PublicKey::from_secret_key(&secp, secret_key);
        header_items.push(ScriptItem::push_data(pubkey.serialize().to_vec()));
    }
    header_items.push(ScriptItem::push_data(signature.serialize_der().to_vec()));
    header_items.push(ScriptItem::Number(i64::from(HASH_TYPE_SIGN_ALL)));

    let mut inner = inner;
    inner.prepend(PROTOCOL_ID_SIGNED.to_vec(), header_items);
    Ok(inner)
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

pub struct SignedParser;

impl ProtocolParser for SignedParser {
    fn protocol_id(&self) -> &'static [u8] {
        PROTOCOL_ID_SIGNED
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
        let random_hash_vec = take_push(&mut envelope.payload)?;
        let random_hash: [u8; 32] = random_hash_vec
            .try_into()
            .map_err(|_| ProtocolError::InvalidMessage("random hash must be 32 bytes".into()))?;

        let has_pubkey = take_number(&mut envelope.payload)? != 0;
        let public_key = if has_pubkey {
            let bytes = take_push(&mut envelope.payload)?;
            Some(
                PublicKey::from_slice(&bytes)
                    .map_err(|_| ProtocolError::InvalidMessage("malformed public key".into()))?,
            )
        } else {
            None
        };

        let sig_bytes = take_push(&mut envelope.payload)?;
        let signature = Signature::from_der(&sig_bytes)
            .map_err(|_| ProtocolError::InvalidMessage("malformed DER signature".into()))?;

        let hash_type = take_number(&mut envelope.payload)? as u8;
        if hash_type != HASH_TYPE_SIGN_ALL {
            return Err(ProtocolError::UnsupportedHashType(hash_type));
        }

        let preimage = compute_preimage(&envelope.protocol_ids, &envelope.payload, &random_hash)?;

        let header = SignedHeader {
            random_hash,
            public_key,
            signature,
            hash_type,
            preimage,
        };
        Ok((ProtocolLayer::Signed(header), envelope))
    }
}
