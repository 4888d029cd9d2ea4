//! Channel state machine (spec §4.9): inbound processing and outbound
//! staging for a single [`Channel`]. Grounded on the teacher's
//! `NetworkMessage` enum used in `network/mod.rs` to hand parsed wire
//! events from blocking protocol code to the async dispatcher —
//! [`ChannelEvent`] plays the same role here.

use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::PublicKey;

use crate::envelope::EnvelopeData;
use crate::protocol::relationship::{MailboxDescriptor, RelationshipBody, RelationshipMessage};
use crate::protocol::response::{self, ResponseHeader, ResponseStatus};
use crate::protocol::signed;
use crate::protocol::terminal::{MerkleProof, TransferAccept, Wallet};
use crate::protocol::{ProtocolLayer, ProtocolRegistry, PROTOCOL_ID_RELATIONSHIP, PROTOCOL_ID_SIGNED};
use crate::storage::ChannelType;

use super::{Channel, ChannelError};

const CODE_SIGNATURE_REQUIRED: u32 = 1;
const CODE_INVALID_SIGNATURE: u32 = 2;
const CODE_NOT_INITIATED: u32 = 1;
const CODE_ALREADY_INITIATED: u32 = 2;
const CODE_MESSAGE_NOT_FOUND: u32 = 1;

/// What happened to one inbound message, for the client runtime to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Payload didn't parse as an envelope, or its leading protocol ID
    /// isn't registered. Stored raw and left unprocessed.
    Unparsed,
    /// A reject was generated and staged as the message's pending
    /// response; `code_protocol_id`/`code` identify the reason.
    Rejected { code_protocol_id: Vec<u8>, code: u32 },
    /// A relationship-initiation channel (public bootstrap) received an
    /// `Initiation`. The application should open a new relationship
    /// channel for `body.identity` and replay the message into it.
    InitiationReceivedOnBootstrap(RelationshipBody),
    /// The external public key (and return mailboxes) were bound.
    Established {
        external_public_key: PublicKey,
        mailboxes: Vec<MailboxDescriptor>,
    },
    MerkleProofAccepted,
    TransferAccepted,
    /// Terminal payload recognised but left for the application to act on
    /// (e.g. `Accept`/`Reject`, `authorize`, or any future protocol).
    Unhandled(ProtocolLayer),
}

fn random_hash() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Stage a signed reject response pointing at `incoming_id`, storing it
/// as that message's pending response (spec §4.9 step 4/5, §7).
fn emit_reject(
    channel: &Channel,
    incoming_id: u64,
    code_protocol_id: &[u8],
    code: u32,
    note: impl Into<String>,
) -> Result<(), ChannelError> {
    let inner = EnvelopeData::new(vec![code_protocol_id.to_vec()], vec![]);
    let wrapped = response::wrap(
        inner,
        incoming_id,
        ResponseStatus::Reject,
        Some((code_protocol_id.to_vec(), code)),
        Some(note.into()),
    );
    let signed_env = signed::wrap(wrapped, &channel.local_private_key, random_hash(), true)?;
    let bytes = signed_env.write()?;
    channel.incoming.log.set_response(incoming_id, bytes)?;
    Ok(())
}

fn rejected(code_protocol_id: &[u8], code: u32) -> ChannelEvent {
    ChannelEvent::Rejected {
        code_protocol_id: code_protocol_id.to_vec(),
        code,
    }
}

/// Process one inbound payload arriving on `channel`'s incoming mailbox
/// (spec §4.9 "Inbound"). Appends it to the incoming log unconditionally,
/// then unwraps, verifies, and dispatches it.
pub fn handle_inbound(
    channel: &Channel,
    registry: &ProtocolRegistry,
    wallet: Option<&dyn Wallet>,
    payload: Vec<u8>,
) -> Result<(u64, ChannelEvent), ChannelError> {
    let incoming_id = channel.incoming.log.append(payload.clone());

    let envelope = match EnvelopeData::read(&payload) {
        Ok(envelope) => envelope,
        Err(_) => return Ok((incoming_id, ChannelEvent::Unparsed)),
    };
    let leading = envelope.leading_protocol_id().map(|id| id.to_vec());

    let outcome = match registry.unwrap(envelope) {
        Ok(outcome) => outcome,
        Err(e) => {
            let code_protocol_id = leading.unwrap_or_default();
            emit_reject(channel, incoming_id, &code_protocol_id, 0, e.to_string())?;
            return Ok((incoming_id, rejected(&code_protocol_id, 0)));
        }
    };

    if outcome.layers.is_empty() {
        return Ok((incoming_id, ChannelEvent::Unparsed));
    }

    let signed_header = outcome.layers.iter().find_map(|layer| match layer {
        ProtocolLayer::Signed(header) => Some(header.clone()),
        _ => None,
    });

    let Some(signed_header) = signed_header else {
        emit_reject(
            channel,
            incoming_id,
            PROTOCOL_ID_SIGNED,
            CODE_SIGNATURE_REQUIRED,
            "signature required",
        )?;
        return Ok((incoming_id, rejected(PROTOCOL_ID_SIGNED, CODE_SIGNATURE_REQUIRED)));
    };

    let initiation = outcome.layers.iter().find_map(|layer| match layer {
        ProtocolLayer::Relationship(RelationshipMessage::Initiation(body)) => Some(body.clone()),
        _ => None,
    });

    if let Some(body) = initiation {
        if channel.external_public_key().is_some() {
            emit_reject(
                channel,
                incoming_id,
                PROTOCOL_ID_RELATIONSHIP,
                CODE_ALREADY_INITIATED,
                "relationship already initiated",
            )?;
            return Ok((incoming_id, rejected(PROTOCOL_ID_RELATIONSHIP, CODE_ALREADY_INITIATED)));
        }

        let claimed_key = body
            .identity
            .public_key
            .as_deref()
            .and_then(|bytes| PublicKey::from_slice(bytes).ok());

        let Some(claimed_key) = claimed_key else {
            emit_reject(
                channel,
                incoming_id,
                PROTOCOL_ID_SIGNED,
                CODE_INVALID_SIGNATURE,
                "initiation carries no public key",
            )?;
            return Ok((incoming_id, rejected(PROTOCOL_ID_SIGNED, CODE_INVALID_SIGNATURE)));
        };

        if signed_header.verify(&claimed_key).is_err() {
            emit_reject(
                channel,
                incoming_id,
                PROTOCOL_ID_SIGNED,
                CODE_INVALID_SIGNATURE,
                "invalid signature",
            )?;
            return Ok((incoming_id, rejected(PROTOCOL_ID_SIGNED, CODE_INVALID_SIGNATURE)));
        }

        if channel.channel_type() == ChannelType::RelationshipInitiation {
            channel.incoming.log.mark_processed(incoming_id)?;
            return Ok((incoming_id, ChannelEvent::InitiationReceivedOnBootstrap(body)));
        }

        channel.bind_external_identity(claimed_key, None)?;
        channel.outgoing.set_mailboxes(body.mailboxes.clone());
        channel.incoming.log.mark_processed(incoming_id)?;
        return Ok((
            incoming_id,
            ChannelEvent::Established {
                external_public_key: claimed_key,
                mailboxes: body.mailboxes,
            },
        ));
    }

    let Some(bound_key) = channel.external_public_key() else {
        emit_reject(
            channel,
            incoming_id,
            PROTOCOL_ID_RELATIONSHIP,
            CODE_NOT_INITIATED,
            "relationship not initiated",
        )?;
        return Ok((incoming_id, rejected(PROTOCOL_ID_RELATIONSHIP, CODE_NOT_INITIATED)));
    };

    if signed_header.verify(&bound_key).is_err() {
        emit_reject(
            channel,
            incoming_id,
            PROTOCOL_ID_SIGNED,
            CODE_INVALID_SIGNATURE,
            "invalid signature",
        )?;
        return Ok((incoming_id, rejected(PROTOCOL_ID_SIGNED, CODE_INVALID_SIGNATURE)));
    }

    let response_header = outcome.layers.iter().find_map(|layer| match layer {
        ProtocolLayer::Response(header) => Some(header.clone()),
        _ => None,
    });

    if let Some(proof) = outcome.layers.iter().find_map(|layer| match layer {
        ProtocolLayer::MerkleProof(proof) => Some(proof.clone()),
        _ => None,
    }) {
        dispatch_merkle_proof(channel, wallet, incoming_id, &proof)?;
        return Ok((incoming_id, ChannelEvent::MerkleProofAccepted));
    }

    if let Some(accept) = outcome.layers.iter().find_map(|layer| match layer {
        ProtocolLayer::TransferAccept(accept) => Some(accept.clone()),
        _ => None,
    }) {
        return dispatch_transfer_accept(channel, wallet, incoming_id, &accept, response_header.as_ref());
    }

    // Any other recognised terminal layer (relationship Accept/Reject,
    // authorize, ...) is left for the application, message unprocessed.
    let terminal = outcome
        .layers
        .into_iter()
        .rev()
        .find(|layer| !matches!(layer, ProtocolLayer::Signed(_) | ProtocolLayer::Response(_)));
    match terminal {
        Some(layer) => Ok((incoming_id, ChannelEvent::Unhandled(layer))),
        None => Ok((incoming_id, ChannelEvent::Unparsed)),
    }
}

fn dispatch_merkle_proof(
    channel: &Channel,
    wallet: Option<&dyn Wallet>,
    incoming_id: u64,
    proof: &MerkleProof,
) -> Result<(), ChannelError> {
    if let Some(wallet) = wallet {
        wallet.accept_merkle_proof(proof)?;
    }
    channel.incoming.log.mark_processed(incoming_id)?;
    Ok(())
}

/// Spec §4.9 step 6 / §8 invariant 7: a `TransferAccept` either carries
/// its own transaction, or references a prior outgoing `Transfer` by the
/// response header's `referenced_id`; an unknown reference is rejected
/// with `message-not-found`.
fn dispatch_transfer_accept(
    channel: &Channel,
    wallet: Option<&dyn Wallet>,
    incoming_id: u64,
    accept: &TransferAccept,
    response_header: Option<&ResponseHeader>,
) -> Result<(u64, ChannelEvent), ChannelError> {
    if let Some(tx) = &accept.tx {
        if let Some(wallet) = wallet {
            wallet.accept_transfer_tx(tx)?;
        }
        channel.incoming.log.mark_processed(incoming_id)?;
        return Ok((incoming_id, ChannelEvent::TransferAccepted));
    }

    let referenced_id = response_header
        .map(|h| h.referenced_id)
        .or(accept.referenced_id);

    let Some(referenced_id) = referenced_id else {
        emit_reject(
            channel,
            incoming_id,
            crate::protocol::PROTOCOL_ID_RESPONSE,
            CODE_MESSAGE_NOT_FOUND,
            "transfer-accept carries no reference",
        )?;
        return Ok((
            incoming_id,
            rejected(crate::protocol::PROTOCOL_ID_RESPONSE, CODE_MESSAGE_NOT_FOUND),
        ));
    };

    match channel.outgoing.log.get(referenced_id) {
        Ok(prior) => {
            if let Some(wallet) = wallet {
                wallet.accept_transfer_tx(&prior.payload)?;
            }
            channel.incoming.log.mark_processed(incoming_id)?;
            Ok((incoming_id, ChannelEvent::TransferAccepted))
        }
        Err(_) => {
            emit_reject(
                channel,
                incoming_id,
                crate::protocol::PROTOCOL_ID_RESPONSE,
                CODE_MESSAGE_NOT_FOUND,
                format!("no outgoing message with id {referenced_id}"),
            )?;
            Ok((
                incoming_id,
                rejected(crate::protocol::PROTOCOL_ID_RESPONSE, CODE_MESSAGE_NOT_FOUND),
            ))
        }
    }
}

/// Stage an outbound message (spec §4.9 "Outbound"): wrap `inner` with
/// an optional response header and a signature, append the wire bytes
/// to the outgoing log to reserve its id, and return both.
pub fn stage_outbound(
    channel: &Channel,
    inner: EnvelopeData,
    response_to: Option<(u64, ResponseStatus, Option<(Vec<u8>, u32)>, Option<String>)>,
    include_pubkey: bool,
) -> Result<(u64, Vec<u8>), ChannelError> {
    let wrapped = match response_to {
        Some((referenced_id, status, code, note)) => {
            response::wrap(inner, referenced_id, status, code, note)
        }
        None => inner,
    };
    let signed_env = signed::wrap(wrapped, &channel.local_private_key, random_hash(), include_pubkey)?;
    let bytes = signed_env.write()?;
    let id = channel.outgoing.log.append(bytes.clone());
    Ok((id, bytes))
}
