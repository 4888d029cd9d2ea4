//! Dispatcher task (spec §4.10 "Dispatcher"): drains the bounded queue
//! fed by the listener and feeds each payload into the inbound pipeline
//! of whichever registered channel's incoming mailbox matches.

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel::{handle_inbound, Channel, ChannelEvent};
use crate::protocol::terminal::Wallet;
use crate::protocol::ProtocolRegistry;

use super::mailbox::MailboxMessage;

/// Linear scan over registered channels (spec §4.10: "a small
/// mailbox-id → channel index is permissible", not required).
fn find_channel(channels: &[Arc<Channel>], mailbox_id: &str) -> Option<Arc<Channel>> {
    channels
        .iter()
        .find(|channel| {
            channel
                .incoming
                .mailboxes()
                .iter()
                .any(|descriptor| descriptor.mailbox_id == mailbox_id)
        })
        .cloned()
}

/// Drive the dispatcher loop until `inbound` closes (the listener
/// dropped its sender, e.g. on shutdown). Returns the events produced,
/// most recent last, so an embedding caller (tests, the client runtime)
/// can observe what happened without a separate callback mechanism.
pub async fn run(
    mut inbound: mpsc::Receiver<MailboxMessage>,
    channels: Arc<RwLock<Vec<Arc<Channel>>>>,
    registry: Arc<ProtocolRegistry>,
    wallet: Option<Arc<dyn Wallet>>,
) {
    while let Some(message) = inbound.recv().await {
        dispatch_one(&channels, &registry, wallet.as_deref(), message);
    }
    debug!("dispatcher queue drained, exiting");
}

fn dispatch_one(
    channels: &Arc<RwLock<Vec<Arc<Channel>>>>,
    registry: &ProtocolRegistry,
    wallet: Option<&dyn Wallet>,
    message: MailboxMessage,
) -> Option<ChannelEvent> {
    let snapshot: Vec<Arc<Channel>> = channels.read().unwrap().clone();
    let Some(channel) = find_channel(&snapshot, &message.channel_id) else {
        warn!(mailbox_id = %message.channel_id, "no channel registered for inbound mailbox, dropping message");
        return None;
    };

    match handle_inbound(&channel, registry, wallet, message.payload) {
        Ok((id, event)) => {
            debug!(id, mailbox_id = %message.channel_id, event = ?event, "dispatched inbound message");
            Some(event)
        }
        Err(e) => {
            warn!(mailbox_id = %message.channel_id, error = %e, "error processing inbound message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::default_registry;
    use crate::protocol::relationship::{self, Identity, MailboxDescriptor, RelationshipBody, RelationshipMessage};
    use crate::protocol::signed;
    use crate::storage::{ChannelType, InMemoryStore};
    use crate::time::SystemClock;
    use rand::rngs::OsRng;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    fn new_channel(mailbox_id: &str) -> Arc<Channel> {
        let secret_key = SecretKey::new(&mut OsRng);
        let channel = Channel::new(
            [1u8; 32],
            secret_key,
            ChannelType::Relationship,
            Arc::new(InMemoryStore::new()),
            100,
            Arc::new(SystemClock),
        );
        channel.incoming.set_mailboxes(vec![MailboxDescriptor {
            base_url: "https://mailbox.example.com".to_string(),
            mailbox_id: mailbox_id.to_string(),
            write_token: None,
        }]);
        Arc::new(channel)
    }

    #[test]
    fn routes_to_channel_whose_incoming_mailbox_matches() {
        let channels: Arc<RwLock<Vec<Arc<Channel>>>> = Arc::new(RwLock::new(vec![
            new_channel("mailbox-a"),
            new_channel("mailbox-b"),
        ]));
        let registry = Arc::new(default_registry());

        let secp = Secp256k1::new();
        let peer_secret = SecretKey::new(&mut OsRng);
        let peer_pubkey = PublicKey::from_secret_key(&secp, &peer_secret);
        let body = RelationshipBody {
            identity: Identity {
                public_key: Some(peer_pubkey.serialize().to_vec()),
                ..Default::default()
            },
            mailboxes: vec![],
            supported_protocols: vec![],
        };
        let inner = relationship::wrap(&RelationshipMessage::Initiation(body));
        let signed_env = signed::wrap(inner, &peer_secret, [8u8; 32], true).unwrap();
        let payload = signed_env.write().unwrap();

        let message = MailboxMessage {
            channel_id: "mailbox-b".to_string(),
            content_type: "application/octet-stream".to_string(),
            sequence: 0,
            received_at: 0,
            payload,
        };

        let event = dispatch_one(&channels, &registry, None, message);
        assert!(matches!(event, Some(ChannelEvent::Established { .. })));

        let snapshot = channels.read().unwrap();
        assert_eq!(snapshot[0].incoming.log.message_count(), 0);
        assert_eq!(snapshot[1].incoming.log.message_count(), 1);
    }

    #[test]
    fn unmatched_mailbox_is_dropped_without_panicking() {
        let channels: Arc<RwLock<Vec<Arc<Channel>>>> =
            Arc::new(RwLock::new(vec![new_channel("mailbox-a")]));
        let registry = Arc::new(default_registry());
        let message = MailboxMessage {
            channel_id: "unknown".to_string(),
            content_type: "application/octet-stream".to_string(),
            sequence: 0,
            received_at: 0,
            payload: vec![1, 2, 3],
        };
        assert!(dispatch_one(&channels, &registry, None, message).is_none());
    }
}
