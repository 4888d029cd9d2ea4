//! A channel pairs an incoming and outgoing communication channel under
//! one local identity (spec §3 "Channel", §5 concurrency/locking).

pub mod comm;
pub mod state_machine;

use std::sync::{Arc, RwLock};

use secp256k1::{PublicKey, SecretKey};
use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::protocol::ProtocolError;
use crate::storage::{ChannelManifest, ChannelType, StorageError, StreamStore};
use crate::time::Clock;

pub use comm::CommunicationChannel;
pub use state_machine::{handle_inbound, stage_outbound, ChannelEvent};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("external identity already established for this channel")]
    AlreadyEstablished,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// The pieces guarded by the channel-wide reader-writer lock: they
/// change at most once per channel (on relationship establishment)
/// but are read on every inbound and outbound message.
struct ChannelIdentity {
    channel_type: ChannelType,
    external_public_key: Option<PublicKey>,
    external_id: Option<[u8; 32]>,
}

pub struct Channel {
    pub local_hash: [u8; 32],
    pub local_private_key: SecretKey,
    pub incoming: CommunicationChannel,
    pub outgoing: CommunicationChannel,
    identity: RwLock<ChannelIdentity>,
    store: Arc<dyn StreamStore>,
    dir: String,
}

fn channel_dir(local_hash: &[u8; 32]) -> String {
    format!("channels_client/channels/{}", hex::encode(local_hash))
}

impl Channel {
    pub fn new(
        local_hash: [u8; 32],
        local_private_key: SecretKey,
        channel_type: ChannelType,
        store: Arc<dyn StreamStore>,
        messages_per_file: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dir = channel_dir(&local_hash);
        let incoming = CommunicationChannel::new(
            Arc::clone(&store),
            format!("{dir}/incoming"),
            messages_per_file,
            Arc::clone(&clock),
        );
        let outgoing = CommunicationChannel::new(
            Arc::clone(&store),
            format!("{dir}/outgoing"),
            messages_per_file,
            clock,
        );
        Self {
            local_hash,
            local_private_key,
            incoming,
            outgoing,
            identity: RwLock::new(ChannelIdentity {
                channel_type,
                external_public_key: None,
                external_id: None,
            }),
            store,
            dir,
        }
    }

    pub fn channel_type(&self) -> ChannelType {
        self.identity.read().unwrap().channel_type
    }

    pub fn external_public_key(&self) -> Option<PublicKey> {
        self.identity.read().unwrap().external_public_key
    }

    pub fn external_id(&self) -> Option<[u8; 32]> {
        self.identity.read().unwrap().external_id
    }

    /// Bind the external public key, failing if one is already bound.
    /// Called once, when a relationship-initiation channel is accepted
    /// and promoted to a full relationship.
    pub fn bind_external_identity(
        &self,
        public_key: PublicKey,
        external_id: Option<[u8; 32]>,
    ) -> Result<(), ChannelError> {
        let mut identity = self.identity.write().unwrap();
        if identity.external_public_key.is_some() {
            return Err(ChannelError::AlreadyEstablished);
        }
        identity.external_public_key = Some(public_key);
        identity.external_id = external_id;
        identity.channel_type = ChannelType::Relationship;
        Ok(())
    }

    fn manifest_path(&self) -> String {
        format!("{}/channel", self.dir)
    }

    pub fn save(&self) -> Result<(), StorageError> {
        let manifest = {
            let identity = self.identity.read().unwrap();
            ChannelManifest {
                channel_type: identity.channel_type,
                public_key: identity.external_public_key.map(|k| k.serialize().to_vec()),
                external_id: identity.external_id,
            }
        };
        self.store.write(&self.manifest_path(), &manifest.encode())?;
        self.incoming.save()?;
        self.outgoing.save()
    }

    pub fn load(&self) -> Result<(), StorageError> {
        if let Some(bytes) = self.store.read(&self.manifest_path())? {
            let manifest = ChannelManifest::decode(&bytes)?;
            let mut identity = self.identity.write().unwrap();
            identity.channel_type = manifest.channel_type;
            identity.external_public_key = manifest
                .public_key
                .as_deref()
                .and_then(|b| PublicKey::from_slice(b).ok());
            identity.external_id = manifest.external_id;
        }
        self.incoming.load()?;
        self.outgoing.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::time::SystemClock;
    use rand::rngs::OsRng;

    fn new_channel(store: Arc<dyn StreamStore>) -> Channel {
        let secret_key = SecretKey::new(&mut OsRng);
        Channel::new(
            [1u8; 32],
            secret_key,
            ChannelType::RelationshipInitiation,
            store,
            100,
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn binding_external_identity_is_one_shot() {
        let store: Arc<dyn StreamStore> = Arc::new(InMemoryStore::new());
        let channel = new_channel(store);
        let secp = secp256k1::Secp256k1::new();
        let pubkey = PublicKey::from_secret_key(&secp, &SecretKey::new(&mut OsRng));

        channel.bind_external_identity(pubkey, Some([9u8; 32])).unwrap();
        assert_eq!(channel.channel_type(), ChannelType::Relationship);
        assert_eq!(channel.external_public_key(), Some(pubkey));

        let other = PublicKey::from_secret_key(&secp, &SecretKey::new(&mut OsRng));
        assert!(matches!(
            channel.bind_external_identity(other, None),
            Err(ChannelError::AlreadyEstablished)
        ));
    }

    #[test]
    fn save_and_load_round_trip_identity() {
        let store: Arc<dyn StreamStore> = Arc::new(InMemoryStore::new());
        let channel = new_channel(Arc::clone(&store));
        let secp = secp256k1::Secp256k1::new();
        let pubkey = PublicKey::from_secret_key(&secp, &SecretKey::new(&mut OsRng));
        channel.bind_external_identity(pubkey, Some([2u8; 32])).unwrap();
        channel.save().unwrap();

        let reloaded = Channel::new(
            [1u8; 32],
            channel.local_private_key,
            ChannelType::RelationshipInitiation,
            store,
            100,
            Arc::new(SystemClock),
        );
        reloaded.load().unwrap();
        assert_eq!(reloaded.channel_type(), ChannelType::Relationship);
        assert_eq!(reloaded.external_public_key(), Some(pubkey));
        assert_eq!(reloaded.external_id(), Some([2u8; 32]));
    }
}
