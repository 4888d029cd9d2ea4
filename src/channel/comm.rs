//! A single direction's durable log plus its mailbox descriptors
//! (spec §3 "Communication channel").
//!
//! Spec §5: "Each communication channel has one reader-writer lock; all
//! mutations of (in-memory messages, cursor, saved/loaded offsets,
//! mailbox descriptors) take the write lock." The mailbox descriptors
//! live inside [`MessageLog`]'s own state under its single lock (rather
//! than a second lock here), so `save()`/`load()` can never observe a
//! mailbox list that doesn't correspond to the log state it's persisted
//! alongside.

use std::sync::Arc;

use crate::protocol::relationship::MailboxDescriptor;
use crate::storage::{MessageLog, StorageError, StreamStore};
use crate::time::Clock;

pub struct CommunicationChannel {
    pub log: MessageLog,
}

impl CommunicationChannel {
    pub fn new(
        store: Arc<dyn StreamStore>,
        base_path: String,
        messages_per_file: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            log: MessageLog::new(store, base_path, messages_per_file, clock),
        }
    }

    pub fn mailboxes(&self) -> Vec<MailboxDescriptor> {
        self.log.mailboxes()
    }

    pub fn set_mailboxes(&self, mailboxes: Vec<MailboxDescriptor>) {
        self.log.set_mailboxes(mailboxes)
    }

    pub fn save(&self) -> Result<(), StorageError> {
        self.log.save()
    }

    pub fn load(&self) -> Result<(), StorageError> {
        self.log.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::time::SystemClock;

    #[test]
    fn mailboxes_survive_save_and_load() {
        let store: Arc<dyn StreamStore> = Arc::new(InMemoryStore::new());
        let comm = CommunicationChannel::new(
            Arc::clone(&store),
            "channels_client/channels/abc/incoming".to_string(),
            100,
            Arc::new(SystemClock),
        );
        comm.set_mailboxes(vec![MailboxDescriptor {
            base_url: "https://mailbox.example.com".to_string(),
            mailbox_id: "abc".to_string(),
            write_token: None,
        }]);
        comm.log.append(b"hello".to_vec());
        comm.save().unwrap();

        let reloaded = CommunicationChannel::new(
            store,
            "channels_client/channels/abc/incoming".to_string(),
            100,
            Arc::new(SystemClock),
        );
        reloaded.load().unwrap();
        assert_eq!(reloaded.mailboxes().len(), 1);
        assert_eq!(reloaded.log.message_count(), 1);
    }
}
