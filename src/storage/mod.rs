//! Durable, paged message log and its pluggable storage backend
//! (spec §4.8, §6 storage layout, §9 stream-store capability).

pub mod manifest;
pub mod message;
pub mod message_log;
pub mod stream_store;

pub use manifest::{ChannelManifest, ChannelType, CommChannelManifest};
pub use message::Message;
pub use message_log::MessageLog;
pub use stream_store::{FilesystemStore, InMemoryStore, StorageError, StreamStore};
