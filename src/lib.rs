//! channels-core - peer-channels messaging stack for Bitcoin wallets
//!
//! This crate provides the wallet-to-wallet messaging transport used to
//! carry signed, ordered application messages over an untrusted mailbox
//! relay: a script-item codec, an envelope framing format, a compact
//! binary object format (BSOR), a small set of composable protocols
//! (signed message, response header, relationship), a durable per-channel
//! message log, and the client runtime that ties a mailbox, the log, and
//! the protocol stack together.
//!
//! ## Layout
//!
//! - [`script`] - push/op-code/number codec shared by the envelope format
//! - [`envelope`] - protocol-id-tagged framing around a payload script
//! - [`bsor`] - tagged binary object format used by protocol payloads
//! - [`protocol`] - the protocol registry and the built-in protocols
//! - [`channel`] - a channel's two communication directions and their state machine
//! - [`storage`] - the durable, paged message log and its pluggable backends
//! - [`client`] - mailbox abstraction, listener/dispatcher tasks, client runtime
//! - [`config`] - on-disk configuration
//! - [`time`] - injectable clock capability

pub mod bsor;
pub mod channel;
pub mod client;
pub mod config;
pub mod envelope;
pub mod protocol;
pub mod script;
pub mod storage;
pub mod time;

pub use channel::Channel;
pub use client::ChannelsClient;
pub use config::ClientConfig;
pub use envelope::EnvelopeData;
pub use script::ScriptItem;
