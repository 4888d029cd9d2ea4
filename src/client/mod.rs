//! Client runtime (spec §4.10): a listener task demultiplexing a
//! mailbox account's inbound stream to registered channels, a
//! dispatcher task driving each channel's inbound pipeline, and an
//! outbound path that stages a message on a channel's outgoing log and
//! posts it through the multi-endpoint sender.
//!
//! Grounded on the teacher's `network/peer.rs` read/write task split
//! (listener/dispatcher here play the same role as its per-peer
//! read/write tasks) and its `Arc<RwLock<...>>`-guarded peer list in
//! `network/mod.rs` (the client's channel list here).

pub mod dispatcher;
pub mod listener;
pub mod mailbox;
pub mod sender;

use std::sync::{Arc, RwLock};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelError};
use crate::config::ClientConfig;
use crate::envelope::EnvelopeData;
use crate::protocol::response::ResponseStatus;
use crate::protocol::terminal::Wallet;
use crate::protocol::{default_registry, ProtocolRegistry};

pub use mailbox::{AccountCredentials, ChannelCredentials, HttpMailbox, Mailbox, MailboxError, MailboxMessage};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
    #[error("client runtime is not running")]
    NotRunning,
    #[error("client runtime is already running")]
    AlreadyRunning,
}

/// A running client's two tasks plus the interrupt used to stop them
/// (spec §4.10 "Shutdown"). Dropping this without calling
/// [`RunningClient::shutdown`] leaves the tasks running detached.
pub struct RunningClient {
    interrupt_tx: watch::Sender<bool>,
    listener: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl RunningClient {
    /// Signal the listener to stop, let the dispatcher drain the queue,
    /// and wait for both tasks to finish (spec §4.10: "a wait barrier
    /// joins both before return").
    pub async fn shutdown(self) {
        let _ = self.interrupt_tx.send(true);
        let _ = self.listener.await;
        let _ = self.dispatcher.await;
    }
}

/// Ties a mailbox account, the registered channels, and the protocol
/// registry together (spec §4.10). One `ChannelsClient` corresponds to
/// one mailbox account subscription.
pub struct ChannelsClient {
    mailbox_base_url: String,
    mailbox_account_id: String,
    mailbox_account_token: String,
    dispatch_queue_depth: usize,
    mailbox: Arc<dyn Mailbox>,
    registry: Arc<ProtocolRegistry>,
    wallet: Option<Arc<dyn Wallet>>,
    channels: Arc<RwLock<Vec<Arc<Channel>>>>,
}

impl ChannelsClient {
    pub fn new(config: &ClientConfig, mailbox: Arc<dyn Mailbox>) -> Self {
        Self {
            mailbox_base_url: config.mailbox_account.base_url.clone(),
            mailbox_account_id: config.mailbox_account.account_id.clone(),
            mailbox_account_token: config.mailbox_account.account_token.clone(),
            dispatch_queue_depth: config.dispatch_queue_depth,
            mailbox,
            registry: Arc::new(default_registry()),
            wallet: None,
            channels: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Register a channel so the dispatcher can route inbound messages
    /// whose mailbox-id matches one of its incoming mailboxes.
    pub fn register_channel(&self, channel: Arc<Channel>) {
        self.channels.write().unwrap().push(channel);
    }

    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.read().unwrap().clone()
    }

    /// Start the listener and dispatcher tasks (spec §4.10). Returns a
    /// handle used to shut both down.
    pub fn start(&self) -> RunningClient {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(self.dispatch_queue_depth.max(1));
        let (interrupt_tx, interrupt_rx) = watch::channel(false);

        let listener = listener::spawn(
            Arc::clone(&self.mailbox),
            self.mailbox_base_url.clone(),
            self.mailbox_account_id.clone(),
            self.mailbox_account_token.clone(),
            dispatch_tx,
            interrupt_rx,
        );

        let dispatcher = tokio::spawn(dispatcher::run(
            dispatch_rx,
            Arc::clone(&self.channels),
            Arc::clone(&self.registry),
            self.wallet.clone(),
        ));

        RunningClient {
            interrupt_tx,
            listener,
            dispatcher,
        }
    }

    /// Stage `inner` as a new outgoing message on `channel` (optionally
    /// wrapped with a response header correlating to `response_to`),
    /// then post it to every mailbox descriptor on the channel's
    /// outgoing side until one accepts it (spec §4.9 "Outbound",
    /// §4.10 "Sender").
    pub async fn send(
        &self,
        channel: &Channel,
        inner: EnvelopeData,
        response_to: Option<(u64, ResponseStatus, Option<(Vec<u8>, u32)>, Option<String>)>,
        include_pubkey: bool,
    ) -> Result<u64, ClientError> {
        let (id, bytes) = crate::channel::stage_outbound(channel, inner, response_to, include_pubkey)?;
        let mailboxes = channel.outgoing.mailboxes();
        sender::send_to_any(self.mailbox.as_ref(), &mailboxes, &bytes).await?;
        Ok(id)
    }
}
