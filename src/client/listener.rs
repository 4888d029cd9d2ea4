//! Mailbox listener task (spec §4.10 "Listener"). Grounded on the
//! teacher's `Peer::from_transport_connection` read-task split in
//! `network/peer.rs`: there a TCP socket read loop feeds an unbounded
//! channel that a separate task drains; here the mailbox's `listen`
//! stream feeds a bounded queue that the dispatcher drains, and an
//! interrupt signal takes the place of the socket closing.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::mailbox::{Mailbox, MailboxMessage};

/// Spawn the listener task. It opens the mailbox subscription, then
/// forwards each inbound message onto `dispatch_tx` until either the
/// mailbox stream closes or `interrupt` fires. A send racing an
/// interrupt is dropped rather than allowed to block shutdown (spec §5:
/// "non-blocking on shutdown").
pub fn spawn(
    mailbox: Arc<dyn Mailbox>,
    base_url: String,
    account_id: String,
    account_token: String,
    dispatch_tx: mpsc::Sender<MailboxMessage>,
    mut interrupt: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(account_id = %account_id, "mailbox listener starting");

        if *interrupt.borrow() {
            debug!("interrupt already set before listener started, exiting immediately");
            return;
        }

        let mut inbound = tokio::select! {
            biased;
            _ = interrupt.changed() => {
                debug!("mailbox listener interrupted before subscribing");
                return;
            }
            result = mailbox.listen(&base_url, &account_id, &account_token) => {
                match result {
                    Ok(inbound) => inbound,
                    Err(e) => {
                        warn!(account_id = %account_id, error = %e, "mailbox listener failed to subscribe");
                        return;
                    }
                }
            }
        };

        loop {
            tokio::select! {
                biased;
                changed = interrupt.changed() => {
                    if changed.is_err() || *interrupt.borrow() {
                        debug!("mailbox listener received interrupt, shutting down");
                        break;
                    }
                }
                message = inbound.recv() => {
                    let Some(message) = message else {
                        debug!("mailbox listen stream closed");
                        break;
                    };
                    tokio::select! {
                        biased;
                        changed = interrupt.changed() => {
                            if changed.is_err() || *interrupt.borrow() {
                                debug!("dropping in-flight message, interrupt fired during send");
                                break;
                            }
                        }
                        send_result = dispatch_tx.send(message) => {
                            if send_result.is_err() {
                                debug!("dispatch queue closed, listener stopping");
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!(account_id = %account_id, "mailbox listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mailbox::LoopbackMailbox;
    use std::time::Duration;

    #[tokio::test]
    async fn forwards_inbound_messages_until_interrupted() {
        let mailbox: Arc<dyn Mailbox> = Arc::new(LoopbackMailbox::new());
        let account = mailbox.create_account("ignored").await.unwrap();
        let channel = mailbox
            .create_channel("ignored", &account.account_id, &account.account_token)
            .await
            .unwrap();

        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(8);
        let (interrupt_tx, interrupt_rx) = watch::channel(false);

        let handle = spawn(
            Arc::clone(&mailbox),
            "ignored".to_string(),
            account.account_id.clone(),
            account.account_token.clone(),
            dispatch_tx,
            interrupt_rx,
        );

        // Give the spawned task a chance to subscribe before posting.
        tokio::time::sleep(Duration::from_millis(20)).await;

        mailbox
            .post("ignored", &channel.id, Some(&channel.write_token), b"payload")
            .await
            .unwrap();

        let received = dispatch_rx.recv().await.unwrap();
        assert_eq!(received.payload, b"payload");

        interrupt_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
