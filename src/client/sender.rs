//! Multi-endpoint outbound sender (spec §4.10 "Sender"): attempt each
//! mailbox descriptor in order, recording the last error, and succeed
//! as soon as one post succeeds. Retries/backoff are the caller's
//! responsibility (spec §4.10).

use crate::protocol::relationship::MailboxDescriptor;

use super::mailbox::{Mailbox, MailboxError};

pub async fn send_to_any(
    mailbox: &dyn Mailbox,
    descriptors: &[MailboxDescriptor],
    payload: &[u8],
) -> Result<u64, MailboxError> {
    if descriptors.is_empty() {
        return Err(MailboxError::NoEndpoints);
    }
    let mut last_error = String::new();
    for descriptor in descriptors {
        match mailbox
            .post(
                &descriptor.base_url,
                &descriptor.mailbox_id,
                descriptor.write_token.as_deref(),
                payload,
            )
            .await
        {
            Ok(sequence) => return Ok(sequence),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(MailboxError::AllEndpointsFailed {
        attempted: descriptors.len(),
        last: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mailbox::LoopbackMailbox;

    #[tokio::test]
    async fn falls_through_to_second_endpoint() {
        let mailbox = LoopbackMailbox::new();
        let account = mailbox.create_account("ignored").await.unwrap();
        let channel = mailbox
            .create_channel("ignored", &account.account_id, &account.account_token)
            .await
            .unwrap();

        let descriptors = vec![
            MailboxDescriptor {
                base_url: "ignored".to_string(),
                mailbox_id: "does-not-exist".to_string(),
                write_token: None,
            },
            MailboxDescriptor {
                base_url: "ignored".to_string(),
                mailbox_id: channel.id.clone(),
                write_token: Some(channel.write_token.clone()),
            },
        ];

        let sequence = send_to_any(&mailbox, &descriptors, b"hi").await.unwrap();
        assert_eq!(sequence, 0);
    }

    #[tokio::test]
    async fn empty_descriptor_list_fails_fast() {
        let mailbox = LoopbackMailbox::new();
        let err = send_to_any(&mailbox, &[], b"hi").await.unwrap_err();
        assert!(matches!(err, MailboxError::NoEndpoints));
    }

    #[tokio::test]
    async fn all_endpoints_failing_surfaces_last_error() {
        let mailbox = LoopbackMailbox::new();
        let descriptors = vec![MailboxDescriptor {
            base_url: "ignored".to_string(),
            mailbox_id: "nonexistent".to_string(),
            write_token: None,
        }];
        let err = send_to_any(&mailbox, &descriptors, b"hi").await.unwrap_err();
        assert!(matches!(err, MailboxError::AllEndpointsFailed { attempted: 1, .. }));
    }
}
