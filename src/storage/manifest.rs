//! Channel and communication-channel manifests (spec §6 storage layout).

use crate::bsor::{BsorReader, BsorWriter};
use crate::protocol::relationship::MailboxDescriptor;
use crate::storage::stream_store::StorageError;

const VERSION: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    RelationshipInitiation = 0,
    Relationship = 1,
}

impl ChannelType {
    fn from_u8(value: u8) -> Result<Self, StorageError> {
        match value {
            0 => Ok(Self::RelationshipInitiation),
            1 => Ok(Self::Relationship),
            other => Err(malformed(format!("unrecognized channel type {other}"))),
        }
    }
}

fn malformed(message: String) -> StorageError {
    StorageError::Io {
        path: "<manifest>".to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, message),
    }
}

/// Top-level `.../<channel-hash-hex>/channel` manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelManifest {
    pub channel_type: ChannelType,
    pub public_key: Option<Vec<u8>>,
    pub external_id: Option<[u8; 32]>,
}

impl ChannelManifest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![VERSION, self.channel_type as u8];
        out.push(u8::from(self.public_key.is_some()));
        if let Some(key) = &self.public_key {
            out.extend_from_slice(key);
        }
        out.push(u8::from(self.external_id.is_some()));
        if let Some(id) = &self.external_id {
            out.extend_from_slice(id);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, StorageError> {
        let mut pos = 0usize;
        let version = read_byte(data, &mut pos)?;
        if version != VERSION {
            return Err(malformed(format!("unsupported manifest version {version}")));
        }
        let channel_type = ChannelType::from_u8(read_byte(data, &mut pos)?)?;
        let has_pubkey = read_byte(data, &mut pos)? != 0;
        let public_key = if has_pubkey {
            Some(read_n(data, &mut pos, 33)?)
        } else {
            None
        };
        let has_external_id = read_byte(data, &mut pos)? != 0;
        let external_id = if has_external_id {
            Some(read_n(data, &mut pos, 32)?.try_into().unwrap())
        } else {
            None
        };
        Ok(Self {
            channel_type,
            public_key,
            external_id,
        })
    }
}

/// Per-direction `.../incoming/channel` or `.../outgoing/channel` manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommChannelManifest {
    pub mailboxes: Vec<MailboxDescriptor>,
    pub message_count: u32,
    pub lowest_unprocessed: u32,
}

impl CommChannelManifest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BsorWriter::new();
        let mailbox_blobs: Vec<Vec<u8>> = self
            .mailboxes
            .iter()
            .map(|m| {
                let mut mw = BsorWriter::new();
                mw.write_str(1, &m.base_url);
                mw.write_str(2, &m.mailbox_id);
                if let Some(token) = &m.write_token {
                    mw.write_str(3, token);
                }
                mw.finish()
            })
            .collect();
        w.write_list(1, &mailbox_blobs);
        let bsor_bytes = w.finish();

        let mut out = vec![VERSION];
        out.extend_from_slice(&(bsor_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&bsor_bytes);
        out.extend_from_slice(&self.message_count.to_le_bytes());
        out.extend_from_slice(&self.lowest_unprocessed.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, StorageError> {
        let mut pos = 0usize;
        let version = read_byte(data, &mut pos)?;
        if version != VERSION {
            return Err(malformed(format!("unsupported manifest version {version}")));
        }
        let bsor_len = read_u32(data, &mut pos)? as usize;
        let bsor_bytes = read_n(data, &mut pos, bsor_len)?;
        let reader = BsorReader::parse(&bsor_bytes).map_err(|e| malformed(e.to_string()))?;
        let mailboxes = reader
            .get_list(1)
            .map_err(|e| malformed(e.to_string()))?
            .unwrap_or_default()
            .iter()
            .map(|bytes| {
                let r = BsorReader::parse(bytes).map_err(|e| malformed(e.to_string()))?;
                Ok(MailboxDescriptor {
                    base_url: r
                        .get_str(1)
                        .map_err(|e| malformed(e.to_string()))?
                        .unwrap_or_default(),
                    mailbox_id: r
                        .get_str(2)
                        .map_err(|e| malformed(e.to_string()))?
                        .unwrap_or_default(),
                    write_token: r.get_str(3).map_err(|e| malformed(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        let message_count = read_u32(data, &mut pos)?;
        let lowest_unprocessed = read_u32(data, &mut pos)?;
        Ok(Self {
            mailboxes,
            message_count,
            lowest_unprocessed,
        })
    }
}

fn read_byte(data: &[u8], pos: &mut usize) -> Result<u8, StorageError> {
    if data.len() - *pos < 1 {
        return Err(malformed("truncated manifest".to_string()));
    }
    let b = data[*pos];
    *pos += 1;
    Ok(b)
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32, StorageError> {
    if data.len() - *pos < 4 {
        return Err(malformed("truncated manifest".to_string()));
    }
    let v = u32::from_le_bytes(data[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

fn read_n(data: &[u8], pos: &mut usize, n: usize) -> Result<Vec<u8>, StorageError> {
    if data.len() - *pos < n {
        return Err(malformed("truncated manifest".to_string()));
    }
    let bytes = data[*pos..*pos + n].to_vec();
    *pos += n;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_manifest_round_trips_with_optionals() {
        let manifest = ChannelManifest {
            channel_type: ChannelType::Relationship,
            public_key: Some(vec![3u8; 33]),
            external_id: Some([4u8; 32]),
        };
        let bytes = manifest.encode();
        assert_eq!(ChannelManifest::decode(&bytes).unwrap(), manifest);
    }

    #[test]
    fn channel_manifest_round_trips_without_optionals() {
        let manifest = ChannelManifest {
            channel_type: ChannelType::RelationshipInitiation,
            public_key: None,
            external_id: None,
        };
        let bytes = manifest.encode();
        assert_eq!(ChannelManifest::decode(&bytes).unwrap(), manifest);
    }

    #[test]
    fn comm_channel_manifest_round_trips() {
        let manifest = CommChannelManifest {
            mailboxes: vec![MailboxDescriptor {
                base_url: "https://mailbox.example.com".to_string(),
                mailbox_id: "abc".to_string(),
                write_token: Some("tok".to_string()),
            }],
            message_count: 201,
            lowest_unprocessed: 101,
        };
        let bytes = manifest.encode();
        assert_eq!(CommChannelManifest::decode(&bytes).unwrap(), manifest);
    }
}
