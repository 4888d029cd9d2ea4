//! A single durable log entry (spec §3 "Message", §6 page layout).

use super::stream_store::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Position in the log; assigned once at append and never reused.
    pub id: u64,
    pub payload: Vec<u8>,
    pub timestamp: u64,
    pub is_awaiting_response: bool,
    pub is_processed: bool,
    /// A pending reject (or other reply) payload staged for this message.
    pub response: Option<Vec<u8>>,
}

impl Message {
    pub fn new(id: u64, payload: Vec<u8>, timestamp: u64) -> Self {
        Self {
            id,
            payload,
            timestamp,
            is_awaiting_response: false,
            is_processed: false,
            response: None,
        }
    }

    /// Encode this message onto `out` using the page wire format:
    /// `payload-size(u32) payload timestamp(u64) isAwaitingResponse(bool)
    /// isProcessed(bool) hasResponse(bool) response?`.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.push(u8::from(self.is_awaiting_response));
        out.push(u8::from(self.is_processed));
        out.push(u8::from(self.response.is_some()));
        if let Some(response) = &self.response {
            out.extend_from_slice(&(response.len() as u32).to_le_bytes());
            out.extend_from_slice(response);
        }
    }

    /// Decode one message starting at `*pos`, advancing it past the
    /// entry. `id` is supplied by the caller (position within the page).
    pub fn read(data: &[u8], pos: &mut usize, id: u64) -> Result<Self, StorageError> {
        let payload_len = read_u32(data, pos)? as usize;
        let payload = read_bytes(data, pos, payload_len)?;
        let timestamp = read_u64(data, pos)?;
        let is_awaiting_response = read_bool(data, pos)?;
        let is_processed = read_bool(data, pos)?;
        let has_response = read_bool(data, pos)?;
        let response = if has_response {
            let len = read_u32(data, pos)? as usize;
            Some(read_bytes(data, pos, len)?)
        } else {
            None
        };
        Ok(Self {
            id,
            payload,
            timestamp,
            is_awaiting_response,
            is_processed,
            response,
        })
    }
}

fn truncated(path: &str) -> StorageError {
    StorageError::Io {
        path: path.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated page"),
    }
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32, StorageError> {
    if data.len() - *pos < 4 {
        return Err(truncated("<page>"));
    }
    let value = u32::from_le_bytes(data[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(value)
}

fn read_u64(data: &[u8], pos: &mut usize) -> Result<u64, StorageError> {
    if data.len() - *pos < 8 {
        return Err(truncated("<page>"));
    }
    let value = u64::from_le_bytes(data[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(value)
}

fn read_bool(data: &[u8], pos: &mut usize) -> Result<bool, StorageError> {
    if data.len() - *pos < 1 {
        return Err(truncated("<page>"));
    }
    let value = data[*pos] != 0;
    *pos += 1;
    Ok(value)
}

fn read_bytes(data: &[u8], pos: &mut usize, len: usize) -> Result<Vec<u8>, StorageError> {
    if data.len() - *pos < len {
        return Err(truncated("<page>"));
    }
    let bytes = data[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_and_without_response() {
        let mut message = Message::new(3, vec![1, 2, 3], 1_700_000_000);
        message.is_awaiting_response = true;
        message.response = Some(vec![9, 9]);

        let mut buf = Vec::new();
        message.write(&mut buf);
        let mut pos = 0;
        let decoded = Message::read(&buf, &mut pos, 3).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn round_trips_minimal() {
        let message = Message::new(0, vec![], 0);
        let mut buf = Vec::new();
        message.write(&mut buf);
        let mut pos = 0;
        let decoded = Message::read(&buf, &mut pos, 0).unwrap();
        assert_eq!(decoded, message);
    }
}
