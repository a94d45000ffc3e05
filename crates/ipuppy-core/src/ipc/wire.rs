//! Jupyter wire framing.
//!
//! Format (one ZeroMQ multipart message):
//! `[identities...] <IDS|MSG> signature header parent_header metadata content [buffers...]`
//!
//! The signature is the hex HMAC-SHA256 of the four JSON frames, or empty
//! when the connection key is empty.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

use super::message::{Header, Message};

/// Separator between routing identities and the message proper.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies messages with the connection key.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("enabled", &!self.key.is_empty())
            .finish()
    }
}

impl Signer {
    /// Create a signer for a connection key. An empty key disables signing.
    pub fn new(key: &str) -> Self {
        Self {
            key: key.as_bytes().to_vec(),
        }
    }

    fn mac(&self, parts: &[&[u8]]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Protocol(format!("invalid signing key: {}", e)))?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac)
    }

    /// Hex signature over the given frames.
    pub fn sign(&self, parts: &[&[u8]]) -> Result<String> {
        if self.key.is_empty() {
            return Ok(String::new());
        }
        Ok(hex::encode(self.mac(parts)?.finalize().into_bytes()))
    }

    /// Check a received signature in constant time.
    pub fn verify(&self, signature: &[u8], parts: &[&[u8]]) -> Result<()> {
        if self.key.is_empty() {
            return Ok(());
        }
        let expected = hex::decode(signature)
            .map_err(|_| Error::Protocol("signature is not valid hex".to_string()))?;
        self.mac(parts)?
            .verify_slice(&expected)
            .map_err(|_| Error::Protocol("invalid message signature".to_string()))
    }
}

/// Encode a message into frames, signing it.
pub fn encode(message: &Message, signer: &Signer) -> Result<Vec<Bytes>> {
    let header = serde_json::to_vec(&message.header)?;
    let parent = serde_json::to_vec(&message.parent_header)?;
    let metadata = serde_json::to_vec(&message.metadata)?;
    let content = serde_json::to_vec(&message.content)?;

    let signature = signer.sign(&[&header[..], &parent[..], &metadata[..], &content[..]])?;

    Ok(vec![
        Bytes::from_static(DELIMITER),
        Bytes::from(signature.into_bytes()),
        Bytes::from(header),
        Bytes::from(parent),
        Bytes::from(metadata),
        Bytes::from(content),
    ])
}

/// Decode frames into a message, verifying the signature.
///
/// Identity and topic frames before the delimiter and binary buffers after
/// the content are ignored.
pub fn decode(frames: &[Bytes], signer: &Signer) -> Result<Message> {
    let start = frames
        .iter()
        .position(|frame| frame.as_ref() == DELIMITER)
        .ok_or_else(|| Error::Protocol("missing <IDS|MSG> delimiter".to_string()))?;

    let body = &frames[start + 1..];
    if body.len() < 5 {
        return Err(Error::Protocol(format!(
            "expected at least 5 frames after delimiter, got {}",
            body.len()
        )));
    }

    let (signature, header, parent, metadata, content) =
        (&body[0], &body[1], &body[2], &body[3], &body[4]);
    signer.verify(signature, &[&header[..], &parent[..], &metadata[..], &content[..]])?;

    let header: Header = serde_json::from_slice(header)?;
    Ok(Message {
        header,
        parent_header: serde_json::from_slice(parent)?,
        metadata: serde_json::from_slice(metadata)?,
        content: serde_json::from_slice(content)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::message::MessageType;
    use serde_json::json;

    fn sample() -> Message {
        Message::request_with_id(
            "req-1",
            "sess",
            MessageType::CompleteRequest,
            json!({"code": "imp", "cursor_pos": 3}),
        )
    }

    #[test]
    fn test_encode_then_decode() {
        let signer = Signer::new("secret");
        let frames = encode(&sample(), &signer).unwrap();
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0].as_ref(), DELIMITER);
        assert_eq!(frames[1].len(), 64);

        let decoded = decode(&frames, &signer).unwrap();
        assert_eq!(decoded, sample_with_date(&decoded));
    }

    fn sample_with_date(decoded: &Message) -> Message {
        let mut expected = sample();
        expected.header.date = decoded.header.date.clone();
        expected
    }

    #[test]
    fn test_tampered_content_is_rejected() {
        let signer = Signer::new("secret");
        let mut frames = encode(&sample(), &signer).unwrap();
        frames[5] = Bytes::from_static(br#"{"code":"import os","cursor_pos":3}"#);

        let err = decode(&frames, &signer).unwrap_err();
        assert!(err.to_string().contains("invalid message signature"));
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let frames = encode(&sample(), &Signer::new("one")).unwrap();
        assert!(decode(&frames, &Signer::new("two")).is_err());
    }

    #[test]
    fn test_empty_key_disables_signing() {
        let signer = Signer::new("");
        let frames = encode(&sample(), &signer).unwrap();
        assert!(frames[1].is_empty());
        assert!(decode(&frames, &signer).is_ok());
    }

    #[test]
    fn test_topic_frames_before_delimiter_are_skipped() {
        let signer = Signer::new("k");
        let mut frames = vec![Bytes::from_static(b"kernel.abc.status")];
        frames.extend(encode(&sample(), &signer).unwrap());
        frames.push(Bytes::from_static(b"binary-buffer"));

        let decoded = decode(&frames, &signer).unwrap();
        assert_eq!(decoded.msg_id(), "req-1");
    }

    #[test]
    fn test_missing_delimiter() {
        let frames = vec![Bytes::from_static(b"{}")];
        let err = decode(&frames, &Signer::new("k")).unwrap_err();
        assert!(err.to_string().contains("delimiter"));
    }
}
