//! Serialized hypercall argument payloads
//!
//! Guests place argument structures in their own memory and pass a
//! pointer/length pair; the dispatcher validates ownership and then
//! decodes the bytes. [`AbiPayload`] is the encoding used for those bytes.

use serde::{Deserialize, Serialize};

/// A serialized argument structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiPayload {
    /// Serialized data (JSON for now)
    data: Vec<u8>,
}

impl AbiPayload {
    /// Serializes a value into a payload.
    pub fn new<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_vec(value)?;
        Ok(Self { data: json })
    }

    /// Wraps raw bytes read from guest memory.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Deserializes the payload into a specific type.
    pub fn deserialize<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// Returns the serialized bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        port: u32,
        flag: bool,
    }

    #[test]
    fn test_payload_round_trip() {
        let value = Sample { port: 5, flag: true };
        let payload = AbiPayload::new(&value).unwrap();
        let back: Sample = payload.deserialize().unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_malformed_payload_fails_to_decode() {
        let payload = AbiPayload::from_bytes(b"not json".to_vec());
        assert!(payload.deserialize::<Sample>().is_err());
    }
}
