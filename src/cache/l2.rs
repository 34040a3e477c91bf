//! L2 distributed cache (§4.6.2)
//!
//! Serializes a permission set as a gzip-compressed JSON list. Any decode
//! failure is treated as a miss and logged — never propagated, per the
//! "caller treats missing as fetch-from-source" contract.

use std::collections::HashSet;
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::warn;

use crate::error::Result;
use crate::store::StoreClient;

pub struct L2Cache {
    store: StoreClient,
    ttl_s: u64,
}

impl L2Cache {
    pub fn new(store: StoreClient, ttl_s: u64) -> Self {
        Self { store, ttl_s }
    }

    pub async fn get(&self, key: &str) -> Option<HashSet<String>> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "L2 get failed");
                return None;
            }
        };

        match decode(&raw) {
            Ok(set) => Some(set),
            Err(e) => {
                warn!(key, error = %e, "L2 payload decode failed");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &HashSet<String>) -> Result<()> {
        let encoded = encode(value)?;
        self.store.set_ex(key, &encoded, self.ttl_s).await
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        self.store.del(key).await.map(|_| ())
    }
}

fn encode(set: &HashSet<String>) -> Result<String> {
    let list: Vec<&String> = set.iter().collect();
    let json = serde_json::to_vec(&list)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(|e| {
        crate::error::Error::SerializationError(format!("gzip encode: {e}"))
    })?;
    let bytes = encoder.finish().map_err(|e| {
        crate::error::Error::SerializationError(format!("gzip finish: {e}"))
    })?;
    Ok(BASE64.encode(bytes))
}

fn decode(raw: &str) -> Result<HashSet<String>> {
    let bytes = BASE64
        .decode(raw)
        .map_err(|e| crate::error::Error::SerializationError(format!("base64 decode: {e}")))?;
    let mut decoder = GzDecoder::new(bytes.as_slice());
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).map_err(|e| {
        crate::error::Error::SerializationError(format!("gzip decode: {e}"))
    })?;
    let list: Vec<String> = serde_json::from_slice(&json)?;
    Ok(list.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut set = HashSet::new();
        set.insert("read_channel".to_string());
        set.insert("send_message".to_string());
        let encoded = encode(&set).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(set, decoded);
    }
}
