//! Opaque key/value blobs and expiry policies.

use std::fmt;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serialized key or value as sent by the client.
///
/// Carried as a base64 string on the wire; the server never interprets the bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Data(Vec<u8>);

impl Data {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hash used for partition routing: the first eight bytes of the
    /// BLAKE3 digest, little-endian. Identical on every node and release.
    pub fn partition_hash(&self) -> u64 {
        let digest = blake3::hash(&self.0);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(prefix)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data({})", self.to_base64())
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Data {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Data {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Data)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 data: {e}")))
    }
}

/// JCache-style expiry policy.
///
/// Each duration is in milliseconds. `None` for creation means the entry never
/// expires; `None` for access/update leaves the current expiry untouched. A
/// zero duration expires the entry immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpiryPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_ms: Option<u64>,
}

impl ExpiryPolicy {
    /// Entries never expire.
    pub fn eternal() -> Self {
        Self::default()
    }

    /// Entries expire a fixed time after creation.
    pub fn created(ttl: Duration) -> Self {
        Self {
            creation_ms: Some(ttl.as_millis() as u64),
            ..Self::default()
        }
    }

    /// Entries expire a fixed time after creation or last update.
    pub fn modified(ttl: Duration) -> Self {
        let ms = Some(ttl.as_millis() as u64);
        Self {
            creation_ms: ms,
            update_ms: ms,
            access_ms: None,
        }
    }

    /// Entries expire a fixed time after their last touch.
    pub fn touched(ttl: Duration) -> Self {
        let ms = Some(ttl.as_millis() as u64);
        Self {
            creation_ms: ms,
            access_ms: ms,
            update_ms: ms,
        }
    }

    pub fn expiry_for_creation(&self) -> Option<Duration> {
        self.creation_ms.map(Duration::from_millis)
    }

    pub fn expiry_for_access(&self) -> Option<Duration> {
        self.access_ms.map(Duration::from_millis)
    }

    pub fn expiry_for_update(&self) -> Option<Duration> {
        self.update_ms.map(Duration::from_millis)
    }
}
