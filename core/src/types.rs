use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Prefix of every snapshot folder under the destination root.
pub const SNAPSHOT_DIR_PREFIX: &str = "backup_";

const SNAPSHOT_ID_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

/// Timestamp-derived snapshot identifier, e.g. `20261016_142530_004211`.
///
/// Ids are UTC with microsecond precision, so lexicographic order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn from_time(time: DateTime<Utc>) -> Self {
        Self(time.format(SNAPSHOT_ID_FORMAT).to_string())
    }

    pub fn now() -> Self {
        Self::from_time(Utc::now())
    }

    /// Parses a bare id or a `backup_<id>` folder name.
    pub fn parse(s: &str) -> Option<Self> {
        let raw = s.strip_prefix(SNAPSHOT_DIR_PREFIX).unwrap_or(s);
        chrono::NaiveDateTime::parse_from_str(raw, SNAPSHOT_ID_FORMAT).ok()?;
        Some(Self(raw.to_string()))
    }

    /// The id one microsecond later; used when two runs land on the same instant.
    pub fn next(&self) -> Self {
        match self.time() {
            Some(time) => Self::from_time(time + Duration::microseconds(1)),
            None => Self(format!("{}0", self.0)),
        }
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        chrono::NaiveDateTime::parse_from_str(&self.0, SNAPSHOT_ID_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn dir_name(&self) -> String {
        format!("{}{}", SNAPSHOT_DIR_PREFIX, self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Full,
    Incremental,
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotKind::Full => f.write_str("full"),
            SnapshotKind::Incremental => f.write_str("incremental"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Blake3,
}

impl HashAlgorithm {
    /// Length of the hex digest this algorithm produces.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Blake3 => 64,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(format!("unknown hash algorithm: {} (expected md5 or blake3)", other)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Md5 => f.write_str("md5"),
            HashAlgorithm::Blake3 => f.write_str("blake3"),
        }
    }
}

/// Lowercase hex content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn to_hex(&self) -> &str {
        &self.0
    }

    pub fn short_string(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl FromStr for ContentHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.is_empty() {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        Ok(Self(hex::encode(bytes)))
    }
}

impl From<md5::Digest> for ContentHash {
    fn from(digest: md5::Digest) -> Self {
        Self(format!("{:x}", digest))
    }
}

impl From<blake3::Hash> for ContentHash {
    fn from(hash: blake3::Hash) -> Self {
        Self(hash.to_hex().to_string())
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
