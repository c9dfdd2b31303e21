//! Page tokens: opaque, resumable positions in an object's record order.
//!
//! A token names the object it belongs to, the shard to resume in, and an
//! intra-shard cursor, plus two digests that must match on decode:
//!
//! - the catalog fingerprint of the object (its id, revision and shard
//!   paths), so any change to the object invalidates outstanding tokens;
//! - a digest of the query filter, so a token cannot be replayed against a
//!   different query.
//!
//! Text form: `v1.<base64url(JSON)>`.

use crate::registry::RegistryEntry;
use crate::{Error, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const TOKEN_VERSION: u32 = 1;
const TOKEN_PREFIX: &str = "v1.";
const MAX_TOKEN_LEN: usize = 4096;

/// Sort key of the next unconsumed record within a shard, plus how many
/// matching records sharing that key were already returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntraShardCursor {
    pub reference_name: String,
    pub start: u64,
    #[serde(default)]
    pub skip: u64,
}

/// Where a scan starts or resumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPosition {
    pub shard_index: usize,
    pub cursor: Option<IntraShardCursor>,
}

impl ScanPosition {
    pub fn at_shard(shard_index: usize) -> Self {
        Self {
            shard_index,
            cursor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageToken {
    pub version: u32,
    pub object_id: String,
    pub shard_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<IntraShardCursor>,
    pub fingerprint: String,
    pub query_digest: String,
}

pub fn encode(token: &PageToken) -> Result<String> {
    let json = serde_json::to_vec(token)
        .map_err(|e| Error::Internal(format!("failed to encode page token: {}", e)))?;
    let text = format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(json));
    if text.len() > MAX_TOKEN_LEN {
        return Err(Error::Internal("page token exceeds max length".to_string()));
    }
    Ok(text)
}

/// Parse a token without checking it against any object.
pub fn decode(text: &str) -> Result<PageToken> {
    if text.len() > MAX_TOKEN_LEN {
        return Err(Error::InvalidToken("token exceeds max length".to_string()));
    }
    let payload = text
        .strip_prefix(TOKEN_PREFIX)
        .ok_or_else(|| Error::InvalidToken("unsupported token version".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| Error::InvalidToken(format!("malformed token: {}", e)))?;
    let token: PageToken = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidToken(format!("malformed token: {}", e)))?;
    if token.version != TOKEN_VERSION {
        return Err(Error::InvalidToken("unsupported token version".to_string()));
    }
    Ok(token)
}

fn hex_digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of an entry's identity, revision and shard layout.
pub fn entry_fingerprint(entry: &RegistryEntry) -> String {
    let revision = entry.revision.to_string();
    let mut parts: Vec<&[u8]> = vec![entry.id.as_bytes(), revision.as_bytes()];
    for shard in &entry.shards {
        parts.push(shard.relative_path.as_bytes());
    }
    hex_digest(&parts)
}

/// Fingerprint of a listing: changes whenever any listed entry changes or
/// the membership changes.
pub fn listing_fingerprint(entries: &[&RegistryEntry]) -> String {
    let fingerprints: Vec<String> = entries.iter().map(|e| entry_fingerprint(e)).collect();
    let parts: Vec<&[u8]> = fingerprints.iter().map(|f| f.as_bytes()).collect();
    hex_digest(&parts)
}

pub fn query_digest<Q: Serialize>(query: &Q) -> Result<String> {
    let json = serde_json::to_vec(query)
        .map_err(|e| Error::Internal(format!("failed to encode query: {}", e)))?;
    Ok(hex_digest(&[&json]))
}

/// Binds tokens to one object, one catalog state and one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    object_id: String,
    fingerprint: String,
    query_digest: String,
}

impl Locator {
    pub fn new(
        object_id: impl Into<String>,
        fingerprint: impl Into<String>,
        query_digest: impl Into<String>,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            fingerprint: fingerprint.into(),
            query_digest: query_digest.into(),
        }
    }

    pub fn for_entry<Q: Serialize>(entry: &RegistryEntry, query: &Q) -> Result<Self> {
        Ok(Self::new(
            entry.id.clone(),
            entry_fingerprint(entry),
            query_digest(query)?,
        ))
    }

    /// Starting position for a request: the beginning, or wherever the
    /// token points after it has been checked against this locator.
    pub fn resume(&self, token: Option<&str>) -> Result<ScanPosition> {
        let Some(text) = token.filter(|t| !t.is_empty()) else {
            return Ok(ScanPosition::default());
        };
        let token = decode(text)?;
        if token.object_id != self.object_id {
            return Err(Error::InvalidToken(
                "token belongs to a different object".to_string(),
            ));
        }
        if token.query_digest != self.query_digest {
            return Err(Error::InvalidToken(
                "token belongs to a different query".to_string(),
            ));
        }
        if token.fingerprint != self.fingerprint {
            return Err(Error::InvalidToken(
                "the object changed since the token was issued; restart the query".to_string(),
            ));
        }
        Ok(ScanPosition {
            shard_index: token.shard_index,
            cursor: token.cursor,
        })
    }

    pub fn token_for(&self, position: &ScanPosition) -> Result<String> {
        encode(&PageToken {
            version: TOKEN_VERSION,
            object_id: self.object_id.clone(),
            shard_index: position.shard_index,
            cursor: position.cursor.clone(),
            fingerprint: self.fingerprint.clone(),
            query_digest: self.query_digest.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ObjectType, ShardEntry};

    fn entry(revision: u64) -> RegistryEntry {
        RegistryEntry {
            id: "vs1".to_string(),
            object_type: ObjectType::VariantSet,
            parent_id: None,
            name: "vs1".to_string(),
            relative_path: "datasets/d/variants/vs1".to_string(),
            revision,
            move_mode: None,
            shards: vec![ShardEntry {
                relative_path: "datasets/d/variants/vs1/chr1.vcf.gz".to_string(),
                index_relative_path: None,
                reference_names: vec![],
            }],
            managed_paths: vec![],
            metadata: Default::default(),
        }
    }

    fn position() -> ScanPosition {
        ScanPosition {
            shard_index: 1,
            cursor: Some(IntraShardCursor {
                reference_name: "chr2".to_string(),
                start: 1_234,
                skip: 2,
            }),
        }
    }

    #[test]
    fn test_decode_inverts_encode() {
        let token = PageToken {
            version: TOKEN_VERSION,
            object_id: "abc".to_string(),
            shard_index: 3,
            cursor: position().cursor,
            fingerprint: "f".to_string(),
            query_digest: "q".to_string(),
        };
        assert_eq!(decode(&encode(&token).unwrap()).unwrap(), token);
    }

    #[test]
    fn test_resume_round_trip() {
        let locator = Locator::for_entry(&entry(1), &("chr2", 0)).unwrap();
        let text = locator.token_for(&position()).unwrap();
        assert!(text.starts_with("v1."));
        assert_eq!(locator.resume(Some(&text)).unwrap(), position());
        assert_eq!(locator.resume(None).unwrap(), ScanPosition::default());
    }

    #[test]
    fn test_revision_change_invalidates() {
        let old = Locator::for_entry(&entry(1), &()).unwrap();
        let new = Locator::for_entry(&entry(2), &()).unwrap();
        let text = old.token_for(&position()).unwrap();
        assert!(matches!(new.resume(Some(&text)), Err(Error::InvalidToken(_))));
    }

    #[test]
    fn test_other_query_rejected() {
        let a = Locator::for_entry(&entry(1), &"chr1").unwrap();
        let b = Locator::for_entry(&entry(1), &"chr2").unwrap();
        let text = a.token_for(&position()).unwrap();
        assert!(matches!(b.resume(Some(&text)), Err(Error::InvalidToken(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        let locator = Locator::new("x", "f", "q");
        for bad in ["v1.!!!", "v2.e30", "v1.e30", "plain", &"v1.".repeat(2000)] {
            assert!(
                matches!(locator.resume(Some(bad)), Err(Error::InvalidToken(_))),
                "{bad}"
            );
        }
    }
}
