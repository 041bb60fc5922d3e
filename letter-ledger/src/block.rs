//! The append-only unit of the ledger: `Block`, `LetterEntry`, and the
//! `ChainManifest` summary exported to peers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::LedgerError;

/// A single letter living inside a block. The ledger never inspects `payload`
/// — it is the opaque encrypted envelope produced by `letter-crypto` (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LetterEntry {
    pub owner_fingerprint: String,
    pub payload: String,
}

/// One block in the hash-linked chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: String,
    pub previous_hash: Option<String>,
    pub letters: Vec<LetterEntry>,
    pub relay_metrics: Value,
    pub summary: String,
    pub hash: String,
}

/// Mirrors `Block` minus `hash`: this is the exact shape that gets
/// canonicalized and hashed to produce `Block::hash`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockHashInput<'a> {
    index: u64,
    timestamp: &'a str,
    previous_hash: &'a Option<String>,
    letters: &'a [LetterEntry],
    relay_metrics: &'a Value,
    summary: &'a str,
}

impl Block {
    /// The first block of a fresh chain: index 0, no previous hash, no letters.
    pub fn genesis(timestamp: String) -> Result<Self, LedgerError> {
        let mut block = Block {
            index: 0,
            timestamp,
            previous_hash: None,
            letters: Vec::new(),
            relay_metrics: Value::Object(Default::default()),
            summary: "genesis".to_string(),
            hash: String::new(),
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    /// Build the next block on top of `previous`, carrying a single letter.
    pub fn next(
        previous: &Block,
        timestamp: String,
        letter: LetterEntry,
        relay_metrics: Value,
        summary: String,
    ) -> Result<Self, LedgerError> {
        let mut block = Block {
            index: previous.index + 1,
            timestamp,
            previous_hash: Some(previous.hash.clone()),
            letters: vec![letter],
            relay_metrics,
            summary,
            hash: String::new(),
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    /// Recompute `hash` from every other field. `hash` is a fixed point of
    /// this function for any block that has not been tampered with.
    pub fn compute_hash(&self) -> Result<String, LedgerError> {
        let input = BlockHashInput {
            index: self.index,
            timestamp: &self.timestamp,
            previous_hash: &self.previous_hash,
            letters: &self.letters,
            relay_metrics: &self.relay_metrics,
            summary: &self.summary,
        };
        Ok(letter_atom::hash_serializable(&input)?)
    }

    pub fn verify_hash(&self) -> Result<bool, LedgerError> {
        Ok(self.compute_hash()? == self.hash)
    }
}

/// The summary of a chain exported to peers (§3 Chain Manifest).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainManifest {
    pub length: u64,
    pub hashes: Vec<String>,
    pub latest_hash: Option<String>,
    pub checksum: String,
}

impl ChainManifest {
    pub fn from_blocks(blocks: &[Block]) -> Result<Self, LedgerError> {
        let hashes: Vec<String> = blocks.iter().map(|b| b.hash.clone()).collect();
        let latest_hash = hashes.last().cloned();
        let checksum = letter_atom::hash_serializable(&hashes)?;
        Ok(Self {
            length: blocks.len() as u64,
            hashes,
            latest_hash,
            checksum,
        })
    }
}

/// Result of validating a candidate chain, reported rather than raised as an
/// error — an invalid chain is an expected, inspectable outcome.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub ok: bool,
    pub reason: Option<String>,
}

impl ValidationResult {
    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// Verify self-hashes and the previous-hash/index linkage across `blocks`,
/// reporting the first failure encountered.
pub fn validate_chain(blocks: &[Block]) -> Result<ValidationResult, LedgerError> {
    if blocks.is_empty() {
        return Ok(ValidationResult::invalid("chain is empty"));
    }

    for (i, block) in blocks.iter().enumerate() {
        if block.compute_hash()? != block.hash {
            return Ok(ValidationResult::invalid(format!(
                "block {i} hash does not match its contents"
            )));
        }

        if i > 0 {
            let previous = &blocks[i - 1];
            if block.previous_hash.as_deref() != Some(previous.hash.as_str()) {
                return Ok(ValidationResult::invalid(format!(
                    "block {i} previousHash does not match block {}'s hash",
                    i - 1
                )));
            }
            if block.index != previous.index + 1 {
                return Ok(ValidationResult::invalid(format!(
                    "block {i} index is not sequential"
                )));
            }
        }
    }

    Ok(ValidationResult {
        ok: true,
        reason: None,
    })
}

/// Current UTC time as an RFC3339 string, the ledger's `timestamp` format.
pub fn now_iso8601() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .expect("RFC3339 formatting of the current time cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn letter() -> LetterEntry {
        LetterEntry {
            owner_fingerprint: "fp1".into(),
            payload: "env1".into(),
        }
    }

    #[test]
    fn genesis_is_self_consistent() {
        let g = Block::genesis("2026-01-01T00:00:00Z".into()).unwrap();
        assert_eq!(g.index, 0);
        assert!(g.previous_hash.is_none());
        assert!(g.verify_hash().unwrap());
    }

    #[test]
    fn next_links_to_previous() {
        let g = Block::genesis("2026-01-01T00:00:00Z".into()).unwrap();
        let b1 = Block::next(&g, "2026-01-01T00:01:00Z".into(), letter(), json!({}), "ok".into()).unwrap();
        assert_eq!(b1.index, 1);
        assert_eq!(b1.previous_hash.as_deref(), Some(g.hash.as_str()));
        assert!(b1.verify_hash().unwrap());
    }

    #[test]
    fn tampering_breaks_self_hash() {
        let g = Block::genesis("2026-01-01T00:00:00Z".into()).unwrap();
        let mut b1 =
            Block::next(&g, "2026-01-01T00:01:00Z".into(), letter(), json!({}), "ok".into()).unwrap();
        b1.summary = "tampered".into();
        assert!(!b1.verify_hash().unwrap());
    }

    #[test]
    fn validate_chain_accepts_well_formed_chain() {
        let g = Block::genesis("2026-01-01T00:00:00Z".into()).unwrap();
        let b1 = Block::next(&g, "2026-01-01T00:01:00Z".into(), letter(), json!({}), "ok".into()).unwrap();
        let result = validate_chain(&[g, b1]).unwrap();
        assert!(result.ok);
        assert!(result.reason.is_none());
    }

    #[test]
    fn validate_chain_rejects_empty() {
        let result = validate_chain(&[]).unwrap();
        assert!(!result.ok);
    }

    #[test]
    fn validate_chain_reports_first_broken_link() {
        let g = Block::genesis("2026-01-01T00:00:00Z".into()).unwrap();
        let mut b1 =
            Block::next(&g, "2026-01-01T00:01:00Z".into(), letter(), json!({}), "ok".into()).unwrap();
        b1.previous_hash = Some("not-the-real-hash".into());
        let result = validate_chain(&[g, b1]).unwrap();
        assert!(!result.ok);
        assert!(result.reason.unwrap().contains("block 1"));
    }

    #[test]
    fn manifest_tracks_length_and_latest_hash() {
        let g = Block::genesis("2026-01-01T00:00:00Z".into()).unwrap();
        let b1 = Block::next(&g, "2026-01-01T00:01:00Z".into(), letter(), json!({}), "ok".into()).unwrap();
        let manifest = ChainManifest::from_blocks(&[g.clone(), b1.clone()]).unwrap();
        assert_eq!(manifest.length, 2);
        assert_eq!(manifest.latest_hash.as_deref(), Some(b1.hash.as_str()));
        assert_eq!(manifest.hashes, vec![g.hash, b1.hash]);
    }

    #[test]
    fn manifests_with_identical_hashes_are_equal() {
        let g = Block::genesis("2026-01-01T00:00:00Z".into()).unwrap();
        let b1 = Block::next(&g, "2026-01-01T00:01:00Z".into(), letter(), json!({}), "ok".into()).unwrap();
        let m1 = ChainManifest::from_blocks(&[g.clone(), b1.clone()]).unwrap();
        let m2 = ChainManifest::from_blocks(&[g, b1]).unwrap();
        assert_eq!(m1, m2);
    }
}
