//! `<root>/relay/identity.json` — the relay's own stable fingerprint,
//! assigned once on first start and never regenerated.

use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::fsutil;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayIdentity {
    pub fingerprint: String,
    pub created_at: String,
}

impl RelayIdentity {
    pub fn load_or_create(path: &Path) -> std::io::Result<Self> {
        if let Some(identity) = fsutil::read_json_opt::<Self>(path)? {
            return Ok(identity);
        }

        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        let identity = Self {
            fingerprint: hex::encode(blake3::hash(&nonce).as_bytes()),
            created_at: letter_ledger::now_iso8601(),
        };
        fsutil::write_json(path, &identity)?;
        Ok(identity)
    }
}
