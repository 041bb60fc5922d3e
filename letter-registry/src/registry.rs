//! Directory-side relay tracking: upsert-by-onion, canonical manifest
//! maintenance, and sync-status diagnostics (§4.4).

use std::collections::HashMap;
use std::path::PathBuf;

use letter_ledger::{now_iso8601, ChainManifest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::fsutil;
use crate::selector::SelectorInput;
use crate::RegistryError;

const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// What a relay reports in its heartbeat POST (`/api/relays`, §6.1).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub onion: String,
    pub public_url: String,
    #[serde(default)]
    pub public_access_url: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub reachability: Option<f64>,
    #[serde(default)]
    pub gfw_blocked: Option<bool>,
    #[serde(default)]
    pub chain_summary: Option<ChainManifest>,
}

/// Diagnostic comparison of one relay's chain against the canonical manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub needs_sync: bool,
    pub needs_repair: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub missing_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub diverge_at: Option<u64>,
}

/// A known relay and everything the directory has observed about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRecord {
    pub id: String,
    pub onion: String,
    pub public_url: String,
    #[serde(default)]
    pub public_access_url: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    pub fingerprint: String,
    pub created_at: String,
    pub last_seen: String,
    #[serde(default)]
    pub last_seen_ip: Option<String>,
    pub connection_meta: Value,
    #[serde(default)]
    pub chain_summary: Option<ChainManifest>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub reachability: Option<f64>,
    #[serde(default)]
    pub gfw_blocked: bool,
    #[serde(default)]
    pub metrics_sampled_at: Option<String>,
    #[serde(default)]
    pub metrics_source: Option<String>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

/// Pairs a [`RelayRecord`] with its freshness relative to the canonical
/// manifest so it can be scored by the selector without the selector
/// needing to know anything about manifests.
pub struct RelayCandidate<'a> {
    pub record: &'a RelayRecord,
    pub chain_freshness: Option<f64>,
}

impl SelectorInput for RelayCandidate<'_> {
    fn latency_ms(&self) -> Option<f64> {
        self.record.latency_ms
    }

    fn reachability(&self) -> Option<f64> {
        self.record.reachability
    }

    fn chain_freshness(&self) -> Option<f64> {
        self.chain_freshness
    }

    fn gfw_blocked(&self) -> bool {
        self.record.gfw_blocked
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DirectoryState {
    relays: Vec<RelayRecord>,
    canonical_manifest: Option<ChainManifest>,
}

/// The directory's full table of known relays plus the canonical manifest,
/// persisted as one JSON document (§6.2 `directory-state.json`). All writes
/// serialize through `&mut self` — callers are expected to hold this behind
/// a single async mutex (§5 Realization notes), so readers always see a
/// consistent pre- or post-upsert snapshot.
#[derive(Debug)]
pub struct Registry {
    relays: HashMap<String, RelayRecord>,
    canonical_manifest: Option<ChainManifest>,
    path: PathBuf,
}

impl Registry {
    pub fn load_or_init(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let state: DirectoryState = fsutil::read_json_opt(&path)?.unwrap_or_default();
        let relays = state.relays.into_iter().map(|r| (r.onion.clone(), r)).collect();
        Ok(Self {
            relays,
            canonical_manifest: state.canonical_manifest,
            path,
        })
    }

    pub fn relays(&self) -> impl Iterator<Item = &RelayRecord> {
        self.relays.values()
    }

    pub fn get(&self, onion: &str) -> Option<&RelayRecord> {
        self.relays.get(onion)
    }

    pub fn canonical_manifest(&self) -> Option<&ChainManifest> {
        self.canonical_manifest.as_ref()
    }

    /// Upsert a relay from a heartbeat (§4.4). `client_addr` is the observed
    /// TCP peer address, used for loopback substitution.
    pub fn upsert(
        &mut self,
        payload: HeartbeatPayload,
        client_addr: Option<&str>,
    ) -> Result<&RelayRecord, RegistryError> {
        let now = now_iso8601();
        let resolved_public_url = resolve_public_url(&payload.public_url, client_addr);

        let existing = self.relays.remove(&payload.onion);
        let mut record = existing.unwrap_or_else(|| RelayRecord {
            id: payload.onion.clone(),
            onion: payload.onion.clone(),
            public_url: resolved_public_url.clone(),
            public_access_url: None,
            nickname: None,
            fingerprint: payload
                .fingerprint
                .clone()
                .unwrap_or_else(|| synthesize_fingerprint(&payload.onion)),
            created_at: now.clone(),
            last_seen: now.clone(),
            last_seen_ip: None,
            connection_meta: Value::Object(Default::default()),
            chain_summary: None,
            latency_ms: None,
            reachability: None,
            gfw_blocked: false,
            metrics_sampled_at: None,
            metrics_source: None,
            sync_status: SyncStatus::default(),
        });

        record.public_url = resolved_public_url;
        if let Some(access_url) = &payload.public_access_url {
            if !access_url.is_empty() {
                record.public_access_url = Some(access_url.clone());
                record.public_url = access_url.clone();
            }
        }
        record.nickname = payload.nickname.clone().or_else(|| record.nickname.clone());
        if let Some(fp) = &payload.fingerprint {
            record.fingerprint = fp.clone();
        }
        record.last_seen = now.clone();
        record.last_seen_ip = client_addr.map(str::to_string);
        record.connection_meta = serde_json::json!({
            "reportedUrl": payload.public_url,
            "resolvedUrl": record.public_url,
            "clientAddr": client_addr,
        });

        let mut canonical_advanced = false;
        if let Some(summary) = &payload.chain_summary {
            if self
                .canonical_manifest
                .as_ref()
                .map(|c| summary.length > c.length)
                .unwrap_or(true)
            {
                info!(relay_id = %record.id, length = summary.length, "canonical manifest advanced");
                self.canonical_manifest = Some(summary.clone());
                canonical_advanced = true;
            }
            record.chain_summary = Some(summary.clone());
        }

        if payload.latency_ms.is_some() || payload.reachability.is_some() || payload.gfw_blocked.is_some() {
            record.latency_ms = payload.latency_ms.or(record.latency_ms);
            record.reachability = payload.reachability.or(record.reachability);
            record.gfw_blocked = payload.gfw_blocked.unwrap_or(record.gfw_blocked);
            record.metrics_sampled_at = Some(now.clone());
            record.metrics_source = Some("heartbeat".to_string());
        }

        record.sync_status = compute_sync_status(record.chain_summary.as_ref(), self.canonical_manifest.as_ref());

        self.relays.insert(payload.onion.clone(), record);
        if canonical_advanced {
            // Every other peer's sync status was computed against the stale
            // canonical manifest; re-flag them all now that it has moved.
            self.refresh_sync_statuses()?;
        } else {
            self.persist()?;
        }
        Ok(self.relays.get(&payload.onion).expect("just inserted"))
    }

    /// Apply a reachability probe result to an already-known relay (§4.4
    /// "Reachability probing"). Unlike heartbeat metrics, a probe always
    /// overwrites rather than merging, since it's a fresh independent
    /// observation. No-op if the relay has since been forgotten.
    pub fn record_probe(&mut self, onion: &str, outcome: crate::ProbeOutcome) -> Result<(), RegistryError> {
        let Some(record) = self.relays.get_mut(onion) else {
            return Ok(());
        };
        record.latency_ms = outcome.latency_ms.map(|ms| ms as f64);
        record.reachability = Some(outcome.reachability);
        record.gfw_blocked = outcome.gfw_blocked;
        record.metrics_sampled_at = Some(now_iso8601());
        record.metrics_source = Some("probe".to_string());
        self.persist()
    }

    /// Re-evaluate every relay's `syncStatus` against the current canonical
    /// manifest (used e.g. after a canonical update from a different relay).
    pub fn refresh_sync_statuses(&mut self) -> Result<(), RegistryError> {
        let canonical = self.canonical_manifest.clone();
        for record in self.relays.values_mut() {
            record.sync_status = compute_sync_status(record.chain_summary.as_ref(), canonical.as_ref());
        }
        self.persist()
    }

    /// Candidates for the selector, annotated with chain freshness relative
    /// to the canonical manifest, excluding `exclude_onion` (self).
    pub fn candidates(&self, exclude_onion: Option<&str>) -> Vec<RelayCandidate<'_>> {
        self.relays
            .values()
            .filter(|r| Some(r.onion.as_str()) != exclude_onion)
            .filter(|r| !r.public_url.is_empty())
            .map(|record| RelayCandidate {
                record,
                chain_freshness: chain_freshness(record.chain_summary.as_ref(), self.canonical_manifest.as_ref()),
            })
            .collect()
    }

    fn persist(&self) -> Result<(), RegistryError> {
        let state = DirectoryState {
            relays: self.relays.values().cloned().collect(),
            canonical_manifest: self.canonical_manifest.clone(),
        };
        fsutil::write_json(&self.path, &state)
    }
}

fn resolve_public_url(reported: &str, client_addr: Option<&str>) -> String {
    let is_loopback = LOOPBACK_HOSTS.iter().any(|h| reported.contains(h));
    match (is_loopback, client_addr) {
        (true, Some(addr)) if !LOOPBACK_HOSTS.iter().any(|h| addr.contains(h)) => addr.to_string(),
        _ => reported.to_string(),
    }
}

fn synthesize_fingerprint(onion: &str) -> String {
    hex::encode(blake3::hash(onion.as_bytes()).as_bytes())
}

fn chain_freshness(relay: Option<&ChainManifest>, canonical: Option<&ChainManifest>) -> Option<f64> {
    match (relay, canonical) {
        (Some(relay), Some(canonical)) if canonical.length > 0 => {
            Some((relay.length as f64 / canonical.length as f64).min(1.0))
        }
        _ => None,
    }
}

fn compute_sync_status(relay: Option<&ChainManifest>, canonical: Option<&ChainManifest>) -> SyncStatus {
    let (relay, canonical) = match (relay, canonical) {
        (Some(r), Some(c)) => (r, c),
        _ => return SyncStatus::default(),
    };

    let min_len = relay.hashes.len().min(canonical.hashes.len());
    let diverge_at = (0..min_len).find(|&i| relay.hashes[i] != canonical.hashes[i]);

    match diverge_at {
        Some(d) => SyncStatus {
            needs_sync: false,
            needs_repair: true,
            missing_count: None,
            diverge_at: Some(d as u64),
        },
        None if relay.length < canonical.length => SyncStatus {
            needs_sync: true,
            needs_repair: false,
            missing_count: Some(canonical.length - relay.length),
            diverge_at: None,
        },
        None => SyncStatus::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use letter_ledger::ChainManifest;
    use tempfile::tempdir;

    fn manifest(hashes: &[&str]) -> ChainManifest {
        ChainManifest {
            length: hashes.len() as u64,
            hashes: hashes.iter().map(|s| s.to_string()).collect(),
            latest_hash: hashes.last().map(|s| s.to_string()),
            checksum: "ignored-in-tests".to_string(),
        }
    }

    fn heartbeat(onion: &str, manifest: Option<ChainManifest>) -> HeartbeatPayload {
        HeartbeatPayload {
            onion: onion.to_string(),
            public_url: format!("http://{onion}.onion"),
            public_access_url: None,
            nickname: None,
            fingerprint: None,
            latency_ms: Some(50.0),
            reachability: Some(1.0),
            gfw_blocked: Some(false),
            chain_summary: manifest,
        }
    }

    #[test]
    fn upsert_creates_new_relay_with_assigned_id() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();

        let record = registry.upsert(heartbeat("relay1", None), Some("1.2.3.4")).unwrap();
        assert_eq!(record.id, "relay1");
        assert_eq!(record.onion, "relay1");
    }

    #[test]
    fn upsert_twice_preserves_created_at_but_bumps_last_seen() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();

        registry.upsert(heartbeat("relay1", None), None).unwrap();
        let created_at = registry.get("relay1").unwrap().created_at.clone();

        registry.upsert(heartbeat("relay1", None), None).unwrap();
        let record = registry.get("relay1").unwrap();
        assert_eq!(record.created_at, created_at);
    }

    #[test]
    fn canonical_manifest_advances_only_on_strictly_longer() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();

        registry
            .upsert(heartbeat("r1", Some(manifest(&["a", "b", "c"]))), None)
            .unwrap();
        assert_eq!(registry.canonical_manifest().unwrap().length, 3);

        registry
            .upsert(heartbeat("r2", Some(manifest(&["a", "b"]))), None)
            .unwrap();
        assert_eq!(registry.canonical_manifest().unwrap().length, 3, "shorter must not replace");

        registry
            .upsert(heartbeat("r3", Some(manifest(&["a", "b", "c", "d", "e"]))), None)
            .unwrap();
        assert_eq!(registry.canonical_manifest().unwrap().length, 5);
    }

    #[test]
    fn upsert_retroactively_flags_peers_when_canonical_advances() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();

        registry
            .upsert(heartbeat("r1", Some(manifest(&["a", "b", "c"]))), None)
            .unwrap();
        assert!(!registry.get("r1").unwrap().sync_status.needs_sync);

        registry
            .upsert(heartbeat("r2", Some(manifest(&["a", "b", "c", "d", "e"]))), None)
            .unwrap();

        let r1 = registry.get("r1").unwrap();
        assert!(r1.sync_status.needs_sync);
        assert_eq!(r1.sync_status.missing_count, Some(2));
    }

    #[test]
    fn needs_sync_flagged_when_relay_shorter_but_agrees() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();

        registry
            .upsert(heartbeat("r1", Some(manifest(&["a", "b", "c", "d", "e"]))), None)
            .unwrap();
        registry
            .upsert(heartbeat("r2", Some(manifest(&["a", "b", "c"]))), None)
            .unwrap();

        let r2 = registry.get("r2").unwrap();
        assert!(r2.sync_status.needs_sync);
        assert_eq!(r2.sync_status.missing_count, Some(2));
        assert!(!r2.sync_status.needs_repair);
    }

    #[test]
    fn needs_repair_flagged_on_divergence() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();

        registry
            .upsert(heartbeat("r1", Some(manifest(&["a", "b", "c"]))), None)
            .unwrap();
        registry
            .upsert(heartbeat("r2", Some(manifest(&["a", "x", "c"]))), None)
            .unwrap();

        let r2 = registry.get("r2").unwrap();
        assert!(r2.sync_status.needs_repair);
        assert_eq!(r2.sync_status.diverge_at, Some(1));
    }

    #[test]
    fn loopback_public_url_substituted_with_client_addr() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();

        let mut payload = heartbeat("r1", None);
        payload.public_url = "http://127.0.0.1:8080".to_string();
        let record = registry.upsert(payload, Some("203.0.113.9")).unwrap();

        assert_eq!(record.public_url, "203.0.113.9");
        assert_eq!(record.connection_meta["reportedUrl"], "http://127.0.0.1:8080");
    }

    #[test]
    fn public_access_url_overrides_public_url() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();

        let mut payload = heartbeat("r1", None);
        payload.public_access_url = Some("https://relay.example".to_string());
        let record = registry.upsert(payload, None).unwrap();

        assert_eq!(record.public_url, "https://relay.example");
    }

    #[test]
    fn persists_and_reloads_registry_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let mut registry = Registry::load_or_init(&path).unwrap();
            registry
                .upsert(heartbeat("r1", Some(manifest(&["a"]))), None)
                .unwrap();
        }
        let reloaded = Registry::load_or_init(&path).unwrap();
        assert!(reloaded.get("r1").is_some());
        assert_eq!(reloaded.canonical_manifest().unwrap().length, 1);
    }

    #[test]
    fn record_probe_overwrites_metrics_and_tags_source() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();
        registry.upsert(heartbeat("r1", None), None).unwrap();

        registry
            .record_probe(
                "r1",
                crate::ProbeOutcome {
                    latency_ms: Some(12),
                    reachability: 1.0,
                    gfw_blocked: false,
                },
            )
            .unwrap();

        let record = registry.get("r1").unwrap();
        assert_eq!(record.latency_ms, Some(12.0));
        assert_eq!(record.metrics_source.as_deref(), Some("probe"));
    }

    #[test]
    fn record_probe_on_unknown_relay_is_a_no_op() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();
        assert!(registry
            .record_probe("ghost", crate::ProbeOutcome { latency_ms: None, reachability: 0.0, gfw_blocked: false })
            .is_ok());
    }

    #[test]
    fn candidates_excludes_self_and_blank_urls() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load_or_init(dir.path().join("state.json")).unwrap();
        registry.upsert(heartbeat("self", None), None).unwrap();
        registry.upsert(heartbeat("peer", None), None).unwrap();

        let candidates = registry.candidates(Some("self"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].record.onion, "peer");
    }
}
