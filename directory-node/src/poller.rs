//! Reachability poller (§4.4): iterate every relay with a `publicUrl`, GET
//! `<url>/api/status` with a bounded timeout, classify the outcome, and
//! record it. Runs forever once spawned; iterations never overlap, since
//! one `poll_once` fully awaits all its probes before the next tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use letter_registry::{NetworkErrorKind, ProbeOutcome};
use reqwest::Client;
use tracing::warn;

use crate::state::DirectoryState;

pub async fn run(state: Arc<DirectoryState>, interval: Duration, timeout: Duration) {
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client with a fixed timeout always builds");

    loop {
        tokio::time::sleep(interval).await;
        poll_once(&state, &client).await;
    }
}

async fn poll_once(state: &Arc<DirectoryState>, client: &Client) {
    let targets: Vec<(String, String)> = {
        let registry = state.registry.lock().await;
        registry
            .relays()
            .filter(|r| !r.public_url.is_empty())
            .map(|r| (r.onion.clone(), r.public_url.clone()))
            .collect()
    };

    let probes = targets.into_iter().map(|(onion, public_url)| {
        let client = client.clone();
        async move {
            let outcome = probe_one(&client, &public_url).await;
            (onion, outcome)
        }
    });

    let results = futures::future::join_all(probes).await;

    let mut registry = state.registry.lock().await;
    for (onion, outcome) in results {
        if let Err(e) = registry.record_probe(&onion, outcome) {
            warn!(onion = %onion, error = %e, "failed to persist probe result");
        }
    }
}

async fn probe_one(client: &Client, public_url: &str) -> ProbeOutcome {
    let url = format!("{public_url}/api/status");
    let start = Instant::now();
    match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            ProbeOutcome::success(start.elapsed().as_millis() as u64)
        }
        Ok(response) => ProbeOutcome::from_http_status(response.status().as_u16()),
        Err(e) => ProbeOutcome::from_network_error(classify(&e)),
    }
}

/// reqwest/hyper don't expose a typed error-class enum, so the named set
/// from §4.4 is matched against the error's rendered text.
fn classify(err: &reqwest::Error) -> NetworkErrorKind {
    if err.is_timeout() {
        return NetworkErrorKind::TimedOut;
    }
    let text = err.to_string().to_lowercase();
    if text.contains("connection reset") {
        NetworkErrorKind::ConnectionReset
    } else if text.contains("refused") {
        NetworkErrorKind::Refused
    } else if text.contains("unreachable") {
        NetworkErrorKind::HostUnreachable
    } else if text.contains("aborted") || text.contains("abort") {
        NetworkErrorKind::Abort
    } else if text.contains("reset") {
        NetworkErrorKind::NetReset
    } else {
        NetworkErrorKind::Other
    }
}
