//! Post-upsert broadcast (§4.4): nudge every other relay with a `publicUrl`
//! to run a sync cycle. Fire-and-forget — failures are logged per target,
//! there are no retries and no ordering guarantees across peers.

use reqwest::Client;
use tracing::warn;

const BROADCAST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

pub fn fan_out(client: Client, just_upserted: String, targets: Vec<(String, String)>) {
    tokio::spawn(async move {
        let sends = targets
            .into_iter()
            .filter(|(onion, _)| *onion != just_upserted)
            .map(|(onion, public_url)| {
                let client = client.clone();
                async move {
                    let url = format!("{public_url}/api/sync");
                    if let Err(e) = client.post(&url).timeout(BROADCAST_TIMEOUT).send().await {
                        warn!(onion = %onion, error = %e, "broadcast sync nudge failed");
                    }
                }
            });
        futures::future::join_all(sends).await;
    });
}
