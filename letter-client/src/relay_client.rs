//! Thin HTTP client for the two relay endpoints a letter author needs.

use letter_ledger::Block;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitLetterBody {
    payload: String,
    owner_fingerprint: String,
    relay_metrics: Value,
}

#[derive(Deserialize)]
struct BlocksResponse {
    blocks: Vec<Block>,
}

#[derive(Deserialize)]
struct SubmitLetterResponse {
    block: Block,
}

pub async fn submit_letter(
    relay_url: &str,
    payload: &str,
    owner_fingerprint: &str,
    relay_metrics: Value,
) -> anyhow::Result<Block> {
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let url = format!("{relay_url}/api/letters");
    let body = SubmitLetterBody {
        payload: payload.to_string(),
        owner_fingerprint: owner_fingerprint.to_string(),
        relay_metrics,
    };

    let response = client.post(&url).json(&body).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("relay rejected letter ({status}): {text}");
    }
    let body: SubmitLetterResponse = response.json().await?;
    Ok(body.block)
}

pub async fn fetch_blocks(relay_url: &str) -> anyhow::Result<Vec<Block>> {
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let url = format!("{relay_url}/api/blocks/full");
    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("relay returned {} fetching blocks", response.status());
    }
    let body: BlocksResponse = response.json().await?;
    Ok(body.blocks)
}
