//! `letter-client`: the external-collaborator boundary (§4.8, §6.5). Not
//! part of the distributed-systems core, but the one place the §6.3 sealed
//! envelope is actually produced and opened outside of unit tests.

mod cli;
mod relay_client;

use std::path::Path;

use clap::Parser;
use letter_crypto::Identity;
use tracing::info;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Keygen { out } => keygen(&out),
        Command::Send { relay, identity, to, message } => send(&relay, &identity, &to, &message).await,
        Command::Inbox { relay, identity } => inbox(&relay, &identity).await,
    }
}

fn keygen(out: &Path) -> anyhow::Result<()> {
    let identity = Identity::generate();
    let json = serde_json::to_vec_pretty(&identity)?;
    std::fs::write(out, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(out, std::fs::Permissions::from_mode(0o600))?;
    }

    println!("wrote identity {} to {}", identity.fingerprint, out.display());
    Ok(())
}

fn load_identity(path: &Path) -> anyhow::Result<Identity> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// `--to` is either a bare hex public key or a path to an identity file to
/// read `publicKey` from.
fn resolve_recipient_public_key(to: &str) -> anyhow::Result<String> {
    if to.len() == 64 && to.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(to.to_string());
    }
    let recipient = load_identity(Path::new(to))?;
    Ok(recipient.public_key)
}

async fn send(relay: &str, identity_path: &Path, to: &str, message: &str) -> anyhow::Result<()> {
    let sender = load_identity(identity_path)?;
    let recipient_public_key = resolve_recipient_public_key(to)?;

    let envelope = letter_crypto::seal(message.as_bytes(), &recipient_public_key)?;
    let recipient_fingerprint = letter_crypto::fingerprint(&hex::decode(&recipient_public_key)?);

    let relay_metrics = serde_json::json!({ "senderFingerprint": sender.fingerprint });
    let block = relay_client::submit_letter(relay, &envelope, &recipient_fingerprint, relay_metrics).await?;

    info!(block_index = block.index, "letter accepted");
    println!("letter sealed for {recipient_fingerprint} and committed in block {}", block.index);
    Ok(())
}

async fn inbox(relay: &str, identity_path: &Path) -> anyhow::Result<()> {
    let identity = load_identity(identity_path)?;
    let blocks = relay_client::fetch_blocks(relay).await?;

    let mut found = 0;
    for block in &blocks {
        for letter in &block.letters {
            if letter.owner_fingerprint != identity.fingerprint {
                continue;
            }
            match letter_crypto::open(&letter.payload, &identity) {
                Ok(plaintext) => {
                    found += 1;
                    println!("[block {}] {}", block.index, String::from_utf8_lossy(&plaintext));
                }
                Err(e) => {
                    eprintln!("[block {}] failed to open letter: {e}", block.index);
                }
            }
        }
    }

    if found == 0 {
        println!("no letters found for {}", identity.fingerprint);
    }
    Ok(())
}
