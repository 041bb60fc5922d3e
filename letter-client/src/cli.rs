//! Argument parsing for the three subcommands (§6.5).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "letter-client", version, about = "Generate keys, seal and submit letters, read an inbox")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a fresh identity and write it to disk.
    Keygen {
        /// Where to write the JSON identity file.
        #[arg(long)]
        out: PathBuf,
    },
    /// Seal a message for a recipient and submit it to a relay.
    Send {
        /// Base URL of the relay to submit through.
        #[arg(long)]
        relay: String,
        /// Path to the sender's identity file.
        #[arg(long)]
        identity: PathBuf,
        /// Recipient's public key, either as hex directly or a path to an
        /// identity file to read `publicKey` from.
        #[arg(long)]
        to: String,
        /// Plaintext message to seal.
        #[arg(long)]
        message: String,
    },
    /// Fetch a relay's chain and decrypt every letter addressed to this identity.
    Inbox {
        /// Base URL of the relay to read from.
        #[arg(long)]
        relay: String,
        /// Path to the recipient's identity file.
        #[arg(long)]
        identity: PathBuf,
    },
}
