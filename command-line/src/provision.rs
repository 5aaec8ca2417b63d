//! Small provisioning utilities for operators setting up a relay,
//! agents or viewers: hashing the unattended-access password the way
//! `servidesk-protocol::PasswordHash` expects it, and minting random
//! bearer tokens for `admin_token`/`agent_token`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::RngCore;
use sha2::{Digest, Sha256};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct ServidesKCli {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Hash a password into the 64-char lowercase hex SHA-256 digest
    /// `unattended_access_password_hash` expects.
    HashPassword {
        /// Plaintext password to hash.
        password: String,
    },

    /// Generate a random hex bearer token suitable for `admin_token` or
    /// `agent_secret`.
    GenerateToken {
        /// Number of random bytes before hex-encoding (32 = 64 hex chars).
        #[clap(short, long, default_value_t = 32)]
        bytes: usize,
    },
}

fn run() -> Result<()> {
    let args = ServidesKCli::parse();
    match args.cmd {
        Command::HashPassword { password } => {
            let digest = Sha256::digest(password.as_bytes());
            println!("{}", hex::encode(digest));
        }
        Command::GenerateToken { bytes } => {
            let mut buf = vec![0u8; bytes];
            rand::thread_rng().fill_bytes(&mut buf);
            println!("{}", hex::encode(buf));
        }
    }
    Ok(())
}

pub fn main() -> Result<()> {
    run()
}
