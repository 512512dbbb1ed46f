use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tunnistamo", version, about = "Tunnistamo sign-in operator tools")]
pub struct Cli {
    /// Server secret for digests and signatures.
    #[arg(long, env = "SECRET_KEY_BASE", global = true, hide_env_values = true)]
    pub secret_key_base: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the version.
    Version,

    /// Print the person identifier digest of a subject.
    Digest {
        /// Subject identifier (`sub` claim).
        subject: String,
    },

    /// Print the authorization signature of an external uid.
    Signature {
        uid: String,

        /// Provider name (defaults to the configured provider).
        #[arg(long)]
        provider: Option<String>,
    },

    /// Print the placeholder email of a subject in an organization.
    PlaceholderEmail {
        subject: String,

        /// Organization host, used when no placeholder domain is configured.
        #[arg(long, default_value = "localhost")]
        host: String,
    },

    /// Check whether an address is acceptable for verification.
    CheckEmail { email: String },

    /// Print the effective configuration (without the secret).
    Config,

    /// Run a broker assertion (JSON file) through sign-in against an
    /// in-memory store and print the outcome.
    SignIn {
        assertion: PathBuf,

        #[arg(long, default_value = "localhost")]
        host: String,
    },
}
