use std::path::PathBuf;

pub const APP_NAME: &str = "keylink";
pub const DEFAULT_IDENTITY: &str = "default";
pub const CREDENTIAL_ID_LEN: usize = 32;
pub const PRESENCE_TIMEOUT_SECS: u64 = 30;
pub const STORE_KEY_FILE: &str = "store.key";
pub const KEYS_DIR: &str = "keys";
pub const OUTBOX_DIR: &str = "outbox";
pub const LOCK_FILE: &str = "keylink.lock";

#[derive(clap::Parser, Debug, Clone)]
#[command(name = APP_NAME, version, about = "Link devices with a P-256 identity")]
pub struct Config {
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Where keys and outgoing payloads live. Defaults to the XDG data dir.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    /// Store namespace holding the identity.
    #[arg(long, global = true, default_value = DEFAULT_IDENTITY)]
    pub identity: String,
    #[arg(long, global = true, default_value = "pinentry")]
    pub pinentry: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an identity and send it to the relying party. Re-running after a
    /// failed upload retries the upload with the stored keys.
    Register {
        #[arg(long)]
        user_id: String,
    },
    /// Answer a challenge bundle after a presence check.
    Link {
        /// Challenge bundle JSON file, or `-` for stdin.
        #[arg(long)]
        challenge: PathBuf,
        #[arg(long)]
        origin: String,
        /// Seconds to wait for the presence prompt.
        #[arg(long, default_value_t = PRESENCE_TIMEOUT_SECS)]
        timeout: u64,
    },
    /// Print the registration payload of the stored identity.
    Show,
    /// Check an assertion payload against a public key.
    Verify {
        #[arg(long)]
        assertion: PathBuf,
        #[arg(long)]
        rp_id: String,
        /// Base64url `0x04 || X || Y`.
        #[arg(long)]
        public_key: String,
        /// Require the assertion to answer this challenge.
        #[arg(long)]
        challenge: Option<String>,
        #[arg(long)]
        reject_high_s: bool,
    },
    /// Delete the stored identity.
    Reset,
}

impl Command {
    /// Commands that read or write the store take the single-instance lock.
    pub fn uses_store(&self) -> bool {
        !matches!(self, Self::Verify { .. })
    }
}
