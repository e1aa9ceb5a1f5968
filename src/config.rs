//! Configuration for the volary daemon.
//!
//! Settings merge in precedence order: CLI arguments, then environment
//! variables, then an optional `volary.toml` in the data directory, then
//! built-in defaults. The owner DID has no default and must be supplied by
//! one of the three explicit sources.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

/// First channel id handed out by a fresh node.
pub const CHAN_ID_START: u64 = 1;
/// First post id on a fresh channel.
pub const POST_ID_START: u64 = 1;
/// Width of the sign-in challenge nonce before hex encoding.
pub const NONCE_BYTES: usize = 32;
/// How long a sign-in challenge stays answerable.
pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 3 * 60;
/// Ceiling on access-token lifetime; the credential expiry may shorten it.
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 30 * 24 * 3600;
/// Largest message the session transport will carry.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 5 * 1024 * 1024;
/// Reserved for envelope overhead when chunking listing responses.
pub const CONTENT_HEADROOM: usize = 100 * 1024;
/// Outbound messages retained per peer before the oldest is dropped.
pub const DEFAULT_MAX_QUEUED: usize = 256;

/// Feeds service node.
///
/// Accepts peer sessions over WebSocket, authenticates clients by DID
/// challenge/response, and serves channel/post/comment/like operations.
#[derive(Parser, Debug)]
#[command(name = "volary", version, about)]
pub struct Cli {
    /// Bind address for the session endpoint
    #[arg(long, short = 'b', env = "VOLARY_BIND")]
    pub bind: Option<String>,

    /// Data directory (database, identity, DID document cache)
    #[arg(long, short = 'd', env = "VOLARY_HOME")]
    pub data_dir: Option<PathBuf>,

    /// Directory for session body cache files [default: <data_dir>/bodycache]
    #[arg(long, env = "VOLARY_BODY_CACHE")]
    pub body_cache_dir: Option<PathBuf>,

    /// DID of the node owner (the only identity allowed to create channels)
    #[arg(long, env = "VOLARY_OWNER_DID")]
    pub owner_did: Option<String>,

    /// Display name for the owner in channel metadata
    #[arg(long, env = "VOLARY_OWNER_NAME")]
    pub owner_name: Option<String>,

    /// DID store password (accepted for deployment compatibility)
    #[arg(long, env = "VOLARY_STORE_PASS", hide = true)]
    pub store_pass: Option<String>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Optional `volary.toml` in the data directory.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub owner_did: Option<String>,
    pub owner_name: Option<String>,
    pub body_cache_dir: Option<PathBuf>,
    pub challenge_ttl_secs: Option<u64>,
    pub access_ttl_secs: Option<u64>,
    pub max_message_len: Option<usize>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(String),
    MissingOwnerDid,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "io error: {e}"),
            ConfigError::Toml(e) => write!(f, "config file error: {e}"),
            ConfigError::MissingOwnerDid => {
                write!(f, "owner DID not configured (--owner-did / VOLARY_OWNER_DID)")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub body_cache_dir: PathBuf,
    pub owner_did: String,
    pub owner_name: String,
    pub challenge_ttl_secs: u64,
    pub access_ttl_secs: u64,
    pub max_message_len: usize,
    pub max_queued: usize,
    pub verbose: bool,
}

impl Config {
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let data_dir = cli.data_dir.unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join(".volary"))
                .unwrap_or_else(|_| PathBuf::from(".volary"))
        });

        let file = load_file_config(&data_dir.join("volary.toml"))?;

        let owner_did = cli
            .owner_did
            .or(file.owner_did)
            .ok_or(ConfigError::MissingOwnerDid)?;

        let body_cache_dir = cli
            .body_cache_dir
            .or(file.body_cache_dir)
            .unwrap_or_else(|| data_dir.join("bodycache"));

        Ok(Config {
            bind_addr: cli
                .bind
                .or(file.bind)
                .unwrap_or_else(|| "127.0.0.1:4880".to_string()),
            data_dir,
            body_cache_dir,
            owner_did,
            owner_name: cli.owner_name.or(file.owner_name).unwrap_or_default(),
            challenge_ttl_secs: file
                .challenge_ttl_secs
                .unwrap_or(DEFAULT_CHALLENGE_TTL_SECS),
            access_ttl_secs: file.access_ttl_secs.unwrap_or(DEFAULT_ACCESS_TTL_SECS),
            max_message_len: file.max_message_len.unwrap_or(DEFAULT_MAX_MESSAGE_LEN),
            max_queued: DEFAULT_MAX_QUEUED,
            verbose: cli.verbose,
        })
    }

    /// Listing-response budget: transport maximum minus envelope headroom.
    pub fn max_content_len(&self) -> usize {
        self.max_message_len.saturating_sub(CONTENT_HEADROOM)
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = std::fs::read_to_string(path)?;
    toml::from_str(&contents).map_err(|e| ConfigError::Toml(e.to_string()))
}
