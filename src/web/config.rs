//! Configuration types and constants for the letter-vault server.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::gate::{parse_member, Allowlist};
use crate::images::DEFAULT_MAX_IMAGE_BYTES;
use crate::provider::{OAuthSettings, GOOGLE_AUTHORIZE_URL, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL};

pub(crate) const DEFAULT_BIND: &str = "127.0.0.1:3000";
/// Where a successful sign-in lands when the callback names no `next`.
pub(crate) const DEFAULT_NEXT: &str = "/dashboard";
/// Most files a single save may carry.
pub(crate) const MAX_FILES_PER_SAVE: usize = 20;
/// Room for the `letter` JSON field and multipart framing.
pub(crate) const SAVE_BODY_OVERHEAD: usize = 1024 * 1024; // 1 MiB
pub(crate) const SESSION_PURGE_INTERVAL_SECS: u64 = 3600;

/// Private letter vault for two.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug, Default)]
#[command(name = "letter-vault", version, about)]
pub struct Cli {
    /// HTTP server bind address [env: VAULT_BIND] [default: 127.0.0.1:3000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Data directory for the database and uploaded images [env: VAULT_HOME] [default: ~/.letter-vault]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,

    /// Externally visible base URL, used for image URLs and the OAuth
    /// redirect [env: VAULT_PUBLIC_URL] [default: http://<bind>]
    #[arg(long, short = 'u')]
    pub public_url: Option<String>,

    /// Allowlisted member as `email=Name`; repeat for each member
    /// [env: VAULT_ALLOWLIST, comma separated]
    #[arg(long = "allow", short = 'a')]
    pub allow: Vec<String>,

    /// Per-image upload limit in bytes [env: VAULT_MAX_IMAGE_BYTES] [default: 10 MiB]
    #[arg(long)]
    pub max_image_bytes: Option<u64>,

    /// Log level used when RUST_LOG is unset [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid allowlist: {0}")]
    Allowlist(String),
    #[error("invalid VAULT_MAX_IMAGE_BYTES: {0}")]
    MaxImageBytes(String),
    #[error("VAULT_OAUTH_CLIENT_ID and VAULT_OAUTH_CLIENT_SECRET must be set together")]
    PartialOAuth,
}

#[derive(Debug)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub public_url: String,
    pub allowlist: Allowlist,
    /// `None` leaves sign-in disabled.
    pub oauth: Option<OAuthSettings>,
    pub max_image_bytes: u64,
    pub log_level: String,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Result<Self, ConfigError> {
        Self::from_sources(cli, |key| std::env::var(key).ok())
    }

    /// Resolve every setting from the CLI first, then `env`, then defaults.
    pub fn from_sources(
        cli: Cli,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let data_dir = cli
            .data_dir
            .or_else(|| env("VAULT_HOME").map(PathBuf::from))
            .unwrap_or_else(|| {
                env("HOME")
                    .map(|h| PathBuf::from(h).join(".letter-vault"))
                    .unwrap_or_else(|| PathBuf::from(".letter-vault"))
            });

        let bind_addr = cli
            .bind
            .or_else(|| env("VAULT_BIND"))
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let public_url = cli
            .public_url
            .or_else(|| env("VAULT_PUBLIC_URL"))
            .unwrap_or_else(|| format!("http://{bind_addr}"))
            .trim_end_matches('/')
            .to_string();

        let allowlist = if !cli.allow.is_empty() {
            let members = cli
                .allow
                .iter()
                .map(|entry| parse_member(entry))
                .collect::<Result<Vec<_>, _>>()
                .map_err(ConfigError::Allowlist)?;
            Allowlist::new(members)
        } else if let Some(list) = env("VAULT_ALLOWLIST") {
            Allowlist::parse(&list).map_err(ConfigError::Allowlist)?
        } else {
            Allowlist::default()
        };

        let max_image_bytes = match cli.max_image_bytes {
            Some(n) => n,
            None => match env("VAULT_MAX_IMAGE_BYTES") {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::MaxImageBytes(raw.clone()))?,
                None => DEFAULT_MAX_IMAGE_BYTES,
            },
        };
        if max_image_bytes == 0 {
            return Err(ConfigError::MaxImageBytes("0".to_string()));
        }

        let oauth = match (env("VAULT_OAUTH_CLIENT_ID"), env("VAULT_OAUTH_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(OAuthSettings {
                client_id,
                client_secret,
                authorize_url: env("VAULT_OAUTH_AUTHORIZE_URL")
                    .unwrap_or_else(|| GOOGLE_AUTHORIZE_URL.to_string()),
                token_url: env("VAULT_OAUTH_TOKEN_URL")
                    .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
                userinfo_url: env("VAULT_OAUTH_USERINFO_URL")
                    .unwrap_or_else(|| GOOGLE_USERINFO_URL.to_string()),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialOAuth),
        };

        Ok(Self {
            bind_addr,
            data_dir,
            public_url,
            allowlist,
            oauth,
            max_image_bytes,
            log_level: cli.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Largest request body a save may send.
pub(crate) fn max_save_body_bytes(max_image_bytes: u64) -> usize {
    let per_file = usize::try_from(max_image_bytes).unwrap_or(usize::MAX);
    per_file
        .saturating_mul(MAX_FILES_PER_SAVE)
        .saturating_add(SAVE_BODY_OVERHEAD)
}
