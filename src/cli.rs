use std::path::PathBuf;

use clap::Parser;
use clap_complete::Shell;
use rand::Rng;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "moot")]
#[command(version = "0.6.2")]
#[command(about = "A terminal courtroom: argue a debate live while AI jurors vote on every message")]
pub struct Args {
    /// Debate id to join (omit together with --create to mint a new one)
    pub debate: Option<u64>,

    /// Backend base URL, overrides MOOT_BACKEND_URL and the config file
    #[arg(long)]
    pub backend: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Create a new debate instead of joining an existing one
    #[arg(long)]
    pub create: bool,

    /// Topic for the new debate
    #[arg(long, default_value = "Is Rust the best systems language?")]
    pub topic: String,

    /// Comma-separated side labels for the new debate
    #[arg(long, default_value = "Yes,No")]
    pub sides: String,

    /// Semicolon-separated juror personas for the new debate
    #[arg(
        long,
        default_value = "A pragmatic engineer;A skeptical academic;A cost-obsessed manager"
    )]
    pub jurors: String,

    /// Funding attached to the new debate
    #[arg(long, default_value = "0.0")]
    pub funding: f64,

    /// Action the verdict should trigger, stored on the debate record
    #[arg(long, default_value = "")]
    pub action: String,

    /// Display name (defaults to the cached name for the address, else a guest name)
    #[arg(long)]
    pub username: Option<String>,

    /// Wallet address to present (defaults to a generated guest address)
    #[arg(long)]
    pub address: Option<String>,

    /// Keep-alive ping period in seconds; 0 disables the heartbeat
    #[arg(long)]
    pub heartbeat_secs: Option<u64>,

    /// Reconnect attempts before the live channel gives up
    #[arg(long)]
    pub max_reconnects: Option<u32>,

    /// Print the transcript and verdict tallies, then exit without connecting
    #[arg(long)]
    pub history_only: bool,

    /// With --history-only, print one JSON document instead of text
    #[arg(long)]
    pub json: bool,

    /// Generate shell completions and exit
    #[arg(long, value_enum)]
    pub completions: Option<Shell>,
}

/// Fold CLI flags into the loaded config. Flags beat file and environment.
pub fn apply_overrides(cfg: &mut AppConfig, args: &Args) {
    if let Some(url) = &args.backend {
        cfg.backend_url = url.clone();
    }
    if let Some(secs) = args.heartbeat_secs {
        cfg.heartbeat_secs = secs;
    }
    if let Some(n) = args.max_reconnects {
        cfg.max_reconnect_attempts = n;
    }
}

/// Split a `--sides` value into trimmed, non-empty labels.
pub fn parse_sides(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a `--jurors` value into trimmed, non-empty persona texts.
pub fn parse_jurors(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A throwaway username and wallet-style address for users who don't bring
/// their own. The address only has to be unique-ish and stable for the run.
pub fn guest_identity() -> (String, String) {
    let mut rng = rand::thread_rng();
    let username = format!("guest_{}", rng.gen_range(1000..10_000));
    let mut address = String::with_capacity(42);
    address.push_str("0x");
    for _ in 0..40 {
        let nibble = rng.gen_range(0..16u32);
        address.push(char::from_digit(nibble, 16).unwrap_or('0'));
    }
    (username, address)
}

/// Fresh client id for the live channel. One per process, not per reconnect,
/// so the server sees reconnects as the same participant.
pub fn new_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
