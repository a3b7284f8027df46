use std::path::PathBuf;

use clap::Parser;

/// CLI for the quire daemon.
#[derive(Debug, Clone, Parser)]
#[command(name = "quire", about = "Book and chapter manager with autosave and proofreading")]
pub struct Cli {
    /// Listen address for HTTP/WS endpoints
    #[arg(long, env = "QUIRE_ADDR", default_value = "127.0.0.1:8787")]
    pub listen_addr: String,

    /// Path to quire.yml (defaults are used when absent)
    #[arg(long, env = "QUIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL of the REST record store; selects the rest backend
    #[arg(long, env = "QUIRE_STORE_URL")]
    pub store_url: Option<String>,

    /// Override the autosave debounce, in seconds
    #[arg(long, env = "QUIRE_DEBOUNCE_SECS")]
    pub debounce_secs: Option<u64>,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // Auth options
    // ─────────────────────────────────────────────────────────────────────────

    /// Secret for verifying user JWT tokens (HS256).
    #[arg(long, env = "QUIRE_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Previous secret, still accepted while tokens signed with it expire.
    #[arg(long, env = "QUIRE_JWT_PREVIOUS_SECRET", hide_env_values = true)]
    pub jwt_previous_secret: Option<String>,

    /// Reject requests that carry no token. Without this, tokenless
    /// requests act as a single anonymous owner.
    #[arg(long, env = "QUIRE_REQUIRE_AUTH", default_value = "false")]
    pub require_auth: bool,

    /// Expected JWT audience claim (optional).
    #[arg(long, env = "QUIRE_AUTH_AUDIENCE")]
    pub auth_audience: Option<String>,

    // ─────────────────────────────────────────────────────────────────────────
    // Rate limiting options
    // ─────────────────────────────────────────────────────────────────────────

    /// Enable rate limiting for write operations.
    #[arg(long, env = "QUIRE_RATE_LIMIT", default_value = "true")]
    pub rate_limit: bool,

    /// Maximum burst size for rate limiting.
    #[arg(long, env = "QUIRE_RATE_BURST", default_value = "20")]
    pub rate_burst: u32,

    /// Sustained requests per second for rate limiting.
    #[arg(long, env = "QUIRE_RATE_PER_SEC", default_value = "2.0")]
    pub rate_per_sec: f64,
}
