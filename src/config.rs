use std::{str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::FixedOffset;

use crate::{history::ConcurrencyMode, polling::ViewKind};

// ---------------------------------------------------------------------------
// StoreBackendKind
// ---------------------------------------------------------------------------

/// Which [`StoreBackend`](crate::store::StoreBackend) the binary builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    Http,
    Memory,
}

impl FromStr for StoreBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(Self::Http),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown store backend: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// A polling view run by the binary itself, logging every refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub terrarium_id: String,
    pub view: ViewKind,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackendKind,
    /// Collection URL of the hosted store.
    pub store_base_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Period of the global simulation sweep.
    pub simulation_interval: Duration,
    pub list_poll: Duration,
    pub control_poll: Duration,
    pub monitor_poll: Duration,
    pub history_poll: Duration,
    pub advisory_cooldown: Duration,
    pub concurrency_mode: ConcurrencyMode,
    /// Offset used for the simulator's time-of-day and season.
    pub site_offset: FixedOffset,
    pub watch: Option<WatchConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let optional = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());
        let secs = |key: &str, default: &str| positive_secs(key, &optional(key, default));

        let watch = match lookup("WATCH_TERRARIUM_ID").filter(|id| !id.trim().is_empty()) {
            Some(terrarium_id) => Some(WatchConfig {
                terrarium_id: terrarium_id.trim().to_owned(),
                view: optional("WATCH_VIEW", "monitor")
                    .parse()
                    .context("WATCH_VIEW must be list, control, monitor or history")?,
            }),
            None => None,
        };

        Ok(Self {
            store_backend: optional("STORE_BACKEND", "http")
                .parse()
                .context("STORE_BACKEND must be 'http' or 'memory'")?,
            store_base_url: optional("STORE_BASE_URL", "http://127.0.0.1:3001/terraria"),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            simulation_interval: secs("SIMULATION_INTERVAL_SECS", "1800")?,
            list_poll: secs("LIST_POLL_SECS", "30")?,
            control_poll: secs("CONTROL_POLL_SECS", "2")?,
            monitor_poll: secs("MONITOR_POLL_SECS", "2")?,
            history_poll: secs("HISTORY_POLL_SECS", "2")?,
            advisory_cooldown: Duration::from_secs(
                optional("ADVISORY_COOLDOWN_SECS", "5")
                    .parse()
                    .context("ADVISORY_COOLDOWN_SECS must be a non-negative integer")?,
            ),
            concurrency_mode: optional("CONCURRENCY_MODE", "last_write_wins")
                .parse()
                .context("CONCURRENCY_MODE must be 'last_write_wins' or 'optimistic'")?,
            site_offset: utc_offset(&optional("SITE_UTC_OFFSET_HOURS", "-6"))?,
            watch,
        })
    }

    /// Refresh period configured for `kind`.
    pub fn poll_period(&self, kind: ViewKind) -> Duration {
        match kind {
            ViewKind::List => self.list_poll,
            ViewKind::Control => self.control_poll,
            ViewKind::Monitor => self.monitor_poll,
            ViewKind::History => self.history_poll,
        }
    }
}

/// A strictly positive number of seconds.
fn positive_secs(key: &str, raw: &str) -> Result<Duration> {
    let n: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a positive integer, got {raw:?}"))?;
    if n == 0 {
        bail!("{key} must be a positive integer, got 0");
    }
    Ok(Duration::from_secs(n))
}

/// Whole hours east of UTC, e.g. `-6`.
fn utc_offset(raw: &str) -> Result<FixedOffset> {
    let hours: i32 = raw
        .trim()
        .parse()
        .with_context(|| format!("SITE_UTC_OFFSET_HOURS must be an integer, got {raw:?}"))?;
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .with_context(|| format!("SITE_UTC_OFFSET_HOURS out of range: {hours}"))
}
