use std::path::PathBuf;
use std::time::Duration;

use crate::cli::EngineArgs;
use crate::retry::RetryConfig;
use crate::sync::SyncPolicy;

/// Runtime configuration for every command that builds a sync engine.
pub struct Config {
    pub db_path: PathBuf,
    pub secret_key: String,
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
    pub site_url: String,

    pub http_timeout: Duration,
    pub sweep_interval: Duration,
    pub retry: RetryConfig,
    pub policy: SyncPolicy,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db_path", &self.db_path)
            .field("secret_key", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("mail_relay_url", &self.mail_relay_url)
            .field("sweep_interval", &self.sweep_interval)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(db_path: &str, args: EngineArgs) -> anyhow::Result<Self> {
        if args.secret_key.is_empty() {
            anyhow::bail!("--secret-key (or MIRROR_SECRET_KEY) must not be empty");
        }
        let retry_delay = parse_duration(&args.retry_delay)?;
        let retry = RetryConfig {
            max_retries: args.max_retries,
            base_delay: retry_delay,
            max_delay: RetryConfig::default().max_delay.max(retry_delay),
        };
        let sweep_interval = parse_duration(&args.sweep_interval)?;
        if sweep_interval.is_zero() {
            anyhow::bail!("--sweep-interval must be greater than zero");
        }

        Ok(Self {
            db_path: expand_tilde(db_path),
            secret_key: args.secret_key,
            client_id: args.client_id,
            client_secret: args.client_secret,
            user_agent: args.user_agent,
            mail_relay_url: args.mail_relay_url.filter(|u| !u.is_empty()),
            mail_from: args.mail_from,
            site_url: args.site_url,
            http_timeout: parse_duration(&args.http_timeout)?,
            sweep_interval,
            retry,
            policy: SyncPolicy {
                min_resync_secs: parse_secs(&args.min_resync)?,
                inactive_after_secs: parse_secs(&args.inactive_after)?,
                inactive_notice_secs: parse_secs(&args.inactive_notice_every)?,
                update_failed_notice_secs: parse_secs(&args.update_failed_notice_every)?,
            },
        })
    }
}

/// Parse a human-friendly duration: a number followed by `s`, `m`, `h` or
/// `d`. A bare number is seconds.
pub(crate) fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let (digits, unit_secs) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 60 * 60),
        Some((i, 'd')) => (&s[..i], 24 * 60 * 60),
        _ => (s, 1),
    };
    let value: u64 = digits.parse().map_err(|_| {
        anyhow::anyhow!("Cannot parse '{s}' as a duration. Expected e.g. 45s, 10m, 12h or 180d")
    })?;
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("Duration '{s}' is too large"))
}

fn parse_secs(s: &str) -> anyhow::Result<i64> {
    Ok(i64::try_from(parse_duration(s)?.as_secs())?)
}
