use crate::reporting_client::PollSettings;
use crate::retry::RetryPolicy;
use chrono::FixedOffset;
use clap::Args as ClapArgs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://admanager.googleapis.com/v1";
const WAREHOUSE_DIR: &str = "./warehouse";
const UTC_OFFSET: &str = "+01:00";

#[derive(ClapArgs, Debug, Clone)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_API_URL, env = "API_URL")]
    pub(crate) api_url: String,

    #[arg(long, env = "NETWORK_CODE")]
    pub(crate) network_code: Option<String>,

    #[arg(long, env = "API_TOKEN", hide_env_values = true)]
    pub(crate) api_token: Option<String>,

    /// JSON secret holding `network_code` and `access_token`; takes precedence
    /// over --network-code/--api-token.
    #[arg(long, env = "CREDENTIALS_FILE")]
    pub(crate) credentials_file: Option<PathBuf>,

    #[arg(long, default_value = WAREHOUSE_DIR, env = "WAREHOUSE_DIR")]
    pub(crate) warehouse_dir: PathBuf,

    /// Report definitions as a JSON array; the built-in set is used when absent.
    #[arg(long, env = "REPORTS_FILE")]
    pub(crate) reports_file: Option<PathBuf>,

    /// Offset used to decide what "today" is for scheduled runs, e.g. +01:00.
    #[arg(long, default_value = UTC_OFFSET, env = "REPORT_UTC_OFFSET", value_parser = parse_utc_offset)]
    pub(crate) utc_offset: FixedOffset,

    #[arg(long, default_value_t = 10, env = "POLL_INTERVAL_SECS")]
    pub(crate) poll_interval_secs: u64,

    #[arg(long, default_value_t = 600, env = "MAX_WAIT_SECS")]
    pub(crate) max_wait_secs: u64,

    /// Upper bound on a single HTTP call to the reporting API.
    #[arg(long, default_value_t = 60, env = "REQUEST_TIMEOUT_SECS")]
    pub(crate) request_timeout_secs: u64,

    #[arg(long, default_value_t = 3, env = "MAX_ATTEMPTS")]
    pub(crate) max_attempts: u32,

    #[arg(long, default_value_t = 2000, env = "RETRY_BASE_DELAY_MS")]
    pub(crate) retry_base_delay_ms: u64,

    #[arg(long, default_value_t = 2.0, env = "RETRY_BACKOFF_MULTIPLIER", value_parser = parse_backoff_multiplier)]
    pub(crate) retry_backoff_multiplier: f64,
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            self.retry_backoff_multiplier,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

/// Parses `+HH:MM`, `-HH:MM` or `Z`.
fn parse_utc_offset(s: &str) -> Result<FixedOffset, String> {
    let offset = if s.eq_ignore_ascii_case("z") { "+00:00" } else { s };
    offset
        .parse::<FixedOffset>()
        .map_err(|err| format!("Invalid UTC offset '{}', expected +HH:MM: {}", s, err))
}

fn parse_backoff_multiplier(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(multiplier) if multiplier.is_finite() && multiplier >= 1.0 => Ok(multiplier),
        _ => Err(format!(
            "Invalid backoff multiplier '{}', expected a finite number >= 1",
            s
        )),
    }
}
