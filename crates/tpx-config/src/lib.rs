//! tpx-config
//!
//! Process configuration resolved once at startup from the environment.
//!
//! # Contract
//! - Callers invoke [`TradingConfig::from_env`] once and pass the result into
//!   constructors; nothing else reads `std::env`.
//! - All reads go through a lookup closure ([`TradingConfig::from_lookup`]) so
//!   tests supply a map instead of mutating the process environment.
//! - `Debug` redacts the shared password and the webhook URL.
//! - Errors name the env var, never its value.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Env var names
// ---------------------------------------------------------------------------

pub const ENV_POSTER_PASSWORD: &str = "POSTER_PASSWORD";
pub const ENV_BROKER_HOST: &str = "TPX_BROKER_HOST";
pub const ENV_BROKER_PORT: &str = "TPX_BROKER_PORT";
pub const ENV_MARGIN_RATE: &str = "TPX_MARGIN_RATE";
pub const ENV_DAILY_WIN_CAP: &str = "TPX_DAILY_WIN_CAP";
pub const ENV_BUY_TIMEOUT_SECS: &str = "TPX_BUY_TIMEOUT_SECS";
pub const ENV_ACCOUNT_ID: &str = "TPX_ACCOUNT_ID";
pub const ENV_NOTIFY_TO: &str = "TPX_NOTIFY_TO";
pub const ENV_NOTIFY_FROM: &str = "TPX_NOTIFY_FROM";
pub const ENV_NOTIFY_WEBHOOK_URL: &str = "TPX_NOTIFY_WEBHOOK_URL";
pub const ENV_EXCHANGE_OVERRIDES: &str = "TPX_EXCHANGE_OVERRIDES";
pub const ENV_DAEMON_ADDR: &str = "TPX_DAEMON_ADDR";
pub const ENV_PAPER_FILL: &str = "TPX_PAPER_FILL";

pub const DEFAULT_BROKER_HOST: &str = "127.0.0.1";
pub const DEFAULT_BROKER_PORT: u16 = 4001;
/// 0.16%
pub const DEFAULT_MARGIN_RATE: Decimal = Decimal::from_parts(16, 0, 0, false, 4);
pub const DEFAULT_DAILY_WIN_CAP: u32 = 1;
pub const DEFAULT_BUY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_EXCHANGE_OVERRIDES: &str = "SPCE:NYSE,MSFT:NYSE";
pub const DEFAULT_DAEMON_ADDR: &str = "127.0.0.1:5592";
pub const DEFAULT_PAPER_FILL: &str = "immediate";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    Missing(&'static str),
    /// A variable is set but cannot be used. `expected` describes the format.
    Invalid {
        var: &'static str,
        expected: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(var) => {
                write!(f, "CONFIG_MISSING: required env var '{var}' is not set or empty")
            }
            ConfigError::Invalid { var, expected } => {
                write!(f, "CONFIG_INVALID: env var '{var}' must be {expected}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// TradingConfig
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
pub struct TradingConfig {
    /// Shared secret for the control gateway.
    pub poster_password: String,
    pub broker_host: String,
    pub broker_port: u16,
    /// Take-profit margin as a fraction (`0.0016` = 0.16%).
    pub margin_rate: Decimal,
    pub daily_win_cap: u32,
    pub buy_timeout: Duration,
    pub account_id: Option<String>,
    pub notify_to: Option<String>,
    pub notify_from: Option<String>,
    /// Carries credentials in the URL itself.
    pub notify_webhook_url: Option<String>,
    /// Symbol -> venue, symbols upper-cased.
    pub exchange_overrides: BTreeMap<String, String>,
    pub daemon_addr: SocketAddr,
    /// Paper broker fill behaviour, validated by the broker crate.
    pub paper_fill: String,
}

impl fmt::Debug for TradingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradingConfig")
            .field("poster_password", &"<REDACTED>")
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .field("margin_rate", &self.margin_rate)
            .field("daily_win_cap", &self.daily_win_cap)
            .field("buy_timeout", &self.buy_timeout)
            .field("account_id", &self.account_id)
            .field("notify_to", &self.notify_to)
            .field("notify_from", &self.notify_from)
            .field(
                "notify_webhook_url",
                &self.notify_webhook_url.as_ref().map(|_| "<REDACTED>"),
            )
            .field("exchange_overrides", &self.exchange_overrides)
            .field("daemon_addr", &self.daemon_addr)
            .field("paper_fill", &self.paper_fill)
            .finish()
    }
}

impl TradingConfig {
    /// Resolve from the process environment. Blank values count as unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let poster_password = get(ENV_POSTER_PASSWORD).ok_or(ConfigError::Missing(ENV_POSTER_PASSWORD))?;

        let broker_host = get(ENV_BROKER_HOST)
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_BROKER_HOST.to_string());

        let broker_port = parse_or(
            get(ENV_BROKER_PORT),
            DEFAULT_BROKER_PORT,
            ENV_BROKER_PORT,
            "a TCP port number",
        )?;

        let margin_rate: Decimal = parse_or(
            get(ENV_MARGIN_RATE),
            DEFAULT_MARGIN_RATE,
            ENV_MARGIN_RATE,
            "a decimal fraction such as 0.0016",
        )?;
        if margin_rate <= Decimal::ZERO || margin_rate >= Decimal::ONE {
            return Err(ConfigError::Invalid {
                var: ENV_MARGIN_RATE,
                expected: "greater than 0 and less than 1",
            });
        }

        let daily_win_cap = parse_or(
            get(ENV_DAILY_WIN_CAP),
            DEFAULT_DAILY_WIN_CAP,
            ENV_DAILY_WIN_CAP,
            "a non-negative integer",
        )?;

        let timeout_secs: u64 = parse_or(
            get(ENV_BUY_TIMEOUT_SECS),
            DEFAULT_BUY_TIMEOUT_SECS,
            ENV_BUY_TIMEOUT_SECS,
            "a positive number of seconds",
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: ENV_BUY_TIMEOUT_SECS,
                expected: "a positive number of seconds",
            });
        }

        let exchange_overrides = parse_overrides(
            get(ENV_EXCHANGE_OVERRIDES)
                .as_deref()
                .unwrap_or(DEFAULT_EXCHANGE_OVERRIDES),
        )
        .ok_or(ConfigError::Invalid {
            var: ENV_EXCHANGE_OVERRIDES,
            expected: "a comma-separated list of SYMBOL:VENUE pairs",
        })?;

        let daemon_addr = get(ENV_DAEMON_ADDR)
            .as_deref()
            .unwrap_or(DEFAULT_DAEMON_ADDR)
            .trim()
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid {
                var: ENV_DAEMON_ADDR,
                expected: "a socket address such as 127.0.0.1:5592",
            })?;

        let paper_fill = get(ENV_PAPER_FILL)
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_PAPER_FILL.to_string());

        Ok(Self {
            poster_password,
            broker_host,
            broker_port,
            margin_rate,
            daily_win_cap,
            buy_timeout: Duration::from_secs(timeout_secs),
            account_id: get(ENV_ACCOUNT_ID).map(|v| v.trim().to_string()),
            notify_to: get(ENV_NOTIFY_TO).map(|v| v.trim().to_string()),
            notify_from: get(ENV_NOTIFY_FROM).map(|v| v.trim().to_string()),
            notify_webhook_url: get(ENV_NOTIFY_WEBHOOK_URL).map(|v| v.trim().to_string()),
            exchange_overrides,
            daemon_addr,
            paper_fill,
        })
    }

    /// `host:port` of the brokerage gateway.
    pub fn broker_endpoint(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_or<T: FromStr>(
    raw: Option<String>,
    default: T,
    var: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { var, expected }),
    }
}

/// Parse `SYM:VENUE,SYM:VENUE`. Blank input yields an empty table.
/// Returns `None` on any malformed entry.
pub fn parse_overrides(raw: &str) -> Option<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (sym, venue) = entry.split_once(':')?;
        let (sym, venue) = (sym.trim(), venue.trim());
        if sym.is_empty() || venue.is_empty() {
            return None;
        }
        out.insert(sym.to_ascii_uppercase(), venue.to_ascii_uppercase());
    }
    Some(out)
}
