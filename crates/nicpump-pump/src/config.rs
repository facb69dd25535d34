use nicpump_e1000::E1000Config;
use nicpump_ipc::ProcessId;
use thiserror::Error;

use crate::backoff::BackoffKind;

pub const ENV_NS_ENVID: &str = "NICPUMP_NS_ENVID";
pub const ENV_MAC: &str = "NICPUMP_MAC";
pub const ENV_BACKOFF: &str = "NICPUMP_BACKOFF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for env var {0}")]
    InvalidEnv(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    /// The network stack process; the only sender the output pump accepts.
    pub stack: ProcessId,
    pub mac: [u8; 6],
    pub backoff: BackoffKind,
}

impl PumpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let stack = lookup(ENV_NS_ENVID).ok_or(ConfigError::MissingEnv(ENV_NS_ENVID))?;
        let stack = parse_process_id(&stack).ok_or(ConfigError::InvalidEnv(ENV_NS_ENVID))?;

        let mac = match lookup(ENV_MAC) {
            Some(raw) => parse_mac(&raw).ok_or(ConfigError::InvalidEnv(ENV_MAC))?,
            None => E1000Config::default().mac,
        };

        let backoff = match lookup(ENV_BACKOFF) {
            Some(raw) => raw
                .parse::<BackoffKind>()
                .map_err(|()| ConfigError::InvalidEnv(ENV_BACKOFF))?,
            None => BackoffKind::default(),
        };

        Ok(Self {
            stack,
            mac,
            backoff,
        })
    }

    pub fn e1000_config(&self) -> E1000Config {
        E1000Config { mac: self.mac }
    }
}

/// Decimal, or hex with a `0x` prefix. Digits only: no sign, no underscores.
fn parse_process_id(raw: &str) -> Option<ProcessId> {
    let raw = raw.trim();
    let (digits, radix) = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (raw, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok().map(ProcessId)
}

/// `aa:bb:cc:dd:ee:ff` (`-` also accepted as separator).
pub fn parse_mac(raw: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = raw.trim().split(|c: char| c == ':' || c == '-');
    for byte in &mut mac {
        let part = parts.next()?;
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}
