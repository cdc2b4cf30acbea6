use std::env;
use std::str::FromStr;

use tracing::warn;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_REMINDER_OFFSETS_MINUTES: &[i64] = &[1440, 60];
const DEFAULT_RECENT_UPDATES_LIMIT: usize = 20;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_NOTIFICATION_TIMEOUT_SECONDS: u64 = 10;
/// One year; larger reminder offsets are rejected.
pub const MAX_REMINDER_OFFSET_MINUTES: i64 = 365 * 24 * 60;

/// Which persistence backend the engine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub redis_url: Option<String>,
    pub reminder_offsets_minutes: Vec<i64>,
    pub reminder_channels: Vec<String>,
    pub notification_webhook_url: Option<String>,
    pub notification_timeout_seconds: u64,
    pub recent_updates_limit: usize,
    pub event_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            store_backend: StoreBackend::Memory,
            redis_url: None,
            reminder_offsets_minutes: DEFAULT_REMINDER_OFFSETS_MINUTES.to_vec(),
            reminder_channels: vec!["push".to_string()],
            notification_webhook_url: None,
            notification_timeout_seconds: DEFAULT_NOTIFICATION_TIMEOUT_SECONDS,
            recent_updates_limit: DEFAULT_RECENT_UPDATES_LIMIT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            port: parse_var("APP_PORT").unwrap_or(defaults.port),
            store_backend: env::var("STORE_BACKEND")
                .ok()
                .and_then(|raw| match raw.parse() {
                    Ok(backend) => Some(backend),
                    Err(e) => {
                        warn!("STORE_BACKEND invalid ({}), using in-memory store", e);
                        None
                    }
                })
                .unwrap_or(defaults.store_backend),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            reminder_offsets_minutes: env::var("REMINDER_OFFSETS_MINUTES")
                .ok()
                .and_then(|raw| parse_offsets(&raw))
                .unwrap_or_else(|| {
                    warn!("REMINDER_OFFSETS_MINUTES not set or invalid, using 24h and 1h");
                    defaults.reminder_offsets_minutes.clone()
                }),
            reminder_channels: env::var("REMINDER_CHANNELS")
                .ok()
                .map(|raw| parse_list(&raw))
                .filter(|channels| !channels.is_empty())
                .unwrap_or(defaults.reminder_channels),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            notification_timeout_seconds: parse_var("NOTIFICATION_TIMEOUT_SECONDS")
                .unwrap_or(defaults.notification_timeout_seconds),
            recent_updates_limit: parse_var("RECENT_UPDATES_LIMIT")
                .unwrap_or(defaults.recent_updates_limit),
            event_channel_capacity: parse_var("EVENT_CHANNEL_CAPACITY")
                .unwrap_or(defaults.event_channel_capacity),
        };

        if !config.is_configured() {
            warn!("STORE_BACKEND=redis but REDIS_URL is not set");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        match self.store_backend {
            StoreBackend::Memory => true,
            StoreBackend::Redis => self.redis_url.is_some(),
        }
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{} has an invalid value '{}', using default", key, raw);
            None
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Offsets must be positive minute counts; any bad item rejects the whole list.
fn parse_offsets(raw: &str) -> Option<Vec<i64>> {
    let offsets = parse_list(raw)
        .iter()
        .map(|item| {
            item.parse::<i64>()
                .ok()
                .filter(|minutes| (1..=MAX_REMINDER_OFFSET_MINUTES).contains(minutes))
        })
        .collect::<Option<Vec<_>>>()?;

    if offsets.is_empty() {
        None
    } else {
        Some(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offset_lists() {
        assert_eq!(parse_offsets("1440, 60"), Some(vec![1440, 60]));
        assert_eq!(parse_offsets("30"), Some(vec![30]));
        assert_eq!(parse_offsets("60,abc"), None);
        assert_eq!(parse_offsets("-5"), None);
        assert_eq!(parse_offsets("60,9223372036854775807"), None);
        assert_eq!(
            parse_offsets(&MAX_REMINDER_OFFSET_MINUTES.to_string()),
            Some(vec![MAX_REMINDER_OFFSET_MINUTES])
        );
        assert_eq!(parse_offsets(""), None);
    }

    #[test]
    fn parses_store_backend() {
        assert_eq!("redis".parse::<StoreBackend>(), Ok(StoreBackend::Redis));
        assert_eq!(" Memory ".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert!("postgres".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn redis_backend_requires_url() {
        let mut config = AppConfig::default();
        assert!(config.is_configured());

        config.store_backend = StoreBackend::Redis;
        assert!(!config.is_configured());

        config.redis_url = Some("redis://localhost:6379".to_string());
        assert!(config.is_configured());
    }
}
