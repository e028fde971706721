use log::LevelFilter;

const DEFAULT_SESSION_TTL_MINUTES: i64 = 720;

/// Built once in `main` from the environment and handed to the app
/// state; nothing reads the environment after startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub session_ttl_minutes: i64,
    pub log_level: LevelFilter,
}

impl Config {
    pub fn from_env() -> Self {
        let session_ttl_minutes = std::env::var("GRADEBOOKD_SESSION_TTL_MINUTES")
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_SESSION_TTL_MINUTES);

        // Logging goes to stderr; stdout carries the wire protocol.
        let log_level = std::env::var("GRADEBOOKD_LOG")
            .ok()
            .and_then(|v| parse_level(&v))
            .unwrap_or(LevelFilter::Off);

        Self {
            session_ttl_minutes,
            log_level,
        }
    }
}

fn parse_level(raw: &str) -> Option<LevelFilter> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}
