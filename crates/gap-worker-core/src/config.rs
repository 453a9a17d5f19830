//! Typed configuration loaded from the environment.
//!
//! Required fields are validated eagerly and all at once: a worker that is
//! missing three environment variables should say so in one error, not
//! fail, get fixed, restart, and fail again on the second.

use std::time::Duration;

use crate::error::ConfigError;

#[derive(Clone)]
pub struct Settings {
    pub rabbitmq_host: String,
    pub rabbitmq_port: u16,
    pub rabbitmq_user: String,
    pub rabbitmq_password: String,
    pub rabbitmq_vhost: String,

    pub db_path: String,

    pub grobid_url: String,
    pub grobid_timeout: Duration,

    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_rate_limit_per_minute: u32,

    pub search_max_results: usize,
    pub search_timeout: Duration,

    pub max_gaps_per_paper: usize,
    pub min_gaps_per_paper: usize,
    pub gap_validation_papers: usize,
    pub gap_confidence_threshold: f64,

    pub async_timeout: Duration,
    pub max_concurrent_validations: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,

    pub log_level: String,
    pub log_file: Option<String>,

    pub debug: bool,
}

impl Settings {
    pub fn rabbitmq_url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.rabbitmq_user,
            urlencode(&self.rabbitmq_password),
            self.rabbitmq_host,
            self.rabbitmq_port,
            self.rabbitmq_vhost.trim_start_matches('/'),
        )
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let req = |name: &str, missing: &mut Vec<String>| -> String {
            match std::env::var(name) {
                Ok(v) if !v.is_empty() => v,
                _ => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        };
        let opt = |name: &str, default: &str| -> String {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };
        let opt_num = |name: &str, default: u64| -> u64 {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        let opt_f64 = |name: &str, default: f64| -> f64 {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        let rabbitmq_host = req("RABBITMQ_HOST", &mut missing);
        let rabbitmq_user = req("RABBITMQ_USER", &mut missing);
        let rabbitmq_password = req("RABBITMQ_PASSWORD", &mut missing);
        let db_path = req("DB_PATH", &mut missing);
        let grobid_url = req("GROBID_URL", &mut missing);
        let gemini_api_key = req("GA_GEMINI_API_KEY", &mut missing);

        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing));
        }

        Ok(Self {
            rabbitmq_host,
            rabbitmq_port: opt_num("RABBITMQ_PORT", 5672) as u16,
            rabbitmq_user,
            rabbitmq_password,
            rabbitmq_vhost: opt("RABBITMQ_VHOST", "/"),

            db_path,

            grobid_url,
            grobid_timeout: Duration::from_secs(opt_num("GROBID_TIMEOUT", 120)),

            gemini_api_key,
            gemini_model: opt("GA_GEMINI_MODEL", "gemini-2.0-flash-exp"),
            gemini_rate_limit_per_minute: opt_num("GA_GEMINI_RATE_LIMIT", 2) as u32,

            search_max_results: opt_num("SEARCH_MAX_RESULTS", 10) as usize,
            search_timeout: Duration::from_secs(opt_num("SEARCH_TIMEOUT", 30)),

            max_gaps_per_paper: opt_num("MAX_GAPS_PER_PAPER", 7) as usize,
            min_gaps_per_paper: opt_num("MIN_GAPS_PER_PAPER", 3) as usize,
            gap_validation_papers: opt_num("GAP_VALIDATION_PAPERS", 5) as usize,
            gap_confidence_threshold: opt_f64("GAP_CONFIDENCE_THRESHOLD", 0.5),

            async_timeout: Duration::from_secs(opt_num("ASYNC_TIMEOUT", 300)),
            max_concurrent_validations: opt_num("MAX_CONCURRENT_VALIDATIONS", 1) as usize,
            retry_attempts: opt_num("RETRY_ATTEMPTS", 3) as u32,
            retry_delay: Duration::from_secs(opt_num("RETRY_DELAY", 5)),

            log_level: opt("LOG_LEVEL", "info"),
            log_file: std::env::var("LOG_FILE").ok(),

            debug: std::env::var("DEBUG")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}

/// Secrets never leak into logs: anything formatted via `{:?}` shows a
/// fixed placeholder instead of the real value.
impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("rabbitmq_host", &self.rabbitmq_host)
            .field("rabbitmq_port", &self.rabbitmq_port)
            .field("rabbitmq_user", &self.rabbitmq_user)
            .field("rabbitmq_password", &"<redacted>")
            .field("rabbitmq_vhost", &self.rabbitmq_vhost)
            .field("db_path", &self.db_path)
            .field("grobid_url", &self.grobid_url)
            .field("grobid_timeout", &self.grobid_timeout)
            .field("gemini_api_key", &"<redacted>")
            .field("gemini_model", &self.gemini_model)
            .field(
                "gemini_rate_limit_per_minute",
                &self.gemini_rate_limit_per_minute,
            )
            .field("search_max_results", &self.search_max_results)
            .field("search_timeout", &self.search_timeout)
            .field("max_gaps_per_paper", &self.max_gaps_per_paper)
            .field("min_gaps_per_paper", &self.min_gaps_per_paper)
            .field("gap_validation_papers", &self.gap_validation_papers)
            .field("gap_confidence_threshold", &self.gap_confidence_threshold)
            .field("async_timeout", &self.async_timeout)
            .field(
                "max_concurrent_validations",
                &self.max_concurrent_validations,
            )
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("log_level", &self.log_level)
            .field("log_file", &self.log_file)
            .field("debug", &self.debug)
            .finish()
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_reserved_chars() {
        assert_eq!(urlencode("p@ss/w:rd"), "p%40ss%2Fw%3Ard");
        assert_eq!(urlencode("plain"), "plain");
    }

    #[test]
    fn debug_redacts_secrets() {
        let settings = Settings {
            rabbitmq_host: "localhost".into(),
            rabbitmq_port: 5672,
            rabbitmq_user: "guest".into(),
            rabbitmq_password: "hunter2".into(),
            rabbitmq_vhost: "/".into(),
            db_path: "gap_worker.db".into(),
            grobid_url: "http://localhost:8070".into(),
            grobid_timeout: Duration::from_secs(120),
            gemini_api_key: "super-secret-key".into(),
            gemini_model: "gemini-2.0-flash-exp".into(),
            gemini_rate_limit_per_minute: 2,
            search_max_results: 10,
            search_timeout: Duration::from_secs(30),
            max_gaps_per_paper: 7,
            min_gaps_per_paper: 3,
            gap_validation_papers: 5,
            gap_confidence_threshold: 0.5,
            async_timeout: Duration::from_secs(300),
            max_concurrent_validations: 1,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(5),
            log_level: "info".into(),
            log_file: None,
            debug: false,
        };
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("super-secret-key"));
        assert!(rendered.contains("<redacted>"));
    }
}
