use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::diversity::{
    CATEGORY_BUCKET_RETENTION, DiversityTunables, MAX_PER_HOUR, MAX_TREND_ATTEMPTS,
    SIMILARITY_THRESHOLD,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    http_bind: SocketAddr,
    trend_llm_base_url: String,
    trend_llm_api_key: Option<String>,
    trend_llm_model: String,
    trend_llm_timeout: Duration,
    trend_cache_ttl: Duration,
    diversity_cooldown: Duration,
    diversity_max_per_hour: u32,
    diversity_similarity_threshold: f64,
    bulk_mode_threshold: usize,
    trend_max_attempts: u32,
    bulk_relaxation_window: Duration,
    bulk_mode_auto_expire: Duration,
    janitor_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から Topic Diversity Worker の設定値を読み込み、検証する。
    ///
    /// すべての値に既定値があり、未設定の変数は既定値で補う。
    ///
    /// # Errors
    /// 値のパースに失敗した場合や範囲外の場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_bind = parse_socket_addr("TOPIC_WORKER_HTTP_BIND", "0.0.0.0:9010")?;

        // Trend generator
        let trend_llm_base_url = non_empty(
            "TREND_LLM_BASE_URL",
            env::var("TREND_LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/".to_string()),
        )?;
        let trend_llm_api_key = env::var("TREND_LLM_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        let trend_llm_model = non_empty(
            "TREND_LLM_MODEL",
            env::var("TREND_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        )?;
        let trend_llm_timeout = parse_positive_duration_secs("TREND_LLM_TIMEOUT_SECS", 30)?;
        let trend_cache_ttl = parse_positive_duration_secs("TREND_CACHE_TTL_SECS", 900)?;

        // Diversity ledger
        let diversity_cooldown = parse_positive_duration_secs("DIVERSITY_COOLDOWN_SECS", 7200)?;
        let diversity_max_per_hour = parse_u32("DIVERSITY_MAX_PER_HOUR", MAX_PER_HOUR)?;
        if diversity_max_per_hour == 0 {
            return Err(ConfigError::Invalid {
                name: "DIVERSITY_MAX_PER_HOUR",
                source: anyhow::anyhow!("must be greater than zero"),
            });
        }
        let diversity_similarity_threshold =
            parse_ratio("DIVERSITY_SIMILARITY_THRESHOLD", SIMILARITY_THRESHOLD)?;

        // Bulk mode
        let bulk_mode_threshold = parse_usize("BULK_MODE_THRESHOLD", 50)?;
        let trend_max_attempts = parse_u32("TREND_MAX_ATTEMPTS", MAX_TREND_ATTEMPTS)?;
        let bulk_relaxation_window = parse_duration_secs("BULK_RELAXATION_WINDOW_SECS", 1800)?;
        let bulk_mode_auto_expire =
            parse_positive_duration_secs("BULK_MODE_AUTO_EXPIRE_SECS", 1800)?;

        let janitor_interval = parse_positive_duration_secs("JANITOR_INTERVAL_SECS", 3600)?;

        Ok(Self {
            http_bind,
            trend_llm_base_url,
            trend_llm_api_key,
            trend_llm_model,
            trend_llm_timeout,
            trend_cache_ttl,
            diversity_cooldown,
            diversity_max_per_hour,
            diversity_similarity_threshold,
            bulk_mode_threshold,
            trend_max_attempts,
            bulk_relaxation_window,
            bulk_mode_auto_expire,
            janitor_interval,
        })
    }

    #[must_use]
    pub fn http_bind(&self) -> SocketAddr {
        self.http_bind
    }

    #[must_use]
    pub fn trend_llm_base_url(&self) -> &str {
        &self.trend_llm_base_url
    }

    #[must_use]
    pub fn trend_llm_api_key(&self) -> Option<&str> {
        self.trend_llm_api_key.as_deref()
    }

    #[must_use]
    pub fn trend_llm_model(&self) -> &str {
        &self.trend_llm_model
    }

    #[must_use]
    pub fn trend_llm_timeout(&self) -> Duration {
        self.trend_llm_timeout
    }

    #[must_use]
    pub fn trend_cache_ttl(&self) -> Duration {
        self.trend_cache_ttl
    }

    #[must_use]
    pub fn janitor_interval(&self) -> Duration {
        self.janitor_interval
    }

    /// 多様性制御の調整値をまとめて返す。
    #[must_use]
    pub fn tunables(&self) -> DiversityTunables {
        DiversityTunables {
            cooldown: self.diversity_cooldown,
            max_per_hour: self.diversity_max_per_hour,
            similarity_threshold: self.diversity_similarity_threshold,
            cache_ttl: self.trend_cache_ttl,
            bulk_threshold: self.bulk_mode_threshold,
            max_trend_attempts: self.trend_max_attempts,
            bulk_relaxation_window: self.bulk_relaxation_window,
            bulk_auto_expire: self.bulk_mode_auto_expire,
            category_bucket_retention: CATEGORY_BUCKET_RETENTION,
        }
    }
}

fn non_empty(name: &'static str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(name));
    }
    Ok(value)
}

fn parse_socket_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

fn parse_positive_duration_secs(
    name: &'static str,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    let duration = parse_duration_secs(name, default_secs)?;
    if duration.is_zero() {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("must be greater than zero"),
        });
    }
    Ok(duration)
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_ratio(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !(parsed > 0.0 && parsed <= 1.0) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("value must be in (0, 1], got {parsed}"),
        });
    }
    Ok(parsed)
}
