// ABOUTME: Gateway configuration loaded from environment variables with documented defaults
// ABOUTME: from_lookup takes any key lookup so tests never mutate the process environment

use crate::error::{GatewayError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub smpp_host: String,
    pub smpp_port: u16,
    pub smpp_tls_port: u16,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,

    pub postgres: PostgresConfig,
    pub redis: RedisConfig,

    /// Messages per minute per customer
    pub customer_rate_limit_per_min: i64,
    /// 10DLC caps per source number; enforced only when both are positive
    pub tendlc_hourly_limit: i64,
    pub tendlc_daily_limit: i64,

    pub allow_all_binds: bool,
    /// `system_id:password` pairs
    pub credentials: Vec<(String, String)>,

    pub shutdown_timeout: Duration,
    /// Deadline for each rate limit or DLR tracker round trip
    pub store_timeout: Duration,

    pub log_level: String,
    pub log_format: LogFormat,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub pool_size: usize,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let postgres_password = lookup("POSTGRES_PASSWORD")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| GatewayError::Config("POSTGRES_PASSWORD is required".to_string()))?;

        let log_format = match get("LOG_FORMAT", "text").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "text" => LogFormat::Text,
            other => {
                return Err(GatewayError::Config(format!(
                    "LOG_FORMAT must be text or json, got {other}"
                )));
            }
        };

        Ok(Config {
            smpp_host: get("SMPP_HOST", "0.0.0.0"),
            smpp_port: parse(&lookup, "SMPP_PORT", 2775)?,
            smpp_tls_port: parse(&lookup, "SMPP_TLS_PORT", 2776)?,
            tls_cert_path: path("TLS_CERT_PATH"),
            tls_key_path: path("TLS_KEY_PATH"),
            postgres: PostgresConfig {
                host: get("POSTGRES_HOST", "localhost"),
                port: parse(&lookup, "POSTGRES_PORT", 5432)?,
                user: get("POSTGRES_USER", "warp"),
                password: postgres_password,
                dbname: get("POSTGRES_DB", "warp"),
                pool_size: parse(&lookup, "POSTGRES_POOL_SIZE", 10)?,
            },
            redis: RedisConfig {
                host: get("REDIS_HOST", "localhost"),
                port: parse(&lookup, "REDIS_PORT", 6379)?,
                password: get("REDIS_PASSWORD", ""),
                db: parse(&lookup, "REDIS_DB", 0)?,
            },
            customer_rate_limit_per_min: parse(&lookup, "CUSTOMER_RATE_LIMIT_PER_MIN", 100)?,
            tendlc_hourly_limit: parse(&lookup, "TENDLC_HOURLY_LIMIT", 0)?,
            tendlc_daily_limit: parse(&lookup, "TENDLC_DAILY_LIMIT", 0)?,
            allow_all_binds: parse(&lookup, "SMPP_ALLOW_ALL_BINDS", false)?,
            credentials: parse_credentials(&get("SMPP_CREDENTIALS", ""))?,
            shutdown_timeout: Duration::from_secs(parse(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?),
            store_timeout: Duration::from_millis(parse(&lookup, "STORE_TIMEOUT_MS", 2000)?),
            log_level: get("LOG_LEVEL", "info"),
            log_format,
            environment: get("ENVIRONMENT", "production"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.smpp_host, self.smpp_port)
    }

    /// TLS listener address, present only when both cert and key are set
    pub fn tls_listen_addr(&self) -> Option<String> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(_), Some(_)) => Some(format!("{}:{}", self.smpp_host, self.smpp_tls_port)),
            _ => None,
        }
    }

    pub fn tendlc_enabled(&self) -> bool {
        self.tendlc_hourly_limit > 0 && self.tendlc_daily_limit > 0
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GatewayError::Config(format!("{key} has invalid value '{raw}'"))),
    }
}

fn parse_credentials(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once(':')
                .map(|(id, pw)| (id.to_string(), pw.to_string()))
                .ok_or_else(|| {
                    GatewayError::Config(format!(
                        "SMPP_CREDENTIALS entry '{entry}' must be system_id:password"
                    ))
                })
        })
        .collect()
}
