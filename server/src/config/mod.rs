use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::jobs::QueueConfig;
use crate::services::{OrderPolicy, PaymentPolicy};

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::with_security_headers;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/boxoffice";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:3001";
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub server_addr: String,
    pub cors_allowed_origins: String,
    pub production: bool,
    pub gateway_server_key: String,
    pub job_queue_workers: usize,
    pub job_queue_capacity: usize,
    pub job_retry_max: u32,
    pub expiry_sweep_interval: Duration,
    pub payment_window_hours: i64,
    pub order_lock_ttl: Duration,
    pub payment_lock_ttl: Duration,
    pub max_tickets_per_order: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            database_max_connections: 10,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            cors_allowed_origins: DEFAULT_ALLOWED_ORIGINS.to_string(),
            production: false,
            gateway_server_key: String::new(),
            job_queue_workers: 5,
            job_queue_capacity: 100,
            job_retry_max: 3,
            expiry_sweep_interval: Duration::from_secs(60),
            payment_window_hours: 24,
            order_lock_ttl: Duration::from_secs(300),
            payment_lock_ttl: Duration::from_secs(30),
            max_tickets_per_order: 4,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup. Missing keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);

        Self {
            database_url: string("DATABASE_URL", defaults.database_url),
            database_max_connections: parse_or(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            redis_url: string("REDIS_URL", defaults.redis_url),
            server_addr: string("SERVER_ADDR", defaults.server_addr),
            cors_allowed_origins: string("CORS_ALLOWED_ORIGINS", defaults.cors_allowed_origins),
            production: lookup("RUST_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
            gateway_server_key: string("GATEWAY_SERVER_KEY", defaults.gateway_server_key),
            job_queue_workers: parse_or(&lookup, "JOB_QUEUE_WORKERS", defaults.job_queue_workers),
            job_queue_capacity: parse_or(&lookup, "JOB_QUEUE_CAPACITY", defaults.job_queue_capacity),
            job_retry_max: parse_or(&lookup, "JOB_RETRY_MAX", defaults.job_retry_max),
            expiry_sweep_interval: Duration::from_secs(parse_or(
                &lookup,
                "EXPIRY_SWEEP_INTERVAL_SECS",
                defaults.expiry_sweep_interval.as_secs(),
            )),
            payment_window_hours: parse_or(
                &lookup,
                "PAYMENT_WINDOW_HOURS",
                defaults.payment_window_hours,
            ),
            order_lock_ttl: Duration::from_secs(parse_or(
                &lookup,
                "ORDER_LOCK_TTL_SECS",
                defaults.order_lock_ttl.as_secs(),
            )),
            payment_lock_ttl: Duration::from_secs(parse_or(
                &lookup,
                "PAYMENT_LOCK_TTL_SECS",
                defaults.payment_lock_ttl.as_secs(),
            )),
            max_tickets_per_order: parse_or(
                &lookup,
                "MAX_TICKETS_PER_ORDER",
                defaults.max_tickets_per_order,
            ),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            workers: self.job_queue_workers,
            capacity: self.job_queue_capacity,
            ..QueueConfig::default()
        }
    }

    pub fn order_policy(&self) -> OrderPolicy {
        OrderPolicy {
            max_tickets_per_order: self.max_tickets_per_order,
            payment_window: chrono::Duration::hours(self.payment_window_hours),
            lock_ttl: self.order_lock_ttl,
        }
    }

    pub fn payment_policy(&self) -> PaymentPolicy {
        PaymentPolicy {
            lock_ttl: self.payment_lock_ttl,
            retry_max: self.job_retry_max,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, default = %default, "Invalid config value, using default");
                default
            }
        },
    }
}
