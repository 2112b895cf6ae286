use pushline_core::{IngestConfig, RegistryConfig, SchedulerConfig};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded via environment variables.
///
/// Every tunable has a default; only `DATABASE_URL` is mandatory and its
/// absence is surfaced by `main` as a fatal startup error.
#[derive(Debug, Clone)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Database settings
    pub database_url: Option<String>,

    // Worker, bus, and fan-out tuning
    pub scheduler: SchedulerConfig,
    pub ingest: IngestConfig,
    pub registry: RegistryConfig,

    // Shutdown settings
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let scheduler = SchedulerConfig {
            claim_workers: env_or("CLAIM_WORKERS", 10),
            delivery_workers: env_or("DELIVERY_WORKERS", 50),
            batch_size: env_or("CLAIM_BATCH_SIZE", 500),
            poll_interval: Duration::from_millis(env_or(
                "POLL_INTERVAL_MS",
                100,
            )),
            lease_duration: Duration::from_secs(env_or(
                "LEASE_DURATION_SECS",
                30,
            )),
            hand_off_capacity: env_or("HAND_OFF_CAPACITY", 5000),
            status_flush_interval: Duration::from_millis(env_or(
                "STATUS_FLUSH_INTERVAL_MS",
                1000,
            )),
            sweep_interval: Duration::from_secs(env_or(
                "SWEEP_INTERVAL_SECS",
                10,
            )),
            max_retries: env_or("MAX_RETRIES", 3),
            shutdown_grace: Duration::from_secs(env_or(
                "SHUTDOWN_GRACE_SECS",
                30,
            )),
        };

        let ingest = IngestConfig {
            brokers: env_or_string("KAFKA_BROKERS", "localhost:9092"),
            topic: env_or_string("KAFKA_TOPIC", "notification-events"),
            group_id: env_or_string(
                "KAFKA_GROUP_ID",
                "pushline-delivery",
            ),
            batch_size: env_or("INGEST_BATCH_SIZE", 100),
            linger: Duration::from_millis(env_or(
                "INGEST_LINGER_MS",
                50,
            )),
        };

        let registry = RegistryConfig {
            max_connections: env_or("MAX_CONNECTIONS", 1000),
            idle_timeout: Duration::from_secs(env_or(
                "SINK_IDLE_TIMEOUT_SECS",
                300,
            )),
            maintenance_interval: Duration::from_secs(env_or(
                "REGISTRY_MAINTENANCE_SECS",
                60,
            )),
        };

        Ok(Self {
            server_host: env_or_string("SERVER_HOST", "0.0.0.0"),
            server_port: env_or("SERVER_PORT", 8080),
            database_url: env::var("DATABASE_URL").ok(),
            shutdown_grace: Duration::from_secs(env_or(
                "SHUTDOWN_GRACE_SECS",
                30,
            )),
            scheduler,
            ingest,
            registry,
        })
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
