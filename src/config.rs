use anyhow::{bail, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" | "mock" => Ok(StoreBackend::Memory),
            other => bail!("Unsupported STORE_BACKEND '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub http_host: String,
    pub http_port: u16,
    pub cors_origins: Vec<String>,
    pub store_backend: StoreBackend,
    pub demo_data_path: Option<String>,
    pub database_url: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub jwt_secret_key: String,
    pub google_maps_api_key: String,
    pub google_maps_base_url: String,
    pub routing_timeout_ms: u64,
    pub routing_fallback_duration_secs: i64,
    pub routing_max_failures: u32,
    pub routing_circuit_breaker_cooldown: u64,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub twilio_base_url: String,
    pub kafka_enabled: bool,
    pub kafka_bootstrap_servers: String,
    pub kafka_realtime_topic: String,
    pub kafka_security_protocol: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_message_timeout_ms: u64,
    pub log_level: String,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let http_host = var_or("HTTP_HOST", "0.0.0.0");
        let http_port = parsed_or("HTTP_PORT", 8000);
        let cors_origins = var_or("CORS_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let store_backend: StoreBackend = var_or("STORE_BACKEND", "postgres").parse()?;
        let demo_data_path = env::var("DEMO_DATA_PATH").ok().filter(|p| !p.is_empty());

        let db_host = var_or("DB_HOST", "localhost");
        let db_port = var_or("DB_PORT", "5432");
        let db_name = var_or("DB_DATABASE", "sanjeevani");
        let db_user = var_or("DB_USER", "sanjeevani");
        let db_pwd = var_or("DB_PWD", "sanjeevani");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );
        let db_max_connections = parsed_or("DB_MAX_CONNECTIONS", 20);
        let run_migrations = parsed_or("RUN_MIGRATIONS", true);

        let jwt_secret_key = var_or("JWT_SECRET_KEY", "your-secret-key");

        let google_maps_api_key = env::var("GOOGLE_MAPS_API_KEY").unwrap_or_default();
        let google_maps_base_url =
            var_or("GOOGLE_MAPS_BASE_URL", "https://maps.googleapis.com/maps/api");
        let routing_timeout_ms = parsed_or("ROUTING_TIMEOUT_MS", 3000);
        let routing_fallback_duration_secs = parsed_or("ROUTING_FALLBACK_DURATION_SECS", 1800);
        let routing_max_failures = parsed_or("ROUTING_MAX_FAILURES", 5);
        let routing_circuit_breaker_cooldown = parsed_or("ROUTING_CIRCUIT_BREAKER_COOLDOWN", 60);

        let twilio_account_sid = env::var("TWILIO_ACCOUNT_SID").unwrap_or_default();
        let twilio_auth_token = env::var("TWILIO_AUTH_TOKEN").unwrap_or_default();
        let twilio_phone_number = env::var("TWILIO_PHONE_NUMBER").unwrap_or_default();
        let twilio_base_url = var_or("TWILIO_BASE_URL", "https://api.twilio.com/2010-04-01");

        let kafka_enabled = parsed_or("KAFKA_ENABLED", true);
        let kafka_bootstrap_servers = var_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092");
        let kafka_realtime_topic = var_or("KAFKA_REALTIME_TOPIC", "sanjeevani-realtime");
        let kafka_security_protocol = var_or("KAFKA_SECURITY_PROTOCOL", "PLAINTEXT");
        let kafka_sasl_mechanism = var_or("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256");
        let kafka_username = env::var("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = env::var("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_message_timeout_ms = parsed_or("KAFKA_MESSAGE_TIMEOUT_MS", 5000);

        let log_level = var_or("LOG_LEVEL", "info");

        Ok(Self {
            http_host,
            http_port,
            cors_origins,
            store_backend,
            demo_data_path,
            database_url,
            db_max_connections,
            run_migrations,
            jwt_secret_key,
            google_maps_api_key,
            google_maps_base_url,
            routing_timeout_ms,
            routing_fallback_duration_secs,
            routing_max_failures,
            routing_circuit_breaker_cooldown,
            twilio_account_sid,
            twilio_auth_token,
            twilio_phone_number,
            twilio_base_url,
            kafka_enabled,
            kafka_bootstrap_servers,
            kafka_realtime_topic,
            kafka_security_protocol,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_message_timeout_ms,
            log_level,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("postgres".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!("MEMORY".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("mongodb".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_parsed_or_falls_back_on_garbage() {
        env::set_var("SANJEEVANI_TEST_PARSE_PORT", "not-a-number");
        assert_eq!(parsed_or("SANJEEVANI_TEST_PARSE_PORT", 8000u16), 8000);
        env::set_var("SANJEEVANI_TEST_PARSE_PORT", " 9100 ");
        assert_eq!(parsed_or("SANJEEVANI_TEST_PARSE_PORT", 8000u16), 9100);
        assert!(!parsed_or("SANJEEVANI_TEST_UNSET_FLAG", false));
    }
}
