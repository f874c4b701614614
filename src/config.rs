use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub db_run_migrations: bool,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub request_timeout_seconds: u64,
    pub ledger_writes_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Rent Ledger API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            db_run_migrations: env_parse_bool_or("DB_RUN_MIGRATIONS", true),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            request_timeout_seconds: env_parse_or("REQUEST_TIMEOUT_SECONDS", 30),
            ledger_writes_enabled: env_parse_bool_or("LEDGER_WRITES_ENABLED", true),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    /// The in-memory store loses everything on restart, so production must
    /// point at a database.
    pub fn memory_store_allowed(&self) -> bool {
        !self.is_production()
    }
}

#[cfg(test)]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "Rent Ledger API".to_string(),
            environment: "test".to_string(),
            api_prefix: "/v1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["http://localhost:3000".to_string()],
            database_url: None,
            db_pool_max_connections: 1,
            db_pool_min_connections: 0,
            db_pool_acquire_timeout_seconds: 1,
            db_pool_idle_timeout_seconds: 60,
            db_run_migrations: false,
            rate_limit_enabled: false,
            rate_limit_per_second: 10,
            rate_limit_burst_size: 100,
            request_timeout_seconds: 5,
            ledger_writes_enabled: true,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    parse_bool(env_opt(key).as_deref()).unwrap_or(default)
}

fn parse_bool(raw: Option<&str>) -> Option<bool> {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => Some(true),
        Some("0" | "false" | "no" | "off") => Some(false),
        _ => None,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

// axum refuses to nest at "/", so a bare root falls back to the default too.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/v1".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
