use pg_pool::PoolConfig;

/// Server-level configuration, loaded from the environment: `.env` via
/// `dotenv`, then `envy::from_env`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Port the HTTP+WebSocket listener binds to.
    #[serde(default = "default_port")]
    pub proxy_service_port: u16,

    /// Postgres connection string (DSN) the pool dials.
    pub database_url: String,

    /// UTF-8 secret the token verifier signs/verifies against. A single
    /// secret per server instance; no multi-tenancy.
    pub proxy_auth_secret: String,

    /// Log level and format.
    #[serde(default = "default_log")]
    pub rust_log: String,
    #[serde(default)]
    pub log_format: String,

    /// An optional unauthenticated health-check path, e.g. `healthz`. When
    /// set, `GET /<healthCheck>` answers without requiring `auth`. `None`
    /// by default: any unauthenticated GET 404s.
    #[serde(default)]
    pub health_check_path: Option<String>,

    /// How long an accepted token's identity is remembered for replay
    /// rejection. Independent of the token's own 10s timestamp window:
    /// this is the map-expiry side.
    #[serde(default = "default_replay_window_secs")]
    pub token_replay_window_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_log() -> String {
    "info".to_string()
}

fn default_replay_window_secs() -> u64 {
    60
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        match dotenv::dotenv() {
            Ok(path) => eprintln!("Loaded .env from: {}", path.display()),
            Err(e) => eprintln!("dotenv warning: {e}"),
        }
        envy::from_env::<Config>()
    }

    pub fn pool_config(&self) -> Result<PoolConfig, pg_pool::PoolError> {
        let config = PoolConfig::from_env()?;
        Ok(config)
    }
}
